//! Owner commands sent under the `command` event.
//!
//! A command payload is an object `{ "name": ..., "tag": ... }`. Only the
//! tenant owner and `admin` may run commands; anyone else is ignored without
//! a reply.

use std::fmt;

use serde_json::Value;

/// Name that may run commands on every tenant.
pub const ADMIN_NAME: &str = "admin";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rebuild the tenant backend from fresh content
    RefreshBackend,
    StartGameLoop { tag: String },
    StopGameLoop { tag: String },
    /// Dump the tenant's backend log ring
    GameLogs,
    /// Authorized but unrecognized; ignored
    Unknown(String),
}

/// Why a payload could not be parsed. The display text is sent back to the
/// client as a `debug` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejection {
    MissingCommand,
    MissingName,
}

impl fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandRejection::MissingCommand => f.write_str("missing command"),
            CommandRejection::MissingName => f.write_str("missing command name"),
        }
    }
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Parses a `command` payload.
///
/// A missing tag is read as the empty tag, which the scheduler rejects.
pub fn parse_command(payload: &Value) -> Result<Command, CommandRejection> {
    if is_empty_payload(payload) {
        return Err(CommandRejection::MissingCommand);
    }
    let Some(name) = payload.get("name").filter(|name| !name.is_null()) else {
        return Err(CommandRejection::MissingName);
    };
    let name = match name {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let tag = match payload.get("tag") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(match name.as_str() {
        "refresh-backend" => Command::RefreshBackend,
        "start-game-loop" => Command::StartGameLoop { tag },
        "stop-game-loop" => Command::StopGameLoop { tag },
        "game-logs" => Command::GameLogs,
        _ => Command::Unknown(name),
    })
}

/// Only the tenant owner and `admin` may run commands.
pub fn is_authorized(name: &str, owner: Option<&str>) -> bool {
    name == ADMIN_NAME || owner == Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command(&json!({ "name": "refresh-backend" })),
            Ok(Command::RefreshBackend)
        );
        assert_eq!(
            parse_command(&json!({ "name": "start-game-loop", "tag": "main" })),
            Ok(Command::StartGameLoop { tag: "main".into() })
        );
        assert_eq!(
            parse_command(&json!({ "name": "stop-game-loop" })),
            Ok(Command::StopGameLoop { tag: String::new() })
        );
        assert_eq!(parse_command(&json!({ "name": "game-logs" })), Ok(Command::GameLogs));
        assert_eq!(
            parse_command(&json!({ "name": "reboot" })),
            Ok(Command::Unknown("reboot".into()))
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(parse_command(&Value::Null), Err(CommandRejection::MissingCommand));
        assert_eq!(parse_command(&json!("")), Err(CommandRejection::MissingCommand));
        assert_eq!(parse_command(&json!({ "tag": "main" })), Err(CommandRejection::MissingName));
        assert_eq!(parse_command(&json!("refresh-backend")), Err(CommandRejection::MissingName));
        assert_eq!(CommandRejection::MissingName.to_string(), "missing command name");
    }

    #[test]
    fn test_authorization() {
        assert!(is_authorized("admin", None));
        assert!(is_authorized("alice", Some("alice")));
        assert!(!is_authorized("bob", Some("alice")));
        assert!(!is_authorized("Otter_?", None));
    }
}
