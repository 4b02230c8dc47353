//! Message type definitions for client-hub communication.
//!
//! Every frame in either direction is a JSON object carrying an event name
//! and an arbitrary payload:
//!
//! ```json
//! { "event": "message", "data": "hello there" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent once per connection with the tenant metadata.
pub const CONNECTED_EVENT: &str = "connected";
/// The resolved display name of the receiving connection.
pub const WHOAMI_EVENT: &str = "whoami";
/// Chat line, both from clients and fanned out to the tenant.
pub const MESSAGE_EVENT: &str = "message";
/// Ordered list of names currently present in the tenant.
pub const ROSTER_EVENT: &str = "roster";
/// Diagnostics for a single connection.
pub const DEBUG_EVENT: &str = "debug";
/// Owner/admin control command.
pub const COMMAND_EVENT: &str = "command";

/// A single event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Event name, either built in or declared by a backend hook
    pub event: String,

    /// Payload, `null` when the frame carries none
    #[serde(default)]
    pub data: Value,
}

impl HubMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_data_defaults_to_null() {
        let message: HubMessage = serde_json::from_str(r#"{"event":"command"}"#).unwrap();
        assert_eq!(message.event, COMMAND_EVENT);
        assert_eq!(message.data, Value::Null);
    }

    #[test]
    fn test_wire_shape() {
        let message = HubMessage::new(ROSTER_EVENT, json!(["alice", "BraveOtter_?"]));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "event": "roster", "data": ["alice", "BraveOtter_?"] })
        );
    }
}
