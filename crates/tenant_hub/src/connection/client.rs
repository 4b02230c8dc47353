//! Client connection representation.
//!
//! This module defines the record kept for every live connection: which
//! tenant it belongs to, who it currently is, how it relates to the other
//! tabs of the same browser, and the backend hooks wired onto it.

use std::collections::HashMap;
use std::time::SystemTime;

use serde_json::Value;

use super::{ConnectionEmitter, ConnectionId, ConnectionSender};
use crate::backend::SocketHook;
use crate::messaging::HubMessage;
use crate::tenant::TenantKey;

/// Represents an individual client connection to the hub.
///
/// The tenant is fixed for the whole lifetime of the connection. Parent and
/// child are stored as ids only; the registry clears them on either side's
/// disconnect and never relies on them for ownership.
#[derive(Debug)]
pub struct Connection {
    /// Hub-assigned id, also sent back to the client as the reconnection cookie
    pub id: ConnectionId,

    /// The tenant derived from the request host
    pub tenant: TenantKey,

    /// Application cookie value grouping the tabs of one browser
    pub session_cookie: String,

    /// All cookies sent with the handshake
    pub cookies: HashMap<String, String>,

    /// Currently displayed name (username or anonymous name)
    pub name: String,

    /// Whether `name` comes from a verified token
    pub authenticated: bool,

    /// Set by an explicit logout; forces the anonymous name until the next login
    pub logged_out: bool,

    /// Token attached by a login event, preferred over the cookie token
    pub token: Option<String>,

    /// Earlier connection of the same tab/browser this one reconnected from
    pub parent: Option<ConnectionId>,

    /// Later connection that named this one as its parent
    pub child: Option<ConnectionId>,

    /// When this connection was established
    pub connected_at: SystemTime,

    hooks: Vec<SocketHook>,
    sender: ConnectionSender,
}

impl Connection {
    /// Creates a connection record with no identity resolved yet.
    pub fn new(
        id: ConnectionId,
        tenant: TenantKey,
        session_cookie: String,
        cookies: HashMap<String, String>,
        sender: ConnectionSender,
    ) -> Self {
        Self {
            id,
            tenant,
            session_cookie,
            cookies,
            name: String::new(),
            authenticated: false,
            logged_out: false,
            token: None,
            parent: None,
            child: None,
            connected_at: SystemTime::now(),
            hooks: Vec::new(),
            sender,
        }
    }

    /// A child shares its identity with its parent tab.
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Queues an event for this connection; `false` if it already closed.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> bool {
        self.sender.send(HubMessage::new(event, data)).is_ok()
    }

    pub fn emitter(&self) -> ConnectionEmitter {
        ConnectionEmitter::new(self.id, self.sender.clone())
    }

    pub(crate) fn sender(&self) -> &ConnectionSender {
        &self.sender
    }

    pub(crate) fn set_hooks(&mut self, hooks: Vec<SocketHook>) {
        self.hooks = hooks;
    }

    /// Hooks registered for `event`, in declaration order.
    pub fn hooks_for(&self, event: &str) -> Vec<SocketHook> {
        self.hooks
            .iter()
            .filter(|hook| hook.event() == event)
            .cloned()
            .collect()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}
