//! Sending events back to a single client.
//!
//! Backends never see the transport: they receive a [`ConnectionEmitter`]
//! inside each hook invocation and a [`DebugLog`] when their hooks are wired
//! onto a connection. Both only hold the connection's outbound channel, so a
//! send to a connection that has since gone away is silently dropped.

use serde_json::Value;

use super::{ConnectionId, ConnectionSender};
use crate::messaging::{HubMessage, DEBUG_EVENT};

/// Emits events to one connection.
#[derive(Clone, Debug)]
pub struct ConnectionEmitter {
    connection_id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionEmitter {
    pub fn new(connection_id: ConnectionId, sender: ConnectionSender) -> Self {
        Self { connection_id, sender }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queues `data` under `event` for this connection.
    ///
    /// Returns `false` if the connection is already closed.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> bool {
        self.sender.send(HubMessage::new(event, data)).is_ok()
    }

    /// Checks whether the connection is still accepting events.
    pub fn is_connection_active(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Diagnostic channel handed to a backend for one connection.
///
/// Everything logged here reaches the client as a `debug` event.
#[derive(Clone, Debug)]
pub struct DebugLog {
    emitter: ConnectionEmitter,
}

impl DebugLog {
    pub fn new(emitter: ConnectionEmitter) -> Self {
        Self { emitter }
    }

    pub fn log(&self, data: Value) -> bool {
        self.emitter.emit(DEBUG_EVENT, data)
    }
}
