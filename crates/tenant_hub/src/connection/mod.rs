//! Connection management for client connections.
//!
//! This module handles the lifecycle of client connections: the per-connection
//! record, the registry indexing connections by id, tenant and browser
//! session, and the emitter used to push events back to a single client.

pub mod client;
pub mod cookies;
pub mod registry;
pub mod response;

pub use client::Connection;
pub use cookies::parse_cookie_header;
pub use registry::ConnectionRegistry;
pub use response::{ConnectionEmitter, DebugLog};

use tokio::sync::mpsc;

use crate::messaging::HubMessage;

/// Connection identifiers are assigned by the hub in arrival order, which is
/// also the order used for tenant fan-out and roster computation.
pub type ConnectionId = u64;

/// Outbound half of a connection: every event for the client goes through it.
pub type ConnectionSender = mpsc::UnboundedSender<HubMessage>;

/// Receiving end paired with a [`ConnectionSender`], drained by the transport.
pub type ConnectionReceiver = mpsc::UnboundedReceiver<HubMessage>;

/// Creates the outbound channel of a new connection.
pub fn outbound_channel() -> (ConnectionSender, ConnectionReceiver) {
    mpsc::unbounded_channel()
}
