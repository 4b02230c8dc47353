//! Message routing logic for dispatching client frames into the hub.

use tracing::{debug, trace};

use crate::connection::ConnectionId;
use crate::error::HubError;
use crate::hub::SocketHub;
use crate::messaging::HubMessage;

/// Routes a raw text frame from a client.
///
/// The frame is parsed as a [`HubMessage`] and handed to
/// [`SocketHub::handle_event`], which runs the built-in handling for the
/// event and then every backend hook wired for it on this connection.
///
/// # Errors
///
/// Returns [`HubError::Network`] when the frame is not a valid message.
/// Failures inside hooks are reported to the client and never surface here.
pub async fn route_client_message(
    text: &str,
    connection_id: ConnectionId,
    hub: &SocketHub,
) -> Result<(), HubError> {
    let message: HubMessage = serde_json::from_str(text)
        .map_err(|e| HubError::Network(format!("Invalid JSON: {e}")))?;

    debug!(
        "📨 Routing '{}' from connection {}",
        message.event, connection_id
    );

    hub.handle_event(connection_id, &message.event, message.data)
        .await;

    trace!("✅ Routed '{}' from connection {}", message.event, connection_id);
    Ok(())
}
