//! Per-connection WebSocket handling.
//!
//! The handshake captures the `Host` and `Cookie` headers and answers with
//! the reconnection cookie carrying the new connection id. After that a
//! writer task drains the connection's outbound channel into text frames
//! while the read loop routes incoming frames through the hub.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{COOKIE, HOST, SET_COOKIE};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::connection::outbound_channel;
use crate::error::HubError;
use crate::hub::{ConnectRequest, SocketHub};
use crate::messaging::route_client_message;

/// Serves one client from handshake to close.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<SocketHub>,
) -> Result<(), HubError> {
    let limit = hub.config().max_connections;
    if hub.connection_count() >= limit {
        warn!("Rejecting {}: connection limit of {} reached", addr, limit);
        return Ok(());
    }

    let connection_id = hub.allocate_connection_id();
    let reconnect_cookie = format!("{}={}; Path=/", hub.config().reconnect_cookie, connection_id);

    let mut host = None;
    let mut cookie_header = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        host = header_value(request, HOST.as_str());
        cookie_header = header_value(request, COOKIE.as_str());
        if let Ok(value) = HeaderValue::from_str(&reconnect_cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| HubError::Network(format!("WebSocket handshake failed for {addr}: {e}")))?;
    info!("Connection {} established from {}", connection_id, addr);

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let (sender, mut outbound) = outbound_channel();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize '{}' frame: {}", message.event, e);
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    hub.connect(ConnectRequest {
        id: connection_id,
        host,
        cookie_header,
        sender,
    })
    .await;

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = route_client_message(text.as_str(), connection_id, &hub).await {
                    warn!("Dropping frame from connection {}: {}", connection_id, e);
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Connection {} requested close", connection_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                warn!("Received unsupported message type from {}", connection_id);
            }
            Err(e) => {
                error!("WebSocket error for connection {}: {}", connection_id, e);
                break;
            }
        }
    }

    hub.disconnect(connection_id);
    writer.abort();
    info!("Connection {} from {} closed", connection_id, addr);
    Ok(())
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
