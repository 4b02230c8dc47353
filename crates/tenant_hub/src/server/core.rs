//! Core hub server implementation.
//!
//! [`HubServer`] binds the listener, accepts TCP connections and hands each
//! one to [`handle_connection`] on its own task. It runs until a shutdown is
//! requested, then stops every running loop of the hub.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::backend::ContentProvider;
use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::SocketHub;
use crate::identity::TokenVerifier;
use crate::server::handlers::handle_connection;

/// The WebSocket front of a [`SocketHub`].
pub struct HubServer {
    hub: Arc<SocketHub>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl HubServer {
    /// Creates a server and the hub behind it.
    pub fn new(
        config: HubConfig,
        content: Arc<dyn ContentProvider>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self::from_hub(Arc::new(SocketHub::new(config, content, verifier)))
    }

    /// Serves an existing hub.
    pub fn from_hub(hub: Arc<SocketHub>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            hub,
            shutdown_sender,
        }
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] for an invalid configuration and
    /// [`HubError::Network`] when the address cannot be bound.
    pub async fn start(&self) -> Result<(), HubError> {
        let config = self.hub.config();
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| HubError::Network(format!("Bind failed: {e}")))?;
        info!("🚀 Tenant hub listening on {}", config.bind_address);

        self.serve(listener).await
    }

    /// Accepts connections from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), HubError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let hub = self.hub.clone();

        let accept_loop = async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let hub = hub.clone();

                        // Spawn individual connection handler
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, hub).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_receiver.recv() => {
                info!("Shutdown signal received");
            }
        }

        info!("🧹 Performing hub cleanup...");
        self.hub.shutdown();
        info!("Server stopped");
        Ok(())
    }

    /// Signals the accept loop to stop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn hub(&self) -> Arc<SocketHub> {
        self.hub.clone()
    }
}
