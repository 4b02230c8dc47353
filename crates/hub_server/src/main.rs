//! Main application entry point for the tenant hub server
//!
//! Loads the TOML configuration (CLI flags override it), sets up logging,
//! registers the configured tenants and serves WebSocket connections until a
//! termination signal arrives.

mod auth;
mod backends;
mod cli;
mod config;
mod content;
mod logging;
mod signals;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tenant_hub::HubServer;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::auth::TokenTable;
use crate::cli::CliArgs;
use crate::config::AppConfig;

/// How long the accept loop gets to wind down after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Main application struct.
pub struct Application {
    config: AppConfig,
    server: Arc<HubServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;
        display_banner();

        let hub_config = config.to_hub_config()?;
        let content = Arc::new(content::content_from_config(&config.tenants));
        let verifier = Arc::new(TokenTable::new(
            config.session.token_cookie.clone(),
            config.tokens.clone(),
        ));
        info!(
            "📂 Config: {} | Tenants: {} | Tokens: {}",
            args.config_path.display(),
            config.tenants.len(),
            verifier.len()
        );

        let server = Arc::new(HubServer::new(hub_config, content, verifier));
        Ok(Self { config, server })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  🏷️ Root host: {}",
            self.config.server.root_host.as_deref().unwrap_or("(first label)")
        );
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⏱️ Tick rate: {}/s", self.config.server.ticks_per_second);

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");
        let finished_early =
            run_until(signals::wait_for_shutdown_signal(), &mut server_handle).await?;

        self.server.shutdown().await?;
        let joined = match finished_early {
            Some(joined) => joined,
            None => match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("⏳ Server did not stop within {:?}", SHUTDOWN_GRACE);
                    return Ok(());
                }
            },
        };
        match joined {
            Ok(Ok(())) => info!("✅ Tenant hub shutdown complete"),
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => return Err(anyhow!("server task failed: {e}")),
        }
        Ok(())
    }
}

/// Waits for `shutdown` or for the server task, whichever comes first.
///
/// Returns the task's result when the server stopped on its own, which only
/// happens when it failed to start, and `None` once a shutdown was requested.
async fn run_until<T>(
    shutdown: impl Future<Output = anyhow::Result<()>>,
    server_handle: &mut JoinHandle<T>,
) -> anyhow::Result<Option<Result<T, JoinError>>> {
    tokio::select! {
        result = shutdown => {
            result?;
            info!("🛑 Shutdown signal received, initiating graceful shutdown...");
            Ok(None)
        }
        joined = server_handle => Ok(Some(joined)),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║               🌐 TENANT HUB              ║");
    info!("║                  v{:<8}               ║", version);
    info!("║                                          ║");
    info!("║  One socket server, many subdomains      ║");
    info!("║  Per-tenant backends and game loops      ║");
    info!("╚══════════════════════════════════════════╝");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_server_ends_the_wait() {
        let mut handle = tokio::spawn(async { Err::<(), _>("bind failed") });
        let joined = run_until(std::future::pending(), &mut handle).await.unwrap();
        assert_eq!(joined.unwrap().unwrap(), Err("bind failed"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_leaves_server_running() {
        let mut handle = tokio::spawn(std::future::pending::<()>());
        let joined = run_until(async { Ok(()) }, &mut handle).await.unwrap();
        assert!(joined.is_none());
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_signal_error_propagates() {
        let mut handle = tokio::spawn(std::future::pending::<()>());
        let result = run_until(async { Err(anyhow!("no signal handler")) }, &mut handle).await;
        assert!(result.is_err());
        handle.abort();
    }
}
