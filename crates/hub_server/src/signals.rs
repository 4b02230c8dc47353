//! Termination signals for the hub binary.
//!
//! [`wait_for_shutdown_signal`] is one half of the select in
//! `Application::run`. When it resolves, the application calls
//! `HubServer::shutdown`, which stops every tenant's game loops, closes the
//! accept loop and lets open sockets drain within the shutdown grace period.

use tokio::signal;
use tracing::info;

/// Resolves with the first termination signal: SIGINT or SIGTERM on Unix,
/// Ctrl+C elsewhere. Errors only if a handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let received = termination().await?;
    info!("📡 Received {}, stopping tenant hub", received);
    Ok(())
}

#[cfg(unix)]
async fn termination() -> std::io::Result<&'static str> {
    use signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let received = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    Ok(received)
}

#[cfg(not(unix))]
async fn termination() -> std::io::Result<&'static str> {
    signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
