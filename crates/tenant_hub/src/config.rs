//! Hub configuration types and defaults.
//!
//! This module contains the configuration structure used to initialize the
//! hub: where to listen, how to derive tenants from the request host, and
//! which cookies carry the browser session and the reconnection token.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::HubError;

/// Tick rate of every scheduled loop, in ticks per second.
pub const TICKS_PER_SECOND: u32 = 30;

/// Configuration structure for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// The socket address to bind the WebSocket listener to
    pub bind_address: SocketAddr,

    /// Root host (e.g. `example.com`). When `None`, the tenant is whatever
    /// precedes the first `.` of the request host.
    pub root_host: Option<String>,

    /// Name of the application cookie grouping the tabs of one browser
    pub session_cookie: String,

    /// Name of the cookie carrying the id of the previous connection of the
    /// same tab; the server sets it on every handshake response
    pub reconnect_cookie: String,

    /// Suffix appended to generated anonymous names
    pub anonymous_suffix: String,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Number of ticks per second for scheduled loops
    pub ticks_per_second: u32,
}

impl HubConfig {
    /// Period between two ticks of a scheduled loop.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.ticks_per_second.max(1)))
    }

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.session_cookie.is_empty() {
            return Err(HubError::Config("session_cookie cannot be empty".to_string()));
        }
        if self.reconnect_cookie.is_empty() {
            return Err(HubError::Config("reconnect_cookie cannot be empty".to_string()));
        }
        if self.session_cookie == self.reconnect_cookie {
            return Err(HubError::Config(
                "session_cookie and reconnect_cookie must differ".to_string(),
            ));
        }
        if self.anonymous_suffix.is_empty() {
            return Err(HubError::Config("anonymous_suffix cannot be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(HubError::Config("max_connections must be greater than 0".to_string()));
        }
        if self.ticks_per_second == 0 {
            return Err(HubError::Config("ticks_per_second must be greater than 0".to_string()));
        }
        if matches!(&self.root_host, Some(host) if host.is_empty() || host.starts_with('.')) {
            return Err(HubError::Config("root_host must be a bare host name".to_string()));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            root_host: None,
            session_cookie: "tenant_hub".to_string(),
            reconnect_cookie: "io".to_string(),
            anonymous_suffix: "_?".to_string(),
            max_connections: 1000,
            ticks_per_second: TICKS_PER_SECOND,
        }
    }
}
