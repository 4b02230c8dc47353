//! Configuration management for the hub server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tenant_hub::HubConfig;
use tracing::info;

use crate::cli::CliArgs;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Cookie and naming settings
    #[serde(default)]
    pub session: SessionSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Tenants served by the built-in content provider
    #[serde(default)]
    pub tenants: Vec<TenantSettings>,
    /// Login tokens accepted by the built-in verifier, token to username
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

/// Network binding and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Root host (e.g., "example.com"); unset means "the first label is the tenant"
    #[serde(default)]
    pub root_host: Option<String>,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Tick rate of game loops
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,
}

fn default_max_connections() -> usize {
    1000
}

fn default_ticks_per_second() -> u32 {
    tenant_hub::TICKS_PER_SECOND
}

/// Cookie names and anonymous naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Cookie grouping the tabs of one browser
    pub cookie_name: String,
    /// Cookie carrying the previous connection id of a tab
    pub reconnect_cookie: String,
    /// Cookie carrying the login token
    pub token_cookie: String,
    /// Suffix of generated anonymous names
    pub anonymous_suffix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            cookie_name: hub.session_cookie,
            reconnect_cookie: hub.reconnect_cookie,
            token_cookie: "token".to_string(),
            anonymous_suffix: hub.anonymous_suffix,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

/// Built-in demo backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Replies to `echo` and rebroadcasts `shout`
    Echo,
    /// Counts ticks of its game loops
    Ticker,
}

/// One tenant of the built-in content provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Subdomain; `#` is the root tenant
    pub subdomain: String,
    /// Username allowed to run owner commands
    #[serde(default)]
    pub owner: Option<String>,
    /// Display title sent in the `connected` payload
    #[serde(default)]
    pub title: Option<String>,
    /// Backend served to this tenant, none for chat only
    #[serde(default)]
    pub backend: Option<BackendKind>,
    /// Start the `main` loop as soon as the backend is built
    #[serde(default)]
    pub autostart: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                root_host: None,
                max_connections: default_max_connections(),
                ticks_per_second: default_ticks_per_second(),
            },
            session: SessionSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            tenants: vec![
                TenantSettings {
                    subdomain: "echo".to_string(),
                    owner: Some("admin".to_string()),
                    title: Some("Echo".to_string()),
                    backend: Some(BackendKind::Echo),
                    autostart: false,
                },
                TenantSettings {
                    subdomain: "ticker".to_string(),
                    owner: Some("admin".to_string()),
                    title: Some("Ticker".to_string()),
                    backend: Some(BackendKind::Ticker),
                    autostart: true,
                },
            ],
            tokens: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration is written to
    /// `path` and returned.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(root_host) = &args.root_host {
            self.server.root_host = Some(root_host.clone());
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts to the hub's own configuration.
    pub fn to_hub_config(&self) -> anyhow::Result<HubConfig> {
        Ok(HubConfig {
            bind_address: self
                .server
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address: {}", self.server.bind_address))?,
            root_host: self.server.root_host.clone(),
            session_cookie: self.session.cookie_name.clone(),
            reconnect_cookie: self.session.reconnect_cookie.clone(),
            anonymous_suffix: self.session.anonymous_suffix.clone(),
            max_connections: self.server.max_connections,
            ticks_per_second: self.server.ticks_per_second,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        let hub = self.to_hub_config().map_err(|e| e.to_string())?;
        hub.validate().map_err(|e| e.to_string())?;

        if self.session.token_cookie.is_empty() {
            return Err("token_cookie cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if tenant.subdomain.is_empty() || tenant.subdomain.contains('.') {
                return Err(format!("Invalid tenant subdomain: '{}'", tenant.subdomain));
            }
            if !seen.insert(tenant.subdomain.as_str()) {
                return Err(format!("Tenant '{}' is configured twice", tenant.subdomain));
            }
            if tenant.autostart && tenant.backend.is_none() {
                return Err(format!(
                    "Tenant '{}' sets autostart without a backend",
                    tenant.subdomain
                ));
            }
        }

        Ok(())
    }
}
