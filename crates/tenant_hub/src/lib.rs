//! # Tenant Hub - Multi-tenant Real-time Infrastructure
//!
//! One WebSocket server hosting many independent tenants. A tenant is a
//! subdomain: every connection made to `foo.example.com` belongs to tenant
//! `foo`, and connections without a subdomain belong to the root tenant `#`.
//!
//! ## What a tenant gets
//!
//! * **A backend** - pluggable business logic built lazily from a
//!   [`ContentProvider`], cached, and rebuilt on demand
//! * **Game loops** - named 30 Hz update loops driven by the [`TickScheduler`]
//! * **A chat log** - messages broadcast to the tenant and replayed to newcomers
//! * **A roster** - the names currently present, rebroadcast on every change
//!
//! ## Connection lifecycle
//!
//! 1. The handshake carries the `Host` header (tenant) and cookies (browser
//!    session and reconnection token)
//! 2. The identity is resolved through the [`TokenVerifier`]; unverified users
//!    get a memoized anonymous name
//! 3. The client receives `connected`, `whoami`, `roster` and the chat replay
//! 4. The tenant backend's hooks are wired onto the connection
//! 5. Frames `{ "event", "data" }` are routed to the built-in `message` and
//!    `command` handlers and then to the backend hooks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_hub::{HubConfig, HubServer, NoAuth, StaticContentProvider};
//!
//! # async fn run() -> Result<(), tenant_hub::HubError> {
//! let content = Arc::new(StaticContentProvider::new());
//! let server = HubServer::new(HubConfig::default(), content, Arc::new(NoAuth));
//! server.start().await
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! All shared state lives in concurrent maps (`dashmap`) or behind short
//! synchronous locks (`parking_lot`) that are never held across an `.await`.
//! Backends, content providers and token verifiers must be `Send + Sync`.

pub mod backend;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod identity;
pub mod messaging;
pub mod roster;
pub mod scheduler;
pub mod server;
pub mod subdomain;
pub mod tenant;

use std::sync::Arc;

// Re-export core types and functions for easy access
pub use backend::{
    Backend, BackendFactory, BackendLog, BackendManager, CommonExports, ContentProvider,
    DisconnectInfo, ExportKind, Exports, HookContext, HookUser, LoopControl, SocketHook,
    StaticContentProvider, TenantBroadcaster, TenantResources, MAIN_LOOP_TAG,
};
pub use config::{HubConfig, TICKS_PER_SECOND};
pub use connection::{ConnectionEmitter, ConnectionId, DebugLog};
pub use error::{BackendError, ContentLoadError, HubError};
pub use hub::{ConnectRequest, SocketHub};
pub use identity::{AuthUser, NameGenerator, NoAuth, TokenVerifier, WordNamer};
pub use messaging::HubMessage;
pub use scheduler::{LoopOutcome, TickScheduler};
pub use server::HubServer;
pub use tenant::{ChatMessage, TenantInfo, TenantKey, ROOT_TENANT};

/// Creates a hub over `content` where every user is anonymous.
pub fn create_hub(config: HubConfig, content: Arc<dyn ContentProvider>) -> Arc<SocketHub> {
    Arc::new(SocketHub::new(config, content, Arc::new(NoAuth)))
}
