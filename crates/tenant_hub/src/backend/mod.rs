//! Pluggable per-tenant backends.
//!
//! A backend is the business logic of one tenant. The hub never knows what a
//! backend does; it only sees the [`Backend`] trait:
//!
//! * **Hooks**: every connection of the tenant gets the backend's
//!   [`SocketHook`]s wired on, one per custom event name
//! * **Updates**: backends with `has_update` can be driven by named 30 Hz loops
//! * **Disconnects**: an optional notification when a connection goes away
//!
//! Backends are produced by a [`BackendFactory`] resolved through the
//! [`ContentProvider`] and are handed a [`TenantResources`] bundle at
//! construction. The [`BackendManager`] owns their lifecycle.

pub mod content;
pub mod manager;
pub mod resources;

pub use content::{
    BackendFactory, CommonExports, ContentProvider, ExportKind, Exports, StaticContentProvider,
};
pub use manager::BackendManager;
pub use resources::{BackendLog, LoopControl, TenantBroadcaster, TenantResources};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::connection::{ConnectionEmitter, ConnectionId, DebugLog};
use crate::error::BackendError;

/// Tag of the loop started automatically for `start_loop_immediately` backends.
pub const MAIN_LOOP_TAG: &str = "main";

/// The contract every tenant backend implements.
pub trait Backend: Send + Sync + 'static {
    /// Whether [`Backend::update`] is implemented. Loops can only be started
    /// for backends that return `true`.
    fn has_update(&self) -> bool {
        false
    }

    /// Called on every tick of a running loop with the milliseconds elapsed
    /// since the previous tick and the loop's tag.
    ///
    /// Returning an error ends that loop only.
    fn update(&self, _elapsed_ms: f64, _tag: &str) -> Result<(), BackendError> {
        Ok(())
    }

    /// Start the `main` loop right after construction.
    fn start_loop_immediately(&self) -> bool {
        false
    }

    /// Notified after a connection of the tenant has been removed.
    fn disconnect_connection(&self, _info: DisconnectInfo) {}

    /// The hooks to wire onto a new connection. `debug_log` reaches only that
    /// connection.
    fn socket_hooks(&self, debug_log: DebugLog) -> Vec<SocketHook>;
}

/// Passed to [`Backend::disconnect_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectInfo {
    pub session_cookie: String,
    pub connection_id: ConnectionId,
}

/// Identity of the connection a hook runs for, resolved at event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookUser {
    pub username: String,
    pub is_anonymous: bool,
    pub session_id: String,
}

/// Everything a hook invocation receives.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Emits events back to the originating connection only
    pub emit: ConnectionEmitter,
    /// Payload of the triggering event
    pub data_in: Value,
    pub connection_id: ConnectionId,
    pub user: HookUser,
}

type HookFn = dyn Fn(HookContext) -> BoxFuture<'static, Result<(), BackendError>> + Send + Sync;

/// A handler for one client event name.
#[derive(Clone)]
pub struct SocketHook {
    on: String,
    run: Arc<HookFn>,
}

impl SocketHook {
    /// Creates a hook for event `on`.
    ///
    /// ```rust,ignore
    /// SocketHook::new("ping", |ctx| async move {
    ///     ctx.emit.emit("pong", ctx.data_in);
    ///     Ok(())
    /// })
    /// ```
    pub fn new<F, Fut>(on: impl Into<String>, run: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BackendError>> + Send + 'static,
    {
        Self {
            on: on.into(),
            run: Arc::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    pub fn event(&self) -> &str {
        &self.on
    }

    pub fn run(&self, ctx: HookContext) -> BoxFuture<'static, Result<(), BackendError>> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for SocketHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHook").field("on", &self.on).finish_non_exhaustive()
    }
}

/// Renders a caught panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
