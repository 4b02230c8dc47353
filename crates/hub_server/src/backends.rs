//! Demo backends shipped with the server.

use std::sync::Arc;

use serde_json::{json, Value};
use tenant_hub::{
    Backend, BackendError, BackendFactory, DebugLog, DisconnectInfo, HookContext, SocketHook,
    TenantResources, TICKS_PER_SECOND,
};
use tracing::debug;

use crate::config::BackendKind;

/// Factory for the backend of `kind`.
pub fn factory(kind: BackendKind, autostart: bool) -> Arc<dyn BackendFactory> {
    match kind {
        BackendKind::Echo => Arc::new(
            |resources: TenantResources| -> Result<Arc<dyn Backend>, BackendError> {
                Ok(Arc::new(EchoBackend { resources }))
            },
        ),
        BackendKind::Ticker => Arc::new(
            move |resources: TenantResources| -> Result<Arc<dyn Backend>, BackendError> {
                Ok(Arc::new(TickerBackend {
                    resources,
                    autostart,
                }))
            },
        ),
    }
}

/// Replies to `echo` on the calling connection and rebroadcasts `shout` to
/// the whole tenant.
pub struct EchoBackend {
    resources: TenantResources,
}

impl Backend for EchoBackend {
    fn disconnect_connection(&self, info: DisconnectInfo) {
        self.resources
            .log
            .log(json!({ "left": info.connection_id, "session": info.session_cookie }));
    }

    fn socket_hooks(&self, debug_log: DebugLog) -> Vec<SocketHook> {
        let broadcast = self.resources.broadcast.clone();
        vec![
            SocketHook::new("echo", move |ctx: HookContext| {
                let debug_log = debug_log.clone();
                async move {
                    if ctx.data_in.is_null() {
                        debug_log.log(Value::from("nothing to echo"));
                    } else {
                        ctx.emit.emit("echo", ctx.data_in);
                    }
                    Ok(())
                }
            }),
            SocketHook::new("shout", move |ctx: HookContext| {
                let broadcast = broadcast.clone();
                async move {
                    broadcast.emit(
                        "shout",
                        json!({ "from": ctx.user.username, "data": ctx.data_in }),
                    );
                    Ok(())
                }
            }),
        ]
    }
}

/// Counts the ticks of each of its loops in the tenant cache and announces
/// every full second to the tenant.
pub struct TickerBackend {
    resources: TenantResources,
    autostart: bool,
}

fn ticks_key(tag: &str) -> String {
    format!("ticks:{tag}")
}

impl Backend for TickerBackend {
    fn has_update(&self) -> bool {
        true
    }

    fn start_loop_immediately(&self) -> bool {
        self.autostart
    }

    fn update(&self, elapsed_ms: f64, tag: &str) -> Result<(), BackendError> {
        let count = {
            let mut entry = self
                .resources
                .cache
                .entry(ticks_key(tag))
                .or_insert(Value::from(0u64));
            let count = entry.as_u64().unwrap_or(0) + 1;
            *entry = Value::from(count);
            count
        };

        if count % u64::from(TICKS_PER_SECOND) == 0 {
            debug!("[{}] loop '{}' reached {} ticks", self.resources.tenant, tag, count);
            self.resources.broadcast.emit(
                "tick",
                json!({ "tag": tag, "ticks": count, "elapsed_ms": elapsed_ms }),
            );
        }
        Ok(())
    }

    fn socket_hooks(&self, _debug_log: DebugLog) -> Vec<SocketHook> {
        let cache = self.resources.cache.clone();
        vec![SocketHook::new("ticks", move |ctx: HookContext| {
            let tag = ctx.data_in.as_str().unwrap_or(tenant_hub::MAIN_LOOP_TAG).to_string();
            let count = cache
                .get(&ticks_key(&tag))
                .map(|value| value.clone())
                .unwrap_or(Value::from(0u64));
            async move {
                ctx.emit.emit("ticks", json!({ "tag": tag, "ticks": count }));
                Ok(())
            }
        })]
    }
}
