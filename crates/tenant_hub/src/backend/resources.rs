//! Services injected into a backend at construction.
//!
//! Every handle here is bound to one tenant. Handles that point back into
//! hub-owned structures hold weak references, so a backend stored inside a
//! [`Tenant`] never keeps the registry, scheduler or tenant alive on its own.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::warn;

use super::CommonExports;
use crate::connection::ConnectionRegistry;
use crate::messaging::MESSAGE_EVENT;
use crate::scheduler::{LoopOutcome, TickScheduler};
use crate::tenant::{Tenant, TenantCache, TenantKey};

/// The resource bundle handed to a backend factory.
#[derive(Clone)]
pub struct TenantResources {
    pub tenant: TenantKey,
    /// Fan-out to every connection of the tenant
    pub broadcast: TenantBroadcaster,
    /// Start and stop the tenant's loops
    pub game_loop: LoopControl,
    /// Persistent key-value cache, kept across rebuilds
    pub cache: TenantCache,
    /// Sink feeding the tenant's `game-logs` ring
    pub log: BackendLog,
    pub common: CommonExports,
    /// Tenant configuration document from the content provider
    pub storming: Value,
}

impl TenantResources {
    pub(crate) fn new(
        tenant: &Arc<Tenant>,
        connections: &Arc<ConnectionRegistry>,
        scheduler: &Arc<TickScheduler>,
        common: CommonExports,
        storming: Value,
    ) -> Self {
        let key = tenant.key().clone();
        Self {
            broadcast: TenantBroadcaster {
                tenant: key.clone(),
                connections: Arc::downgrade(connections),
            },
            game_loop: LoopControl {
                tenant: key.clone(),
                scheduler: Arc::downgrade(scheduler),
            },
            cache: tenant.cache().clone(),
            log: BackendLog {
                tenant: Arc::downgrade(tenant),
            },
            common,
            storming,
            tenant: key,
        }
    }
}

/// Broadcast function bound to one tenant.
#[derive(Clone, Debug)]
pub struct TenantBroadcaster {
    tenant: TenantKey,
    connections: Weak<ConnectionRegistry>,
}

impl TenantBroadcaster {
    /// Sends `data` as a `message` event to the whole tenant.
    pub fn send(&self, data: Value) -> usize {
        self.emit(MESSAGE_EVENT, data)
    }

    /// Sends `data` under a custom event name to the whole tenant.
    pub fn emit(&self, event: &str, data: Value) -> usize {
        match self.connections.upgrade() {
            Some(connections) => connections.broadcast(event, &data, &self.tenant),
            None => 0,
        }
    }
}

/// Loop control bound to one tenant.
#[derive(Clone, Debug)]
pub struct LoopControl {
    tenant: TenantKey,
    scheduler: Weak<TickScheduler>,
}

impl LoopControl {
    pub fn start(&self, tag: &str) -> LoopOutcome {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.start(&self.tenant, tag),
            None => {
                warn!("[{}] Scheduler gone, cannot start '{}'", self.tenant, tag);
                LoopOutcome::failure(&self.tenant, "scheduler stopped", Some(tag))
            }
        }
    }

    pub fn stop(&self, tag: &str) -> LoopOutcome {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.stop(&self.tenant, tag),
            None => LoopOutcome::failure(&self.tenant, "no such game loop", Some(tag)),
        }
    }
}

/// Log sink prepending into the tenant's bounded ring.
#[derive(Clone, Debug)]
pub struct BackendLog {
    tenant: Weak<Tenant>,
}

impl BackendLog {
    pub fn log(&self, line: impl Into<Value>) {
        if let Some(tenant) = self.tenant.upgrade() {
            tenant.logs().push(line.into());
        }
    }
}
