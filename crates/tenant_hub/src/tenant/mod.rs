//! Per-tenant state and the registry holding it.
//!
//! A tenant is created implicitly the first time its subdomain is referenced
//! and lives for the rest of the process. It owns everything scoped to one
//! subdomain: the cached backend instance, the key-value cache handed to that
//! backend, the chat log, the backend log ring and the metadata fetched from
//! the content provider.
//!
//! The registry is an explicit value shared through `Arc`; nothing here is
//! global.

mod log_ring;

pub use log_ring::{LogRing, LOG_RING_CAPACITY};

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::Backend;

/// Key of the root tenant, used when a host carries no subdomain.
pub const ROOT_TENANT: &str = "#";

/// Opaque tenant identifier (the subdomain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(subdomain: impl Into<String>) -> Self {
        Self(subdomain.into())
    }

    /// The reserved key for connections without a subdomain.
    pub fn root() -> Self {
        Self(ROOT_TENANT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_TENANT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Tenant metadata supplied by the content provider.
///
/// Sent to every connection of the tenant as the `connected` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub subdomain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Display information and anything else the provider attaches
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TenantInfo {
    /// Minimal metadata: just the subdomain, no owner.
    pub fn new(tenant: &TenantKey) -> Self {
        Self {
            subdomain: tenant.as_str().to_string(),
            owner: None,
            extra: Map::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// A chat line, stored in the tenant log and replayed to newcomers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub text: String,
}

/// Key-value cache scoped to one tenant and shared with its backend.
///
/// Created once per tenant and reused across backend rebuilds.
pub type TenantCache = Arc<DashMap<String, Value>>;

/// State owned by one tenant.
pub struct Tenant {
    key: TenantKey,
    info: RwLock<Option<TenantInfo>>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    build_lock: tokio::sync::Mutex<()>,
    cache: TenantCache,
    messages: Mutex<Vec<ChatMessage>>,
    logs: LogRing,
}

impl Tenant {
    fn new(key: TenantKey) -> Self {
        Self {
            key,
            info: RwLock::new(None),
            backend: RwLock::new(None),
            build_lock: tokio::sync::Mutex::new(()),
            cache: Arc::new(DashMap::new()),
            messages: Mutex::new(Vec::new()),
            logs: LogRing::new(),
        }
    }

    pub fn key(&self) -> &TenantKey {
        &self.key
    }

    pub fn info(&self) -> Option<TenantInfo> {
        self.info.read().clone()
    }

    pub fn set_info(&self, info: TenantInfo) {
        *self.info.write() = Some(info);
    }

    /// Forgets the cached metadata so the next connection refetches it.
    pub fn clear_info(&self) {
        *self.info.write() = None;
    }

    /// Owner identity from the cached metadata, if any.
    pub fn owner(&self) -> Option<String> {
        self.info.read().as_ref().and_then(|info| info.owner.clone())
    }

    pub fn cached_backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.read().clone()
    }

    pub(crate) fn store_backend(&self, backend: Arc<dyn Backend>) {
        *self.backend.write() = Some(backend);
    }

    pub(crate) fn evict_backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.write().take()
    }

    /// Lock serializing backend construction for this tenant.
    pub(crate) fn build_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.build_lock
    }

    pub fn cache(&self) -> &TenantCache {
        &self.cache
    }

    pub fn logs(&self) -> &LogRing {
        &self.logs
    }

    /// Appends a message to the log and hands it to `deliver` while the log
    /// is still locked, so delivery order matches append order.
    pub fn record_message<F>(&self, message: ChatMessage, deliver: F)
    where
        F: FnOnce(&ChatMessage),
    {
        let mut messages = self.messages.lock();
        messages.push(message);
        if let Some(stored) = messages.last() {
            deliver(stored);
        }
    }

    /// Runs `f` over the message log while holding it, so no message can be
    /// appended (and delivered) until `f` returns.
    pub fn with_message_log<R>(&self, f: impl FnOnce(&[ChatMessage]) -> R) -> R {
        let messages = self.messages.lock();
        f(&messages)
    }

    /// The message log in append order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("key", &self.key)
            .field("info", &*self.info.read())
            .field("has_backend", &self.backend.read().is_some())
            .field("messages", &self.messages.lock().len())
            .field("logs", &self.logs.len())
            .finish()
    }
}

/// Process-wide map of tenants.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<TenantKey, Arc<Tenant>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tenant, creating it on first reference.
    pub fn get_or_create(&self, key: &TenantKey) -> Arc<Tenant> {
        if let Some(tenant) = self.tenants.get(key) {
            return tenant.clone();
        }
        self.tenants
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Tenant::new(key.clone())))
            .clone()
    }

    pub fn get(&self, key: &TenantKey) -> Option<Arc<Tenant>> {
        self.tenants.get(key).map(|tenant| tenant.clone())
    }

    pub fn keys(&self) -> Vec<TenantKey> {
        let mut keys: Vec<_> = self.tenants.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
