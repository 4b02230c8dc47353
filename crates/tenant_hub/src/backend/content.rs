//! Where backend code and tenant metadata come from.
//!
//! The hub asks a [`ContentProvider`] for two kinds of exports per tenant:
//! the `common` exports shared with the backend as opaque data, and the
//! `backend` exports, a factory constructing the backend itself. Metadata
//! (`info`) and the tenant configuration document (`storming`) come from the
//! same provider.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Backend, TenantResources};
use crate::error::{BackendError, ContentLoadError};
use crate::tenant::{TenantInfo, TenantKey};

/// Which export set is requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Common,
    Backend,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKind::Common => f.write_str("common"),
            ExportKind::Backend => f.write_str("backend"),
        }
    }
}

/// Opaque values shared between a tenant's front-end and backend code.
pub type CommonExports = Arc<dyn Any + Send + Sync>;

/// Constructs a backend instance from its resource bundle.
pub trait BackendFactory: Send + Sync {
    fn create(&self, resources: TenantResources) -> Result<Arc<dyn Backend>, BackendError>;
}

impl<F> BackendFactory for F
where
    F: Fn(TenantResources) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync,
{
    fn create(&self, resources: TenantResources) -> Result<Arc<dyn Backend>, BackendError> {
        self(resources)
    }
}

/// One loaded export set.
#[derive(Clone)]
pub enum Exports {
    Common(CommonExports),
    Backend(Arc<dyn BackendFactory>),
}

impl Exports {
    pub fn kind(&self) -> ExportKind {
        match self {
            Exports::Common(_) => ExportKind::Common,
            Exports::Backend(_) => ExportKind::Backend,
        }
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exports::{}", self.kind())
    }
}

/// Source of per-tenant code and metadata.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// An override consulted before [`ContentProvider::exports`].
    async fn alternate_content(
        &self,
        _tenant: &TenantKey,
        _kind: ExportKind,
    ) -> Result<Option<Exports>, ContentLoadError> {
        Ok(None)
    }

    async fn exports(&self, tenant: &TenantKey, kind: ExportKind)
        -> Result<Exports, ContentLoadError>;

    /// Tenant metadata. Defaults to just the subdomain.
    async fn info(&self, tenant: &TenantKey) -> Result<TenantInfo, ContentLoadError> {
        Ok(TenantInfo::new(tenant))
    }

    /// Tenant configuration document. `refresh_cache` asks the provider to
    /// bypass whatever it cached.
    async fn storming(
        &self,
        _tenant: &TenantKey,
        _refresh_cache: bool,
    ) -> Result<Value, ContentLoadError> {
        Ok(Value::Null)
    }
}

/// In-memory provider populated up front.
///
/// Tenants with no registered common exports get an empty `()` value;
/// tenants with no registered backend fail with
/// [`ContentLoadError::MissingExports`].
#[derive(Default)]
pub struct StaticContentProvider {
    backends: DashMap<TenantKey, Arc<dyn BackendFactory>>,
    alternates: DashMap<TenantKey, Arc<dyn BackendFactory>>,
    common: DashMap<TenantKey, CommonExports>,
    info: DashMap<TenantKey, TenantInfo>,
    storming: DashMap<TenantKey, Value>,
}

impl StaticContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_backend(&self, tenant: TenantKey, factory: Arc<dyn BackendFactory>) {
        self.backends.insert(tenant, factory);
    }

    /// A backend served in place of the registered one.
    pub fn register_alternate_backend(&self, tenant: TenantKey, factory: Arc<dyn BackendFactory>) {
        self.alternates.insert(tenant, factory);
    }

    pub fn remove_alternate_backend(&self, tenant: &TenantKey) -> bool {
        self.alternates.remove(tenant).is_some()
    }

    pub fn register_common(&self, tenant: TenantKey, common: CommonExports) {
        self.common.insert(tenant, common);
    }

    pub fn register_info(&self, info: TenantInfo) {
        self.info.insert(TenantKey::new(info.subdomain.clone()), info);
    }

    pub fn register_storming(&self, tenant: TenantKey, storming: Value) {
        self.storming.insert(tenant, storming);
    }

    pub fn tenant_count(&self) -> usize {
        self.backends.len()
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    async fn alternate_content(
        &self,
        tenant: &TenantKey,
        kind: ExportKind,
    ) -> Result<Option<Exports>, ContentLoadError> {
        if kind != ExportKind::Backend {
            return Ok(None);
        }
        Ok(self
            .alternates
            .get(tenant)
            .map(|factory| Exports::Backend(factory.clone())))
    }

    async fn exports(
        &self,
        tenant: &TenantKey,
        kind: ExportKind,
    ) -> Result<Exports, ContentLoadError> {
        match kind {
            ExportKind::Common => Ok(Exports::Common(
                self.common
                    .get(tenant)
                    .map(|common| common.clone())
                    .unwrap_or_else(|| Arc::new(()) as CommonExports),
            )),
            ExportKind::Backend => self
                .backends
                .get(tenant)
                .map(|factory| Exports::Backend(factory.clone()))
                .ok_or_else(|| ContentLoadError::MissingExports {
                    tenant: tenant.clone(),
                    kind,
                }),
        }
    }

    async fn info(&self, tenant: &TenantKey) -> Result<TenantInfo, ContentLoadError> {
        Ok(self
            .info
            .get(tenant)
            .map(|info| info.clone())
            .unwrap_or_else(|| TenantInfo::new(tenant)))
    }

    async fn storming(
        &self,
        tenant: &TenantKey,
        _refresh_cache: bool,
    ) -> Result<Value, ContentLoadError> {
        Ok(self
            .storming
            .get(tenant)
            .map(|doc| doc.clone())
            .unwrap_or(Value::Null))
    }
}
