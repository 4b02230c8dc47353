//! Backend lifecycle management.
//!
//! The [`BackendManager`] lazily builds one backend per tenant, caches it in
//! the tenant's state and rebuilds it on demand. Cold builds for a tenant are
//! serialized by the tenant's build lock; callers that queue behind a build
//! pick up its result from the cache instead of constructing a second
//! instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use super::{Backend, CommonExports, ContentProvider, ExportKind, Exports, TenantResources, MAIN_LOOP_TAG};
use crate::connection::ConnectionRegistry;
use crate::error::ContentLoadError;
use crate::scheduler::TickScheduler;
use crate::tenant::{Tenant, TenantKey, TenantRegistry};

/// Builds, caches and refreshes tenant backends.
pub struct BackendManager {
    tenants: Arc<TenantRegistry>,
    content: Arc<dyn ContentProvider>,
    scheduler: Arc<TickScheduler>,
    connections: Arc<ConnectionRegistry>,
    /// Number of backend instances constructed so far
    builds: AtomicU64,
}

impl BackendManager {
    pub fn new(
        tenants: Arc<TenantRegistry>,
        content: Arc<dyn ContentProvider>,
        scheduler: Arc<TickScheduler>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            tenants,
            content,
            scheduler,
            connections,
            builds: AtomicU64::new(0),
        }
    }

    /// The cached backend of `tenant`, if one has been built.
    pub fn fetch_from_cache(&self, tenant: &TenantKey) -> Option<Arc<dyn Backend>> {
        self.tenants.get(tenant).and_then(|state| state.cached_backend())
    }

    /// Returns the backend of `tenant`, building it if needed.
    ///
    /// With `use_cache` a cached instance is returned without side effects.
    /// Without it, a new instance is always constructed: the tenant's running
    /// loops are stopped and the new instance replaces the old one. Either way
    /// the instance starts its `main` loop when it asks to.
    ///
    /// # Errors
    ///
    /// Returns a [`ContentLoadError`] when the content provider fails or the
    /// factory refuses to construct the backend. The previous instance, if
    /// any, stays cached in that case.
    pub async fn build(
        &self,
        tenant: &TenantKey,
        use_cache: bool,
    ) -> Result<Arc<dyn Backend>, ContentLoadError> {
        let state = self.tenants.get_or_create(tenant);

        if use_cache {
            if let Some(backend) = state.cached_backend() {
                return Ok(backend);
            }
        }

        let _guard = state.build_lock().lock().await;

        if use_cache {
            if let Some(backend) = state.cached_backend() {
                debug!("[{}] Backend built while waiting, reusing it", tenant);
                return Ok(backend);
            }
        }

        match self.construct(&state, use_cache).await {
            Ok(backend) => Ok(backend),
            Err(e) => {
                error!("[{}] Failed to load backend: {}", tenant, e);
                Err(e)
            }
        }
    }

    async fn construct(
        &self,
        state: &Arc<Tenant>,
        use_cache: bool,
    ) -> Result<Arc<dyn Backend>, ContentLoadError> {
        let tenant = state.key();
        info!("[{}] - Loading backend", tenant);

        let storming = self.content.storming(tenant, !use_cache).await?;
        let common = self.common_exports(tenant).await?;
        let factory = match self.load_exports(tenant, ExportKind::Backend).await? {
            Exports::Backend(factory) => factory,
            Exports::Common(_) => {
                return Err(ContentLoadError::WrongKind {
                    tenant: tenant.clone(),
                    expected: ExportKind::Backend,
                })
            }
        };

        let resources = TenantResources::new(
            state,
            &self.connections,
            &self.scheduler,
            common,
            storming,
        );
        let backend = factory
            .create(resources)
            .map_err(|source| ContentLoadError::Construction {
                tenant: tenant.clone(),
                source,
            })?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        state.logs().open();

        if !use_cache {
            self.scheduler.stop_all_for(tenant);
        }
        state.store_backend(backend.clone());
        info!("🎉 [{}] - Back-end loaded", tenant);

        if backend.start_loop_immediately() {
            info!("[{}] - Starting '{}' loop immediately", tenant, MAIN_LOOP_TAG);
            let outcome = self.scheduler.start(tenant, MAIN_LOOP_TAG);
            if !outcome.success {
                let args = Value::from(outcome.args);
                error!(
                    "[{}] Could not start '{}' loop: {}",
                    tenant, MAIN_LOOP_TAG, args
                );
            }
        }

        Ok(backend)
    }

    async fn common_exports(&self, tenant: &TenantKey) -> Result<CommonExports, ContentLoadError> {
        match self.load_exports(tenant, ExportKind::Common).await? {
            Exports::Common(common) => Ok(common),
            Exports::Backend(_) => Err(ContentLoadError::WrongKind {
                tenant: tenant.clone(),
                expected: ExportKind::Common,
            }),
        }
    }

    /// Alternate content wins over the regular exports.
    async fn load_exports(
        &self,
        tenant: &TenantKey,
        kind: ExportKind,
    ) -> Result<Exports, ContentLoadError> {
        if let Some(content) = self.content.alternate_content(tenant, kind).await? {
            debug!("[{}] Using alternate {} content", tenant, kind);
            return Ok(content);
        }
        self.content.exports(tenant, kind).await
    }

    /// Stops the tenant's loops and evicts its cached backend. The next
    /// `build` constructs a fresh instance.
    pub fn refresh_backend(&self, tenant: &TenantKey) -> bool {
        self.scheduler.stop_all_for(tenant);
        match self.tenants.get(tenant) {
            Some(state) => {
                let evicted = state.evict_backend().is_some();
                if evicted {
                    info!("♻️ [{}] Backend evicted", tenant);
                }
                evicted
            }
            None => false,
        }
    }

    /// Number of backend instances constructed over the process lifetime.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn content(&self) -> &Arc<dyn ContentProvider> {
        &self.content
    }
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("tenants", &self.tenants.len())
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}
