//! Error types for the tenant hub.
//!
//! Failures are split by concern: [`HubError`] covers infrastructure problems
//! (networking, configuration, internal invariants), [`ContentLoadError`]
//! covers everything that can go wrong while fetching a tenant's backend code
//! or metadata, and [`BackendError`] is what backend implementations report
//! from their hooks, ticks and constructors.
//!
//! Scheduler failures are deliberately *not* errors: they are returned to the
//! caller as [`LoopOutcome`](crate::scheduler::LoopOutcome) values so they can
//! be forwarded verbatim to the requesting connection.

use crate::backend::ExportKind;
use crate::tenant::TenantKey;

/// Errors raised by the hub infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Network-related error (bind, accept, handshake, send failures)
    #[error("Network error: {0}")]
    Network(String),
    /// Internal error (invalid state, serialization of outbound frames)
    #[error("Internal error: {0}")]
    Internal(String),
    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),
    /// A tenant's backend or metadata could not be loaded
    #[error(transparent)]
    ContentLoad(#[from] ContentLoadError),
}

/// Errors raised while loading a tenant's backend code or metadata.
///
/// These are logged and surfaced to whoever asked for the build; a failing
/// build never takes down the connection that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum ContentLoadError {
    /// The content provider has nothing registered for this tenant/kind
    #[error("[{tenant}] no {kind} exports available")]
    MissingExports { tenant: TenantKey, kind: ExportKind },

    /// The provider returned exports of a different kind than requested
    #[error("[{tenant}] expected {expected} exports")]
    WrongKind { tenant: TenantKey, expected: ExportKind },

    /// The provider itself failed (I/O, lookup, decoding)
    #[error("[{tenant}] failed to load content: {reason}")]
    Provider { tenant: TenantKey, reason: String },

    /// The backend factory refused to construct an instance
    #[error("[{tenant}] backend construction failed: {source}")]
    Construction {
        tenant: TenantKey,
        #[source]
        source: BackendError,
    },
}

/// Errors reported by backend implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be initialized from its resources
    #[error("Backend initialization failed: {0}")]
    Initialization(String),
    /// A hook or tick failed while running
    #[error("Backend execution error: {0}")]
    Execution(String),
}

impl BackendError {
    /// Shorthand for [`BackendError::Execution`].
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}
