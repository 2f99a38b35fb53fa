//! Error types for the lifecycle orchestration layer.

use frostguard_ttn::error::TtnError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the orchestrators and the worker.
///
/// Control-plane HTTP failures are not errors at this level; they are
/// classified and folded into job status transitions. Only transport,
/// persistence, and local configuration problems surface here.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Control-plane transport or configuration failure.
    #[error(transparent)]
    Ttn(#[from] TtnError),

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// The connection config has no usable stored credential.
    #[error("Organization {organization_id} has no stored TTN credentials")]
    MissingCredentials { organization_id: Uuid },
}

/// Convenience alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
