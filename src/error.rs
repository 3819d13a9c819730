//! Error taxonomy shared by the store, the services and both pollers.

use thiserror::Error;

/// Failure reported by a capability platform binding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("target missing: {0}")]
    TargetMissing(String),

    /// Transport failure or timeout; the platform never answered.
    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing record, or a record in the wrong status for the operation.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not eligible: {0}")]
    Ineligible(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Concurrent writes kept invalidating the operation; retry later.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable(_))
    }

    /// Short machine-readable tag used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::Ineligible(_) => "ineligible",
            CoreError::RateLimited(_) => "rate_limited",
            CoreError::Conflict(_) => "conflict",
            CoreError::Dispatch(DispatchError::PermissionDenied(_)) => "permission_denied",
            CoreError::Dispatch(DispatchError::TargetMissing(_)) => "target_missing",
            CoreError::Dispatch(DispatchError::Unavailable(_)) => "dispatch_unavailable",
            CoreError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::StoreUnavailable(format!("corrupt record: {}", err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
