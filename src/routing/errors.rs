//! # Routing Errors

use thiserror::Error;

use super::store::StoreError;

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Routing, alias and admission errors
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Throttled: {function} has no free concurrency (limit {limit})")]
    Throttled { function: String, limit: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage collaborator failure, passed through untouched
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl RoutingError {
    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            RoutingError::NotFound(_) => "CANARY_NOT_FOUND",
            RoutingError::Conflict(_) => "CANARY_CONFLICT",
            RoutingError::InvalidArgument(_) => "CANARY_INVALID_ARGUMENT",
            RoutingError::Throttled { .. } => "CANARY_THROTTLED",
            RoutingError::InvalidState(_) => "CANARY_INVALID_STATE",
            RoutingError::Storage(_) => "CANARY_STORAGE",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            RoutingError::NotFound(_) => 404,
            RoutingError::Conflict(_) => 409,
            RoutingError::InvalidArgument(_) => 400,
            RoutingError::Throttled { .. } => 429,
            RoutingError::InvalidState(_) => 500,
            RoutingError::Storage(_) => 503,
        }
    }

    /// Throttling is expected back-pressure, not a fault
    pub fn is_throttle(&self) -> bool {
        matches!(self, RoutingError::Throttled { .. })
    }

    pub(crate) fn poisoned() -> Self {
        RoutingError::InvalidState("Lock poisoned".into())
    }
}
