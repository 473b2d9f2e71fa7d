use std::time::Duration;

use thiserror::Error;

use super::estimator::EstimationError;
use super::persistence::StoreError;

/// Per-request failure. Batch output carries one of these at the position of
/// the failed request; siblings are unaffected.
#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response at position {position} (item {item_id}): {reason}")]
    InvalidResponse {
        position: usize,
        item_id: String,
        reason: String,
    },
    #[error("none of the {count} responses resolved to a known item")]
    NoResolvableResponses { count: usize },
    #[error("internal estimation error: {0}")]
    InternalEstimation(#[from] EstimationError),
    #[error("mastery store error: {0}")]
    Store(#[from] StoreError),
    #[error("diagnosis timed out after {0:?}")]
    TimedOut(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiagnosticError {
    /// Stable machine-readable code for the host's status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticError::InvalidRequest(_) => "INVALID_REQUEST",
            DiagnosticError::InvalidResponse { .. } => "INVALID_RESPONSE",
            DiagnosticError::NoResolvableResponses { .. } => "NO_RESOLVABLE_RESPONSES",
            DiagnosticError::InternalEstimation(_) => "INTERNAL_ESTIMATION_ERROR",
            DiagnosticError::Store(_) => "STORE_ERROR",
            DiagnosticError::TimedOut(_) => "TIMED_OUT",
            DiagnosticError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure stems from the caller's input rather than the engine.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            DiagnosticError::InvalidRequest(_)
                | DiagnosticError::InvalidResponse { .. }
                | DiagnosticError::NoResolvableResponses { .. }
        )
    }
}
