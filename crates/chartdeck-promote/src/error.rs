//! Promotion error types.

use thiserror::Error;

use chartdeck_state::EnvironmentId;

/// Errors raised before a promotion is accepted.
///
/// Failures of the detached release phase are reported on the
/// [`PromotionReport`](crate::PromotionReport) instead.
#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("invalid promotion: {0}")]
    Validation(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(EnvironmentId),

    #[error("state store error: {0}")]
    State(#[from] chartdeck_state::StateError),

    #[error("backend error: {0}")]
    Backend(#[from] chartdeck_backend::BackendError),
}

pub type PromoteResult<T> = Result<T, PromoteError>;
