//! Dispatch error types.

use thiserror::Error;

use chartdeck_state::{DeploymentId, EnvironmentId};

/// Errors that can occur while dispatching or reconciling deployments.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid deployment request: {0}")]
    Validation(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(EnvironmentId),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("state store error: {0}")]
    State(#[from] chartdeck_state::StateError),

    #[error("backend error: {0}")]
    Backend(#[from] chartdeck_backend::BackendError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
