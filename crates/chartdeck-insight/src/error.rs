//! Insight error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("chart release not found: {0}")]
    ChartNotFound(String),

    #[error("tag {tag} not found for image {image}")]
    UnknownTag { image: String, tag: String },

    #[error("state store error: {0}")]
    State(#[from] chartdeck_state::StateError),

    #[error("registry error: {0}")]
    Backend(#[from] chartdeck_backend::BackendError),
}

pub type InsightResult<T> = Result<T, InsightError>;
