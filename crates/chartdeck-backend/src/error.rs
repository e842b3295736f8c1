//! Collaborator error types.

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{program} failed (exit code {code}): {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected output: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport closed: {0}")]
    Transport(String),
}
