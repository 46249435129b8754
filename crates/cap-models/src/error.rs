//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown job status code: {0}")]
    UnknownStatus(i64),

    #[error("Unknown job type code: {0}")]
    UnknownJobType(i64),

    #[error("Invalid job arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),
}
