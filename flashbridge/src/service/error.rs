//! Facade-level errors.

use crate::flash::{DetectError, StartError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("no job with id {0:?}")]
    JobNotFound(String),

    #[error("rate limit exceeded for class {class:?}, retry after {retry_after:?}")]
    RateLimited {
        class: String,
        retry_after: Duration,
    },

    #[error(transparent)]
    Detect(#[from] DetectError),
}
