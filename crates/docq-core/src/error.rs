use thiserror::Error;

use crate::ports::StoreError;

/// Errors returned by queue operations.
///
/// "No message available" is not an error: dequeue returns `None` or an empty
/// batch. Duplicate enqueue is `Ok(false)`. Poisoning is not reported at all.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Store failure, passed through unchanged. The engine never retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid queue options: {0}")]
    InvalidOptions(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl QueueError {
    /// Worth retrying the whole operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::Unavailable(_)))
    }
}
