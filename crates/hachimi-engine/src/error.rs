//! Error types for the engine crate.

use hachimi_storage::StorageError;
use hachimi_types::HachimiError;
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Missing records and skipped observations are not errors; see
/// `ObserveOutcome` and the `bool` results of the feedback operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store could not read or commit; nothing was applied
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The request can never succeed as given
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The dispatcher task is gone
    #[error("Dispatcher channel closed")]
    ChannelClosed,
}

impl From<HachimiError> for EngineError {
    fn from(err: HachimiError) -> Self {
        match err {
            HachimiError::InvalidInput(msg) => EngineError::InvalidInput(msg),
            other => EngineError::InvalidInput(other.to_string()),
        }
    }
}
