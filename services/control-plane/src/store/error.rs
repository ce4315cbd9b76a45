//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A previous holder of the store lock panicked.
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for hostpilot_model::LifecycleError {
    fn from(err: StoreError) -> Self {
        hostpilot_model::LifecycleError::Store(err.to_string())
    }
}
