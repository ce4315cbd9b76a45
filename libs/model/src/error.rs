//! Error types for lifecycle operations and boundary parsing.

use thiserror::Error;

/// Failure to parse a closed-set value (kind, status, action) from a string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {what}: '{value}'")]
pub struct ParseError {
    pub what: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(what: &'static str, value: impl Into<String>) -> Self {
        Self {
            what,
            value: value.into(),
        }
    }
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Bad action, status, or resource name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource with this name already exists.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// No resource with this name.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The remote host or agent could not be reached within the retry budget.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A script or remote command failed.
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl LifecycleError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::InvalidArgument(_) => "invalid_argument",
            LifecycleError::AlreadyExists(_) => "already_exists",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::Connectivity(_) => "connectivity_error",
            LifecycleError::RemoteExecution(_) => "remote_execution_error",
            LifecycleError::Store(_) => "store_error",
        }
    }
}

impl From<ParseError> for LifecycleError {
    fn from(err: ParseError) -> Self {
        LifecycleError::InvalidArgument(err.to_string())
    }
}
