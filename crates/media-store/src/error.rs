//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage error type.
///
/// Collapses backend errors into the categories callers actually branch
/// on: missing objects, credential problems, and transient failures that
/// are worth retrying.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Unknown(String),
}

impl StoreError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn from_opendal(key: &str, err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound(key.to_string()),
            opendal::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(format!("{}: {}", key, err))
            }
            opendal::ErrorKind::RateLimited => Self::Unavailable(format!("{}: {}", key, err)),
            _ if err.is_temporary() => Self::Unavailable(format!("{}: {}", key, err)),
            _ => Self::Unknown(format!("{}: {}", key, err)),
        }
    }
}
