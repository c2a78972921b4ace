use std::error::Error;
use thiserror::Error;

/// Result alias shared by the card bank and game history backends.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure surfaced when the card bank or history backend cannot be reached.
/// Callers map this to a 503 rather than inspecting the backend-specific
/// source.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Wrap a backend failure, keeping it as the error source for logging.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
