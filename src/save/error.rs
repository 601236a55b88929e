use std::io;

/// Errors returned by every save operation
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// A save name or inner file name failed validation
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The save or the inner file does not exist
    #[error("'{0}' not found")]
    NotFound(String),

    /// The archive is in the wrong mode or lifecycle phase for the operation
    #[error("Invalid archive state: {0}")]
    InvalidState(&'static str),

    /// The medium has no room left for the commit
    #[error("Storage full")]
    StorageFull,

    /// The stored container can't be decoded
    #[error("Corrupted save '{name}': {reason}")]
    Corrupted { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(io::Error),

    /// Backend specific failure (network, browser storage, thread pool...)
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type SaveResult<T> = Result<T, SaveError>;

impl SaveError {
    pub(crate) fn corrupted(name: &str, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<io::Error> for SaveError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => SaveError::StorageFull,
            _ => SaveError::Io(err),
        }
    }
}
