//! Error types for the metadata store

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (permissions, disk full, ...)
    #[error("I/O error: {0}")]
    Io(String),

    /// Entry name cannot be mapped to storage
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    /// On-disk layout is not one this store wrote
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
