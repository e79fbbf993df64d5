//! Error types for trust-root client operations

use thiserror::Error;

/// Errors that can occur while bootstrapping, refreshing or querying the
/// trust root
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (no usable root, bad mirror URL)
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure after exhausting retries
    #[error("network error: {0}")]
    Network(String),

    /// Remote metadata rejected by the TUF verification engine
    #[error("verification failed: {0}")]
    Verification(String),

    /// Metadata store failure
    #[error("cache error: {0}")]
    Cache(#[from] sigstore_cache::Error),

    /// Requested target is not part of the trusted bundle
    #[error("target not found: {0}")]
    NotFound(String),
}

/// Result type for trust-root client operations
pub type Result<T> = std::result::Result<T, Error>;
