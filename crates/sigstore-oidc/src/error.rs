//! Error types for sigstore-oidc

use thiserror::Error;

/// Errors that can occur while obtaining an identity token
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered without a usable token
    #[error("Token error: {0}")]
    Token(String),

    /// No registered provider is enabled in this environment
    #[error("no identity provider is enabled")]
    NoProvider,

    /// A provider name was registered twice
    #[error("identity provider {0} is already registered")]
    DuplicateProvider(String),

    /// Reading a token file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for OIDC operations
pub type Result<T> = std::result::Result<T, Error>;
