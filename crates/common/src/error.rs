//! Error types for tincmesh

use thiserror::Error;

/// Result type alias using the tincmesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Tincmesh error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Sealed payload failed authentication. Never fatal; mapped to 401 at
    /// the boot endpoint.
    #[error("authentication failed")]
    AuthFailure,

    #[error("malformed node name: {0}")]
    NameInvalid(String),

    #[error("config line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("node not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("daemon error: {0}")]
    Daemon(String),
}
