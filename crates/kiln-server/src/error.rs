//! Error types for kiln server.

use std::path::PathBuf;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Gateway construction failed.
    #[error("Core error: {0}")]
    Core(#[from] kiln_core::Error),

    /// Host and port do not form a socket address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The static directory does not exist.
    #[error("Static directory not found: {0}")]
    StaticDirMissing(PathBuf),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
