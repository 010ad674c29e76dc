//! Error types for kiln-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for kiln-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kiln-core.
///
/// None of these ever reach a browser as a transport failure: the gateway
/// turns build problems into diagnostic scripts and security problems into
/// plain misses. They surface at construction time, from the CLI, and in
/// logs.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configured source root does not exist or is not a directory.
    #[error("source root not found: {0}")]
    SourceRootMissing(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a short recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Config(_) => Some("check the keys in your kiln.toml against `kiln check`"),
            Error::ConfigRead { .. } => Some("pass --config <path> or create kiln.toml"),
            Error::SourceRootMissing(_) => {
                Some("set `source_root` to the directory holding your .ts/.tsx modules")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
