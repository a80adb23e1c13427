//! Error taxonomy shared by every dropzone crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while watching, parsing, persisting or relocating files
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing setting; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database session could not be opened or obtained
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed input or a field violating its constraints
    #[error("Parse error: {0}")]
    Parse(String),

    /// The insert failed after a successful parse
    #[error("Persistence error: {0}")]
    Persist(String),

    /// Filesystem failure, tagged with the path involved
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Connection error wrapping the underlying driver failure
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// IO error on `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for dropzone operations
pub type Result<T> = std::result::Result<T, Error>;
