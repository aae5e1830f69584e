//! Crate-level error type.
//!
//! Each subsystem defines its own error enum (`ArchiveError`, `ReadError`,
//! `ConfigError`); this umbrella type wraps them for callers that handle
//! the crate as a whole.

use thiserror::Error;

use crate::archive::{ArchiveError, ReadError};
use crate::config::ConfigError;

/// Main error type for skein operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A namespace component failed validation.
    #[error("invalid namespace: {message}")]
    InvalidNamespace {
        /// What was wrong with it.
        message: String,
    },

    /// Serialization of a sidecar document failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Underlying serializer message.
        message: String,
    },

    /// An archive write-side failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// An archive read-side failure.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Configuration validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O outside the archive sink (sidecar files and the like).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for skein operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization { message: err.to_string() }
    }
}
