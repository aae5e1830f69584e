//! Archive engine configuration.
//!
//! Validation happens once, when a configuration is handed to the engine,
//! not on the hot path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::codec::MIN_DOCUMENT_SIZE;

/// Default maximum record size: 16 MiB, the largest record the surrounding
/// system is allowed to produce.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Default capacity of the buffered file sink.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for the archive multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Upper bound on a single record's size in bytes.
    ///
    /// Every stream handle allocates an accumulation buffer of this size, so
    /// any single record ships in one handshake and record boundaries are
    /// never split across shipments.
    #[serde(default = "default_max_record_size")]
    pub max_record_size: usize,

    /// Buffer capacity used when the archive sink is a file.
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,
}

fn default_max_record_size() -> usize {
    DEFAULT_MAX_RECORD_SIZE
}

fn default_io_buffer_size() -> usize {
    DEFAULT_IO_BUFFER_SIZE
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }
}

impl ArchiveConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if `max_record_size` cannot hold even the smallest
    /// framed record, or if `io_buffer_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_record_size < MIN_DOCUMENT_SIZE {
            return Err(ConfigError::RecordSizeTooSmall {
                actual: self.max_record_size,
                min: MIN_DOCUMENT_SIZE,
            });
        }
        if self.io_buffer_size == 0 {
            return Err(ConfigError::ZeroIoBuffer);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_record_size` is smaller than the smallest possible record.
    #[error("max_record_size {actual} is below the minimum of {min} bytes")]
    RecordSizeTooSmall {
        /// Configured value.
        actual: usize,
        /// Smallest acceptable value.
        min: usize,
    },

    /// `io_buffer_size` is zero.
    #[error("io_buffer_size must be nonzero")]
    ZeroIoBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ArchiveConfig::default();
        assert_eq!(config.max_record_size, 16 * 1024 * 1024);
        config.validate().expect("default config must validate");
    }

    #[test]
    fn rejects_tiny_record_size() {
        let config = ArchiveConfig { max_record_size: 4, ..ArchiveConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RecordSizeTooSmall { actual: 4, .. })
        ));
    }

    #[test]
    fn rejects_zero_io_buffer() {
        let config = ArchiveConfig { io_buffer_size: 0, ..ArchiveConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroIoBuffer));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ArchiveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ArchiveConfig::default());

        let config: ArchiveConfig =
            serde_json::from_str(r#"{"max_record_size": 4096}"#).unwrap();
        assert_eq!(config.max_record_size, 4096);
        assert_eq!(config.io_buffer_size, DEFAULT_IO_BUFFER_SIZE);
    }
}
