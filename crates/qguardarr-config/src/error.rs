//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist at the configured path.
    #[error("configuration file not found")]
    NotFound {
        /// Path that was checked for the configuration file.
        path: PathBuf,
    },
    /// Reading the configuration file from disk failed.
    #[error("failed to read configuration file")]
    Io {
        /// Path being read when the failure occurred.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The file contents could not be parsed as TOML.
    #[error("failed to parse configuration file")]
    Parse {
        /// Path being parsed when the failure occurred.
        path: PathBuf,
        /// Underlying parser error.
        source: toml::de::Error,
    },
    /// A field failed validation after parsing.
    #[error("invalid configuration field")]
    InvalidField {
        /// Dotted section/field path, e.g. `trackers[1].pattern`.
        field: String,
        /// Human-readable reason the field was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::InvalidField`] from owned strings.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_carries_message() {
        let err = ConfigError::invalid_field("trackers[0].pattern", "unterminated group");
        match err {
            ConfigError::InvalidField { field, reason } => {
                assert_eq!(field, "trackers[0].pattern");
                assert_eq!(reason, "unterminated group");
            }
            _ => panic!("unexpected variant"),
        }
    }
}
