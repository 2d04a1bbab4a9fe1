//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug)]
pub enum DataError {
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// Reading or writing the dry-run store file failed.
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path being read or written.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The dry-run store file did not contain valid JSON.
    Serialization {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryFailed { operation, .. } => {
                write!(formatter, "database operation failed: {operation}")
            }
            Self::Io { operation, path, .. } => {
                write!(formatter, "{operation} failed for {}", path.display())
            }
            Self::Serialization { operation, .. } => {
                write!(formatter, "{operation} serialization failed")
            }
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::QueryFailed { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source),
        }
    }
}

impl From<sqlx::Error> for DataError {
    fn from(source: sqlx::Error) -> Self {
        Self::QueryFailed {
            operation: "sqlx operation",
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_error_display_and_source() {
        let query = DataError::QueryFailed {
            operation: "fetch",
            source: sqlx::Error::RowNotFound,
        };
        assert_eq!(query.to_string(), "database operation failed: fetch");
        assert!(query.source().is_some());

        let io = DataError::Io {
            operation: "write dry-run store",
            path: PathBuf::from("dry_run.json"),
            source: std::io::Error::other("disk full"),
        };
        assert!(io.to_string().contains("dry_run.json"));
        assert!(io.source().is_some());

        let from = DataError::from(sqlx::Error::RowNotFound);
        assert!(from.source().is_some());
    }
}
