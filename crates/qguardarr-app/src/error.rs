//! # Design
//!
//! - Centralize application-level errors for bootstrap and the cycle orchestrator.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: qguardarr_config::ConfigError,
    },
    /// qBittorrent client operations failed.
    #[error("qbittorrent client operation failed")]
    Client {
        /// Operation identifier.
        operation: &'static str,
        /// Source client error.
        source: qguardarr_client::ClientError,
    },
    /// Rollback journal or dry-run store operations failed.
    #[error("data store operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source error, as returned by the rollback journal or dry-run store.
        source: anyhow::Error,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: qguardarr_telemetry::TelemetryError,
    },
    /// Tracker matcher construction failed.
    #[error("tracker matcher construction failed")]
    Alloc {
        /// Operation identifier.
        operation: &'static str,
        /// Source allocation error.
        source: qguardarr_alloc::AllocError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: qguardarr_api::ApiError,
    },
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Required runtime state was missing.
    #[error("missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: qguardarr_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn client(operation: &'static str, source: qguardarr_client::ClientError) -> Self {
        Self::Client { operation, source }
    }

    pub(crate) fn data(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: qguardarr_telemetry::TelemetryError) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn alloc(operation: &'static str, source: qguardarr_alloc::AllocError) -> Self {
        Self::Alloc { operation, source }
    }

    pub(crate) const fn api_server(operation: &'static str, source: qguardarr_api::ApiError) -> Self {
        Self::ApiServer { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            qguardarr_config::ConfigError::invalid_field("global.port", "out of range"),
        );
        assert!(matches!(config, AppError::Config { .. }));

        let client = AppError::client("force_cycle", qguardarr_client::ClientError::CircuitOpen);
        assert!(matches!(client, AppError::Client { .. }));

        let invalid = AppError::InvalidConfig {
            field: "rollout_percentage",
            reason: "out of range",
            value: Some("150".to_string()),
        };
        assert!(matches!(invalid, AppError::InvalidConfig { .. }));
    }
}
