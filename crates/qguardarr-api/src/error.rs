//! # Design
//!
//! - Provide a single crate-level error type for API bootstrap, serve, and
//!   handler failures.
//! - Keep error messages constant; capture operational context in
//!   structured fields.
//! - Preserve sources for diagnostics without double-logging.
//! - Implement [`axum::response::IntoResponse`] directly so handlers can
//!   return `ApiResult<T>` and get a consistent `ProblemDetails` body.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use qguardarr_api_models::ProblemDetails;

/// Result alias for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors raised while bootstrapping, serving, or handling the API.
#[derive(Debug)]
pub enum ApiError {
    /// Binding the API listener failed.
    Bind {
        /// Address attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Serving the API failed.
    Serve {
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// A stats or control endpoint was called before the orchestrator was
    /// wired into application state.
    OrchestratorUnavailable,
    /// A destructive endpoint (`/rollback`, `/limits/reset`) was called
    /// without `confirm: true`.
    ConfirmationRequired {
        /// Name of the action that was rejected.
        action: &'static str,
    },
    /// An orchestrator operation (rollback, reset, force cycle, reload)
    /// failed.
    Orchestrator {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying error.
        source: anyhow::Error,
    },
    /// Reloading configuration from disk failed.
    Config {
        /// Underlying configuration error.
        source: qguardarr_config::ConfigError,
    },
}

impl Display for ApiError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { .. } => formatter.write_str("failed to bind api listener"),
            Self::Serve { .. } => formatter.write_str("api server terminated unexpectedly"),
            Self::OrchestratorUnavailable => formatter.write_str("orchestrator not yet wired"),
            Self::ConfirmationRequired { action } => {
                write!(formatter, "{action} requires explicit confirmation")
            }
            Self::Orchestrator { operation, .. } => {
                write!(formatter, "orchestrator operation '{operation}' failed")
            }
            Self::Config { .. } => formatter.write_str("configuration reload failed"),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bind { source, .. } | Self::Serve { source } => Some(source),
            Self::Orchestrator { source, .. } => Some(source.as_ref()),
            Self::Config { source } => Some(source),
            Self::OrchestratorUnavailable | Self::ConfirmationRequired { .. } => None,
        }
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Bind { .. } | Self::Serve { .. } | Self::Orchestrator { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::OrchestratorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfirmationRequired { .. } | Self::Config { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        tracing::warn!(error = %self, "api request failed");
        let problem = ProblemDetails::new("about:blank", status.canonical_reason().unwrap_or("error"), status.as_u16(), Some(detail));
        (status, Json(problem)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn orchestrator_unavailable_maps_to_503() {
        let err = ApiError::OrchestratorUnavailable;
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn confirmation_required_maps_to_400_and_names_the_action() {
        let err = ApiError::ConfirmationRequired { action: "rollback" };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "rollback requires explicit confirmation");
    }

    #[test]
    fn bind_error_preserves_source() {
        let err = ApiError::Bind {
            addr: "127.0.0.1:7474".parse().expect("valid addr"),
            source: io::Error::new(io::ErrorKind::AddrInUse, "busy"),
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.source().is_some());
    }
}
