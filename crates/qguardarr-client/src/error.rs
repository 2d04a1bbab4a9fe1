//! Error types for the qBittorrent client.

use thiserror::Error;

/// Primary error type returned by [`crate::qbittorrent::QbittorrentClient`]
/// implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request itself failed (connection, TLS, timeout, ...).
    #[error("request to {endpoint} failed: {source}")]
    Request {
        /// Endpoint path that was being requested.
        endpoint: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// qBittorrent rejected the login form (wrong credentials).
    #[error("authentication rejected by qbittorrent: {body}")]
    AuthRejected {
        /// Response body returned by the login endpoint.
        body: String,
    },
    /// The circuit breaker is open; the call was not attempted.
    #[error("circuit breaker is open, request skipped")]
    CircuitOpen,
    /// A response body could not be decoded as the expected shape.
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        /// Endpoint path whose response failed to decode.
        endpoint: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
