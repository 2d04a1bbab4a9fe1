//! Router construction and server host.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::http::Request;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{
    config_reload, force_cycle, get_config, health, limits_reset, managed_stats, match_test, metrics,
    preview_next_cycle, rollback, rollout, smoothing_reset, stats, tracker_stats, webhook,
};
use crate::state::ApiState;

/// Axum router wrapper that hosts the qguardarr control-plane API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the server from already-wired application state.
    #[must_use]
    pub fn new(state: ApiState) -> Self {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_response(|response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            });

        let router = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/stats", get(stats))
            .route("/stats/trackers", get(tracker_stats))
            .route("/stats/managed", get(managed_stats))
            .route("/preview/next-cycle", get(preview_next_cycle))
            .route("/cycle/force", post(force_cycle))
            .route("/webhook", post(webhook))
            .route("/rollback", post(rollback))
            .route("/limits/reset", post(limits_reset))
            .route("/rollout", post(rollout))
            .route("/smoothing/reset", post(smoothing_reset))
            .route("/config", get(get_config))
            .route("/config/reload", post(config_reload))
            .route("/match/test", get(match_test))
            .layer(ServiceBuilder::new().layer(trace_layer))
            .with_state(state);

        Self { router }
    }

    /// Serve the API on `addr` until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(self, addr: SocketAddr) -> ApiResult<()> {
        tracing::info!(%addr, "starting api server");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiError::Bind { addr, source })?;
        axum::serve(listener, self.router.into_make_service())
            .await
            .map_err(|source| ApiError::Serve { source })?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn into_router(self) -> Router {
        self.router
    }
}
