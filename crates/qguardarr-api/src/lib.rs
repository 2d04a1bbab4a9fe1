#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! HTTP surface for qguardarr: health/stats/control endpoints and the
//! webhook ack path.
//!
//! Layout: `handle.rs` (the [`OrchestratorHandle`] seam that lets handlers
//! call into the cycle orchestrator without a crate cycle), `state.rs`
//! (shared `ApiState`), `handlers.rs` (one function per route), `router.rs`
//! (route table and server host), `error.rs` (the crate's error type).

/// Narrow async trait the handlers drive the cycle orchestrator through.
pub mod handle;
/// Route handler functions.
pub mod handlers;
/// Router construction and server host.
pub mod router;
/// Shared application state.
pub mod state;

mod error;

pub use error::{ApiError, ApiResult};
pub use handle::OrchestratorHandle;
pub use router::ApiServer;
pub use state::{ApiState, WebhookSink};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use qguardarr_api_models::{CycleStatsDto, HealthState, ManagedTorrentRowDto, ResetScope, TrackerStatsDto};
    use qguardarr_config::{
        CrossSeedSettings, GlobalSettings, LoggingSettings, QbittorrentSettings, QguardarrConfig, RollbackSettings,
    };
    use qguardarr_events::WebhookEvent;
    use qguardarr_telemetry::Metrics;
    use tower::ServiceExt;

    use super::*;

    fn sample_config() -> QguardarrConfig {
        QguardarrConfig {
            global: GlobalSettings {
                update_interval: 300,
                active_torrent_threshold_kb: 10,
                max_api_calls_per_cycle: 500,
                differential_threshold: 0.2,
                rollout_percentage: 100,
                cache_ttl_seconds: 1_800,
                max_managed_torrents: 1_000,
                allocation_strategy: qguardarr_config::AllocationStrategy::Equal,
                borrow_threshold_ratio: 0.8,
                max_borrow_fraction: 0.5,
                smoothing_alpha: 0.3,
                min_effective_delta: 0.05,
                dry_run: true,
                dry_run_store_path: String::new(),
                auto_unlimit_on_inactive: false,
                host: "127.0.0.1".to_string(),
                port: 8089,
            },
            qbittorrent: QbittorrentSettings {
                host: "localhost".to_string(),
                port: 8080,
                username: "admin".to_string(),
                password: "admin".to_string(),
                timeout_secs: 30,
            },
            cross_seed: CrossSeedSettings::default(),
            trackers: Vec::new(),
            rollback: RollbackSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    struct FakeHandle {
        config: QguardarrConfig,
    }

    #[async_trait]
    impl OrchestratorHandle for FakeHandle {
        fn health(&self) -> HealthState {
            HealthState::Healthy
        }
        fn uptime_seconds(&self) -> u64 {
            42
        }
        fn rollout_percentage(&self) -> u8 {
            self.config.global.rollout_percentage
        }
        fn update_interval(&self) -> u64 {
            self.config.global.update_interval
        }
        fn dry_run(&self) -> bool {
            self.config.global.dry_run
        }
        fn stats(&self) -> CycleStatsDto {
            CycleStatsDto::default()
        }
        fn tracker_stats(&self) -> HashMap<String, TrackerStatsDto> {
            HashMap::new()
        }
        fn managed_rows(&self) -> Vec<ManagedTorrentRowDto> {
            Vec::new()
        }
        fn preview_next_cycle(&self) -> HashMap<String, i64> {
            HashMap::new()
        }
        fn match_test(&self, tracker_url: &str) -> String {
            format!("matched:{tracker_url}")
        }
        fn config_snapshot(&self) -> QguardarrConfig {
            self.config.clone()
        }
        fn set_rollout_percentage(&self, _percentage: u8) {}
        fn reset_smoothing(&self, _tracker_id: Option<&str>) {}
        async fn force_cycle(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn apply_rollback(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn reset_limits(&self, _scope: ResetScope, _mark_restored: bool) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn reload_config(&self, _config: &QguardarrConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<WebhookEvent>>,
    }

    impl RecordingSink {
        fn recorded(&self) -> Vec<WebhookEvent> {
            self.events.lock().expect("mutex poisoned").clone()
        }
    }

    impl WebhookSink for RecordingSink {
        fn enqueue(&self, event: WebhookEvent) -> bool {
            self.events.lock().expect("mutex poisoned").push(event);
            true
        }
    }

    fn build_state(config_path: &std::path::Path) -> ApiState {
        let orchestrator: Arc<dyn OrchestratorHandle> = Arc::new(FakeHandle { config: sample_config() });
        let webhook: Arc<dyn WebhookSink> = Arc::new(RecordingSink::default());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let loader = qguardarr_config::ConfigLoader::new(config_path);
        ApiState::new(Some(orchestrator), webhook, metrics, loader)
    }

    #[tokio::test]
    async fn health_endpoint_reports_wired_orchestrator() {
        let state = build_state(std::path::Path::new("/nonexistent.toml"));
        let app = ApiServer::new(state).into_router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_endpoint_returns_503_without_a_wired_orchestrator() {
        let webhook: Arc<dyn WebhookSink> = Arc::new(RecordingSink::default());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let loader = qguardarr_config::ConfigLoader::new(std::path::Path::new("/nonexistent.toml"));
        let state = ApiState::new(None, webhook, metrics, loader);
        let app = ApiServer::new(state).into_router();

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rollback_without_confirmation_returns_400() {
        let state = build_state(std::path::Path::new("/nonexistent.toml"));
        let app = ApiServer::new(state).into_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rollback")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"confirm":false}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_webhook_body_still_acks_200() {
        let state = build_state(std::path::Path::new("/nonexistent.toml"));
        let app = ApiServer::new(state).into_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("not=a=valid=webhook=body=at=all"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn well_formed_webhook_is_enqueued() {
        let orchestrator: Arc<dyn OrchestratorHandle> = Arc::new(FakeHandle { config: sample_config() });
        let sink = Arc::new(RecordingSink::default());
        let webhook: Arc<dyn WebhookSink> = Arc::clone(&sink) as Arc<dyn WebhookSink>;
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let loader = qguardarr_config::ConfigLoader::new(std::path::Path::new("/nonexistent.toml"));
        let state = ApiState::new(Some(orchestrator), webhook, metrics, loader);
        let app = ApiServer::new(state).into_router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("event=add&hash=abc123&name=&tracker=&category=&tags=&save_path="))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.recorded().len(), 1);
    }
}
