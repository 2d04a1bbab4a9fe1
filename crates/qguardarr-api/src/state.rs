//! Shared application state handed to every handler.

use std::sync::{Arc, Mutex, RwLock};

use qguardarr_config::ConfigLoader;
use qguardarr_events::WebhookEvent;
use qguardarr_telemetry::Metrics;

use crate::error::{ApiError, ApiResult};
use crate::handle::OrchestratorHandle;

/// Producer side of the webhook queue, as seen from the API layer.
///
/// `qguardarr-app`'s `WebhookIngress` implements this; kept as a trait
/// (rather than a concrete dependency) for the same reason as
/// [`OrchestratorHandle`](crate::handle::OrchestratorHandle) — this crate
/// cannot depend on `qguardarr-app`.
pub trait WebhookSink: Send + Sync {
    /// Enqueue an event. Returns `true` if accepted, `false` if the queue
    /// was full and the event was dropped.
    fn enqueue(&self, event: WebhookEvent) -> bool;
}

/// Shared, `Clone`-able application state.
#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<RwLock<Option<Arc<dyn OrchestratorHandle>>>>,
    webhook: Arc<dyn WebhookSink>,
    metrics: Arc<Metrics>,
    config_loader: Arc<Mutex<ConfigLoader>>,
}

impl ApiState {
    /// Build application state. `orchestrator` may be `None` at startup if
    /// the API is brought up before the orchestrator finishes constructing;
    /// stats and control endpoints return `503` until it is wired with
    /// [`Self::set_orchestrator`].
    #[must_use]
    pub fn new(
        orchestrator: Option<Arc<dyn OrchestratorHandle>>,
        webhook: Arc<dyn WebhookSink>,
        metrics: Arc<Metrics>,
        config_loader: ConfigLoader,
    ) -> Self {
        Self {
            orchestrator: Arc::new(RwLock::new(orchestrator)),
            webhook,
            metrics,
            config_loader: Arc::new(Mutex::new(config_loader)),
        }
    }

    /// Wire (or replace) the orchestrator handle.
    pub fn set_orchestrator(&self, orchestrator: Arc<dyn OrchestratorHandle>) {
        *self.orchestrator.write().expect("orchestrator lock poisoned") = Some(orchestrator);
    }

    /// Fetch the orchestrator handle, or `503` if it is not yet wired.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::OrchestratorUnavailable`] if no orchestrator has
    /// been set yet.
    pub fn orchestrator(&self) -> ApiResult<Arc<dyn OrchestratorHandle>> {
        self.orchestrator
            .read()
            .expect("orchestrator lock poisoned")
            .clone()
            .ok_or(ApiError::OrchestratorUnavailable)
    }

    /// Webhook queue producer handle.
    #[must_use]
    pub fn webhook(&self) -> &Arc<dyn WebhookSink> {
        &self.webhook
    }

    /// Shared Prometheus registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Reload configuration from disk and hand the new snapshot to the
    /// orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::OrchestratorUnavailable`] if the orchestrator is
    /// not yet wired, [`ApiError::Config`] if the file fails to load or
    /// validate, or [`ApiError::Orchestrator`] if the orchestrator rejects
    /// the new tracker list.
    pub async fn reload_config(&self) -> ApiResult<()> {
        let orchestrator = self.orchestrator()?;
        let config = {
            let mut loader = self.config_loader.lock().expect("config loader lock poisoned");
            loader.load().map_err(|source| ApiError::Config { source })?
        };
        orchestrator
            .reload_config(&config)
            .await
            .map_err(|source| ApiError::Orchestrator { operation: "reload_config", source })
    }
}
