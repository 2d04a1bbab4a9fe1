//! Forwards torrent-completion webhook events to a cross-seed helper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use qguardarr_config::CrossSeedSettings;
use qguardarr_events::{WebhookEvent, WebhookKind};
use qguardarr_telemetry::Metrics;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Serialize)]
struct CompletionPayload<'a> {
    #[serde(rename = "infoHash")]
    info_hash: &'a str,
    name: &'a str,
    category: &'a str,
    tags: &'a str,
    #[serde(rename = "savePath")]
    save_path: &'a str,
}

/// Forwarding outcome counters exposed through `/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossSeedStats {
    /// Completions successfully forwarded.
    pub forwarded: u64,
    /// Completions that exhausted retries without success.
    pub failed: u64,
    /// Most recent failure message, if any.
    pub last_error: Option<String>,
}

/// Forwards `complete` webhook events to an external cross-seed helper with
/// bounded exponential-backoff retries. A no-op when disabled, unconfigured,
/// or given a non-completion event.
pub struct CrossSeedForwarder {
    http: Client,
    settings: CrossSeedSettings,
    stats: Mutex<CrossSeedStats>,
    metrics: Arc<Metrics>,
}

impl CrossSeedForwarder {
    /// Build a forwarder from cross-seed settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(settings: CrossSeedSettings, metrics: Arc<Metrics>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            settings,
            stats: Mutex::new(CrossSeedStats::default()),
            metrics,
        })
    }

    /// Forward a completion event, retrying with exponential backoff.
    ///
    /// Returns `true` if the event was forwarded (or forwarding is not
    /// applicable), `false` if every retry was exhausted.
    pub async fn forward(&self, event: &WebhookEvent) -> bool {
        if !self.settings.enabled || event.event != WebhookKind::Complete {
            return true;
        }
        let Some(url) = self.settings.url.as_deref() else {
            return true;
        };

        let payload = CompletionPayload {
            info_hash: &event.hash,
            name: &event.name,
            category: &event.category,
            tags: &event.tags,
            save_path: &event.save_path,
        };

        for attempt in 0..MAX_RETRIES {
            match self.send_once(url, &payload).await {
                Ok(()) => {
                    let mut stats = self.stats.lock().expect("cross-seed stats mutex poisoned");
                    stats.forwarded += 1;
                    drop(stats);
                    self.metrics.inc_cross_seed_forward("success");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, %err, "cross-seed forward attempt failed");
                    let mut stats = self.stats.lock().expect("cross-seed stats mutex poisoned");
                    stats.last_error = Some(err);
                }
            }
            if attempt + 1 < MAX_RETRIES {
                tokio::time::sleep(Duration::from_secs(1_u64 << attempt)).await;
            }
        }

        let mut stats = self.stats.lock().expect("cross-seed stats mutex poisoned");
        stats.failed += 1;
        drop(stats);
        self.metrics.inc_cross_seed_forward("failure");
        false
    }

    async fn send_once(&self, url: &str, payload: &CompletionPayload<'_>) -> Result<(), String> {
        let mut request = self.http.post(url).json(payload);
        if let Some(api_key) = self.settings.api_key.as_deref() {
            request = request.header("X-API-Key", api_key);
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("unexpected status {}", response.status()))
        }
    }

    /// Snapshot of current forwarding counters.
    #[must_use]
    pub fn stats(&self) -> CrossSeedStats {
        self.stats.lock().expect("cross-seed stats mutex poisoned").clone()
    }
}
