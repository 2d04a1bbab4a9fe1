//! qBittorrent Web API v2 client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use qguardarr_config::QbittorrentSettings;
use reqwest::{Client, StatusCode};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{ClientError, ClientResult};
use crate::model::{primary_tracker, TorrentInfo, TrackerEntry};

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const BATCH_SIZE: usize = 50;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Consumed subset of qBittorrent's Web API v2, as an async trait so the
/// orchestrator can be tested against a fake implementation.
#[async_trait]
pub trait QbittorrentClient: Send + Sync {
    /// List torrents, optionally restricted to `filter=active`.
    async fn get_torrents(&self, filter_active: bool) -> ClientResult<Vec<TorrentInfo>>;

    /// Current upload limit for a single torrent, `-1` meaning unlimited.
    async fn get_torrent_upload_limit(&self, hash: &str) -> ClientResult<i64>;

    /// Push upload limits for many torrents, grouped by identical limit
    /// value and paged into batches of 50 with a small inter-batch delay.
    async fn set_upload_limits_batch(&self, limits: &HashMap<String, i64>) -> ClientResult<()>;

    /// Whether the circuit breaker is currently open.
    fn circuit_open(&self) -> bool;
}

/// `reqwest`-backed [`QbittorrentClient`] with cookie-session auth, a
/// single re-auth-on-403 retry, minimum inter-request spacing, and a
/// circuit breaker around every call.
pub struct ReqwestQbittorrentClient {
    http: Client,
    base_url: String,
    settings: QbittorrentSettings,
    authenticated: Mutex<bool>,
    last_request_at: Mutex<Option<Instant>>,
    circuit_breaker: CircuitBreaker,
}

impl ReqwestQbittorrentClient {
    /// Build a client for the given connection settings. Does not perform
    /// I/O; the first request triggers authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(settings: QbittorrentSettings) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|source| ClientError::Request {
                endpoint: "client builder".to_string(),
                source,
            })?;

        let base_url = format!("http://{}:{}", settings.host, settings.port);

        Ok(Self {
            http,
            base_url,
            settings,
            authenticated: Mutex::new(false),
            last_request_at: Mutex::new(None),
            circuit_breaker: CircuitBreaker::new(CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_RECOVERY_TIMEOUT),
        })
    }

    async fn authenticate(&self) -> ClientResult<()> {
        let endpoint = "/api/v2/auth/login";
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("username", self.settings.username.as_str()),
                ("password", self.settings.password.as_str()),
            ])
            .send()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let body = response.text().await.map_err(|source| ClientError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if body.trim() == "Ok." {
            *self.authenticated.lock().expect("auth mutex poisoned") = true;
            tracing::debug!("authenticated with qbittorrent");
            Ok(())
        } else {
            Err(ClientError::AuthRejected { body })
        }
    }

    async fn throttle(&self) {
        let wait = {
            let mut last = self.last_request_at.lock().expect("throttle mutex poisoned");
            let wait = last
                .map(|at| MIN_REQUEST_INTERVAL.saturating_sub(at.elapsed()))
                .unwrap_or_default();
            *last = Some(Instant::now());
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Issue a request, authenticating first if needed, retrying exactly
    /// once on a `403` after a fresh re-auth. Tracks the circuit breaker.
    async fn request(
        &self,
        endpoint: &str,
        build: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
    ) -> ClientResult<reqwest::Response> {
        if !self.circuit_breaker.can_execute() {
            return Err(ClientError::CircuitOpen);
        }

        if !*self.authenticated.lock().expect("auth mutex poisoned") {
            self.authenticate().await?;
        }

        self.throttle().await;

        let url = format!("{}{endpoint}", self.base_url);

        let result = self.try_once(endpoint, build(&self.http, &url)).await;
        let response = match result {
            Ok(response) if response.status() == StatusCode::FORBIDDEN => {
                tracing::warn!("qbittorrent session expired, re-authenticating");
                self.authenticate().await?;
                let retry = build(&self.http, &url);
                self.try_once(endpoint, retry).await?
            }
            Ok(response) => response,
            Err(err) => {
                self.circuit_breaker.on_failure();
                return Err(err);
            }
        };

        if response.status().is_success() {
            self.circuit_breaker.on_success();
            Ok(response)
        } else {
            self.circuit_breaker.on_failure();
            Err(ClientError::AuthRejected {
                body: format!("unexpected status {}", response.status()),
            })
        }
    }

    async fn try_once(
        &self,
        endpoint: &str,
        builder: reqwest::RequestBuilder,
    ) -> ClientResult<reqwest::Response> {
        builder.send().await.map_err(|source| ClientError::Request {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn get_torrent_trackers(&self, hash: &str) -> ClientResult<Vec<TrackerEntry>> {
        let endpoint = "/api/v2/torrents/trackers";
        let hash = hash.to_string();
        let response = self
            .request(endpoint, move |client, url| client.get(url).query(&[("hash", hash.as_str())]))
            .await?;
        response
            .json::<Vec<TrackerEntry>>()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[async_trait]
impl QbittorrentClient for ReqwestQbittorrentClient {
    async fn get_torrents(&self, filter_active: bool) -> ClientResult<Vec<TorrentInfo>> {
        let endpoint = "/api/v2/torrents/info";
        let response = self
            .request(endpoint, move |client, url| {
                let mut request = client.get(url);
                if filter_active {
                    request = request.query(&[("filter", "uploading")]);
                }
                request
            })
            .await?;

        let mut torrents: Vec<TorrentInfo> =
            response.json().await.map_err(|source| ClientError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        for torrent in &mut torrents {
            let trackers = self.get_torrent_trackers(&torrent.hash).await.unwrap_or_default();
            torrent.tracker = primary_tracker(&trackers);
        }

        Ok(torrents)
    }

    async fn get_torrent_upload_limit(&self, hash: &str) -> ClientResult<i64> {
        let endpoint = "/api/v2/torrents/properties";
        let hash = hash.to_string();
        let response = self
            .request(endpoint, move |client, url| client.get(url).query(&[("hash", hash.as_str())]))
            .await?;

        let properties: serde_json::Value =
            response.json().await.map_err(|source| ClientError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(properties.get("up_limit").and_then(serde_json::Value::as_i64).unwrap_or(-1))
    }

    async fn set_upload_limits_batch(&self, limits: &HashMap<String, i64>) -> ClientResult<()> {
        if limits.is_empty() {
            return Ok(());
        }

        let mut by_limit: HashMap<i64, Vec<&str>> = HashMap::new();
        for (hash, limit) in limits {
            by_limit.entry(*limit).or_default().push(hash.as_str());
        }

        let endpoint = "/api/v2/torrents/setUploadLimit";
        for (limit, hashes) in by_limit {
            for chunk in hashes.chunks(BATCH_SIZE) {
                let joined = chunk.join("|");
                let limit_str = limit.to_string();
                self.request(endpoint, move |client, url| {
                    client.post(url).form(&[("hashes", joined.as_str()), ("limit", limit_str.as_str())])
                })
                .await?;
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }

        Ok(())
    }

    fn circuit_open(&self) -> bool {
        self.circuit_breaker.is_open()
    }
}
