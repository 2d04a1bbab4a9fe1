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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Shared HTTP DTOs for the qguardarr API.
//!
//! Kept dependency-free of the orchestrator and client crates so both the
//! API server and its eventual callers can depend on this crate without
//! pulling in the allocation engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    /// URI reference identifying the problem type.
    pub kind: String,
    /// Short, human-readable summary of the issue.
    pub title: String,
    /// HTTP status code associated with the error.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Detailed diagnostic message when available.
    pub detail: Option<String>,
}

impl ProblemDetails {
    /// Build a problem document from a status code and detail message.
    #[must_use]
    pub fn new(kind: &str, title: &str, status: u16, detail: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            status,
            detail,
        }
    }
}

/// Overall health as reported by `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Startup has not completed a cycle yet.
    Starting,
    /// Last cycle completed without error.
    Healthy,
    /// The most recent cycle failed; the process is still serving.
    Degraded,
    /// The process cannot serve requests at all.
    Unhealthy,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Coarse health state.
    pub status: HealthState,
    /// Seconds since the process started.
    pub uptime_seconds: u64,
    /// Currently configured rollout percentage.
    pub rollout_percentage: u8,
    /// Configured cycle interval, seconds.
    pub update_interval: u64,
    /// Whether limit writes are redirected to the dry-run store.
    pub dry_run: bool,
    /// Cycle counters as of the last completed cycle.
    pub last_cycle: CycleStatsDto,
}

/// Score-bucket counts computed during selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreDistributionDto {
    /// Admitted unconditionally.
    pub high: usize,
    /// Admitted while slots remained.
    pub medium: usize,
    /// Admitted only under heavy slot slack.
    pub low: usize,
    /// Not admitted this cycle.
    pub ignored: usize,
}

/// Cross-seed forwarding counters, part of `GET /stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossSeedStatsDto {
    /// Completions successfully forwarded.
    pub forwarded: u64,
    /// Completions that exhausted retries without success.
    pub failed: u64,
    /// Most recent failure message, if any.
    pub last_error: Option<String>,
}

/// Webhook ingress queue depth and processing counters, part of
/// `GET /stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookStatsDto {
    /// Events currently queued, awaiting the worker.
    pub queue_size: usize,
    /// Total events accepted into the queue.
    pub events_received: u64,
    /// Total events the worker has finished dispatching.
    pub events_processed: u64,
    /// Total events dropped because the queue was full.
    pub events_dropped: u64,
    /// Total dispatch handlers that panicked.
    pub processing_errors: u64,
    /// Events processed per second since the most recent event; `0.0` once
    /// idle for a while or before any event has been processed.
    pub processing_rate: f64,
}

/// Managed-torrent cache utilization, part of `GET /stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStatsDto {
    /// Rows currently occupied.
    pub used: usize,
    /// Fixed row capacity.
    pub capacity: usize,
    /// `used / capacity`, as a percentage.
    pub utilization_percent: f64,
}

/// Tracker-matcher pattern cache statistics, part of `GET /stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackerMatcherStatsDto {
    /// Entries currently held in the match cache.
    pub cache_size: usize,
    /// Cache hits since the matcher (or its cache) was last reset.
    pub cache_hits: u64,
    /// Cache misses since the matcher (or its cache) was last reset.
    pub cache_misses: u64,
    /// Lookups resolved to a non-catch-all pattern.
    pub pattern_matches: u64,
    /// Lookups that fell through to the catch-all pattern.
    pub failed_matches: u64,
    /// Hit rate as a percentage, rounded to one decimal place.
    pub hit_rate_percent: f64,
}

/// Cycle counters returned by `GET /stats` and folded into `GET /health`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStatsDto {
    /// Number of cycles that have completed (successfully or not).
    pub cycles_completed: u64,
    /// Torrents returned by the most recent fetch phase.
    pub active_torrents: usize,
    /// Torrents admitted into management this cycle.
    pub managed_torrents: usize,
    /// Limit changes written (or dry-run recorded) this cycle.
    pub limits_applied_last_cycle: u64,
    /// qBittorrent API calls issued this cycle.
    pub api_calls_last_cycle: u32,
    /// Cycles that ended in an error.
    pub errors: u64,
    /// Wall-clock duration of the last cycle, in milliseconds.
    pub last_cycle_duration_ms: u64,
    /// Unix timestamp the last cycle started, if any cycle has run.
    pub last_cycle_time: Option<u64>,
    /// Score-bucket distribution from the last cycle's selection phase.
    pub score_distribution: ScoreDistributionDto,
    /// Cross-seed forwarding counters.
    pub cross_seed: CrossSeedStatsDto,
    /// Webhook ingress queue depth and processing counters.
    pub webhook: WebhookStatsDto,
    /// Managed-torrent cache utilization.
    pub cache: CacheStatsDto,
    /// Tracker-matcher pattern cache statistics.
    pub tracker_matcher: TrackerMatcherStatsDto,
}

/// Per-tracker figures returned by `GET /stats/trackers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatsDto {
    /// Number of torrents currently managed under this tracker.
    pub managed_torrents: usize,
    /// Statically configured cap.
    pub base_cap_bps: i64,
    /// Cap actually distributed this cycle (equals `base_cap_bps` outside
    /// the soft strategy).
    pub effective_cap_bps: i64,
    /// `effective_cap_bps - base_cap_bps`.
    pub borrowed_bps: i64,
}

/// Response body for `GET /stats/trackers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatsResponse {
    /// Per-tracker figures, keyed by tracker id.
    pub trackers: HashMap<String, TrackerStatsDto>,
}

/// One row of `GET /stats/managed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTorrentRowDto {
    /// Torrent info hash.
    pub hash: String,
    /// Tracker id the torrent is matched to.
    pub tracker_id: String,
    /// Upload speed observed at the last cache refresh, bytes/sec.
    pub upload_speed_bps: i64,
    /// Limit currently believed to be in effect, bytes/sec (`-1` = unlimited).
    pub current_limit_bps: i64,
    /// Unix timestamp of the last cache refresh for this row.
    pub last_seen_epoch: i64,
}

/// Response body for `GET /stats/managed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTorrentsResponse {
    /// One row per managed torrent.
    pub torrents: Vec<ManagedTorrentRowDto>,
}

/// Per-tracker figures returned by `GET /preview/next-cycle`, mirroring
/// [`TrackerStatsDto`]'s cap fields without the managed-torrent count (the
/// preview has not refreshed the cache).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PreviewTrackerDto {
    /// Statically configured cap.
    pub base_cap_bps: i64,
    /// Cap that would be distributed this cycle.
    pub effective_cap_bps: i64,
    /// `effective_cap_bps - base_cap_bps`.
    pub borrowed_bps: i64,
}

/// Response body for `GET /preview/next-cycle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    /// Proposed per-torrent limits, bytes/sec, keyed by info hash.
    pub limits: HashMap<String, i64>,
    /// Proposed per-tracker cap/borrow figures, keyed by tracker id.
    pub trackers: HashMap<String, PreviewTrackerDto>,
    /// Humanized summary of the largest proposed changes.
    pub summary: String,
}

/// Request body for `POST /rollback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// Must be `true`; otherwise the request is rejected with 400.
    pub confirm: bool,
    /// Free-form audit note.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response body for `POST /rollback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResponse {
    /// Number of rows restored to their prior limit.
    pub restored: usize,
}

/// Scope of a `POST /limits/reset` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    /// Only hashes with unrestored journal entries.
    Unrestored,
    /// Every currently managed hash.
    All,
}

/// Request body for `POST /limits/reset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsResetRequest {
    /// Must be `true`; otherwise the request is rejected with 400.
    pub confirm: bool,
    /// Which hashes to reset to unlimited.
    pub scope: ResetScope,
    /// Whether matching journal rows should also be marked restored.
    #[serde(default)]
    pub mark_restored: bool,
}

/// Response body for `POST /limits/reset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsResetResponse {
    /// Number of hashes reset to unlimited.
    pub reset: usize,
}

/// Request body for `POST /rollout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRequest {
    /// New rollout percentage, `1..=100`.
    pub percentage: u8,
}

/// Request body for `POST /smoothing/reset`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmoothingResetRequest {
    /// Reset a single tracker's smoothing history.
    #[serde(default)]
    pub tracker_id: Option<String>,
    /// Reset every tracker's smoothing history.
    #[serde(default)]
    pub all: bool,
}

/// One configured pattern's verdict against the tested URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatchDto {
    /// Tracker id the pattern belongs to.
    pub tracker_id: String,
    /// Whether this tracker's pattern matched the URL.
    pub matched: bool,
}

/// Orchestrator-side result of classifying a tracker announce URL, before
/// the handler adds back the URL that was tested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchTestDetail {
    /// Tracker id the URL was matched to.
    pub tracker_id: String,
    /// Every configured pattern's verdict against the URL, in declaration
    /// order.
    pub pattern_matches: Vec<PatternMatchDto>,
}

/// Response body for `GET /match/test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTestResponse {
    /// Tracker announce URL that was tested.
    pub url: String,
    /// Tracker id the URL was matched to.
    pub tracker_id: String,
    /// Every configured pattern's verdict against the URL, in declaration
    /// order, for debugging ambiguous tracker configurations.
    pub pattern_matches: Vec<PatternMatchDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_details_round_trips_through_json() {
        let problem = ProblemDetails::new("about:blank", "bad request", 400, Some("confirm required".to_string()));
        let json = serde_json::to_string(&problem).expect("serialize");
        let parsed: ProblemDetails = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, problem);
    }

    #[test]
    fn limits_reset_request_defaults_mark_restored_to_false() {
        let json = r#"{"confirm":true,"scope":"unrestored"}"#;
        let parsed: LimitsResetRequest = serde_json::from_str(json).expect("deserialize");
        assert!(!parsed.mark_restored);
        assert_eq!(parsed.scope, ResetScope::Unrestored);
    }
}
