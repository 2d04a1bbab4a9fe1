//! Narrow async trait the HTTP handlers drive the cycle orchestrator
//! through.
//!
//! `qguardarr-app` owns [`qguardarr_app::orchestrator::CycleOrchestrator`],
//! which is generic over the qBittorrent client and already depends on this
//! crate (for the router). Routing calls the other way — letting handlers
//! depend on the generic orchestrator type directly — would both create a
//! cycle and force every handler to become generic over the client. This
//! trait is the seam: `qguardarr-app` implements it for
//! `CycleOrchestrator<C>` and hands `ApiState` a type-erased
//! `Arc<dyn OrchestratorHandle>`.

use std::collections::HashMap;

use async_trait::async_trait;
use qguardarr_api_models::{
    CycleStatsDto, HealthState, ManagedTorrentRowDto, MatchTestDetail, PreviewResponse, ResetScope, TrackerStatsDto,
};
use qguardarr_config::QguardarrConfig;

/// Operations the API surface needs from the cycle orchestrator.
#[async_trait]
pub trait OrchestratorHandle: Send + Sync {
    /// Coarse health state, for `GET /health`.
    fn health(&self) -> HealthState;
    /// Seconds since the orchestrator started, for `GET /health`.
    fn uptime_seconds(&self) -> u64;
    /// Currently live rollout percentage.
    fn rollout_percentage(&self) -> u8;
    /// Currently live cycle interval, seconds.
    fn update_interval(&self) -> u64;
    /// Whether limit writes are redirected to the dry-run store.
    fn dry_run(&self) -> bool;
    /// Snapshot of cycle counters.
    fn stats(&self) -> CycleStatsDto;
    /// Per-tracker figures, keyed by tracker id.
    fn tracker_stats(&self) -> HashMap<String, TrackerStatsDto>;
    /// One row per currently managed torrent.
    fn managed_rows(&self) -> Vec<ManagedTorrentRowDto>;
    /// Read-only preview of the next cycle's proposed limits.
    fn preview_next_cycle(&self) -> PreviewResponse;
    /// Classify a tracker announce URL against every configured pattern.
    fn match_test(&self, tracker_url: &str) -> MatchTestDetail;
    /// Snapshot of the currently live configuration.
    fn config_snapshot(&self) -> QguardarrConfig;
    /// Update the live rollout percentage; takes effect on the next tick.
    fn set_rollout_percentage(&self, percentage: u8);
    /// Clear smoothing history for one tracker, or every tracker.
    fn reset_smoothing(&self, tracker_id: Option<&str>);

    /// Run one allocation cycle immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if any cycle phase fails.
    async fn force_cycle(&self) -> anyhow::Result<()>;

    /// Restore every unrestored journal entry to its prior limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or the restore batch
    /// cannot be applied.
    async fn apply_rollback(&self) -> anyhow::Result<usize>;

    /// Reset a scope of managed hashes to unlimited.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or the reset batch
    /// cannot be applied.
    async fn reset_limits(&self, scope: ResetScope, mark_restored: bool) -> anyhow::Result<usize>;

    /// Hot-swap the live configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the new tracker list fails to compile.
    async fn reload_config(&self, config: &QguardarrConfig) -> anyhow::Result<()>;
}
