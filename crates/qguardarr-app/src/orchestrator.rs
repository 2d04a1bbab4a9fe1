//! Cycle orchestrator: the periodic driver that fetches torrents, refreshes
//! the managed-torrent cache, runs the configured allocation strategy,
//! journals and applies limit changes, and sweeps stale cache rows.
//!
//! Also implements [`WebhookHooks`] so the webhook worker can poke the same
//! cache and pending-check state the cycle task owns, under the single
//! `Mutex`-guarded cache the whole module shares.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use qguardarr_alloc::cache::ManagedTorrentCache;
use qguardarr_alloc::diff_gate::needs_update;
use qguardarr_alloc::model::{ScoreBucket, TorrentSnapshot, UNLIMITED};
use qguardarr_alloc::rollout::admit;
use qguardarr_alloc::scorer::{score, should_manage};
use qguardarr_alloc::strategy::{self, SoftParams, SoftSmoothingState, SoftTrackerFigures};
use qguardarr_alloc::tracker_matcher::TrackerMatcher;
use qguardarr_api_models::{
    CycleStatsDto, ManagedTorrentRowDto, MatchTestDetail, PatternMatchDto, PreviewResponse, PreviewTrackerDto,
    ScoreDistributionDto, TrackerStatsDto,
};
use qguardarr_client::{QbittorrentClient, TorrentInfo};
use qguardarr_config::{AllocationStrategy, GlobalSettings, QguardarrConfig, format_speed};
use qguardarr_data::{DryRunStore, PendingChange, RollbackJournal};
use qguardarr_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::cross_seed::CrossSeedForwarder;
use crate::error::{AppError, AppResult};
use crate::webhook::{WebhookHooks, WebhookIngress};

/// Overall health as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Startup has not completed a cycle yet.
    Starting,
    /// Last cycle completed without error.
    Healthy,
    /// The most recent cycle failed; the process is still serving.
    Degraded,
}

/// Score-bucket counts computed during selection, for `/stats`.
pub type ScoreDistribution = ScoreDistributionDto;

/// Per-tracker figures reported by `/stats/trackers`.
pub type TrackerStats = TrackerStatsDto;

/// Snapshot of cycle counters, returned by `/stats` and folded into
/// `/health`.
pub type CycleStats = CycleStatsDto;

fn now_epoch() -> i64 {
    #[expect(clippy::cast_possible_wrap, reason = "unix time fits in i64 until year 292277026596")]
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    secs
}

/// Human-readable rendering of a configured limit, special-casing
/// [`UNLIMITED`] since [`format_speed`] has no notion of it.
fn format_limit(bps: i64) -> String {
    if bps == UNLIMITED { "unlimited".to_string() } else { format_speed(bps) }
}

/// Per-tracker figures for strategies that don't compute cross-tracker
/// borrowing: base, effective, and borrowed are the tracker's static cap,
/// nothing borrowed.
fn flat_tracker_figures(live: &LiveConfig) -> HashMap<String, PreviewTrackerDto> {
    live.matcher
        .all_trackers()
        .iter()
        .map(|tracker| {
            (
                tracker.id.clone(),
                PreviewTrackerDto {
                    base_cap_bps: tracker.max_upload_speed,
                    effective_cap_bps: tracker.max_upload_speed,
                    borrowed_bps: 0,
                },
            )
        })
        .collect()
}

fn to_snapshot(info: &TorrentInfo) -> TorrentSnapshot {
    TorrentSnapshot {
        hash: info.hash.clone(),
        name: info.name.clone(),
        state: info.state.clone(),
        upspeed_bps: info.upspeed,
        num_seeds: info.num_seeds,
        num_leeches: info.num_leechs,
        ratio: info.ratio,
        last_activity_epoch: info.last_activity,
        tracker_url: info.tracker.clone(),
        category: info.category.clone(),
        tags: info.tags.clone(),
    }
}

/// Live (hot-reloadable) portion of the orchestrator's configuration.
struct LiveConfig {
    config: QguardarrConfig,
    matcher: TrackerMatcher,
}

impl LiveConfig {
    fn global(&self) -> &GlobalSettings {
        &self.config.global
    }
}

/// Periodic allocation-cycle driver. Generic over the qBittorrent client so
/// tests can substitute a fake.
pub struct CycleOrchestrator<C: QbittorrentClient> {
    client: Arc<C>,
    journal: Arc<RollbackJournal>,
    dry_run_store: Arc<DryRunStore>,
    metrics: Arc<Metrics>,
    cross_seed: Arc<CrossSeedForwarder>,
    webhook: WebhookIngress,
    started_at: Instant,
    live: RwLock<LiveConfig>,
    cache: Mutex<ManagedTorrentCache>,
    soft_state: Mutex<SoftSmoothingState>,
    pending_checks: Mutex<HashSet<String>>,
    pending_tracker_updates: Mutex<HashSet<String>>,
    last_admitted: Mutex<Vec<TorrentSnapshot>>,
    tracker_figures: Mutex<HashMap<String, SoftTrackerFigures>>,
    stats: Mutex<CycleStats>,
    health: Mutex<HealthStatus>,
}

impl<C: QbittorrentClient> CycleOrchestrator<C> {
    /// Build an orchestrator from its dependencies and starting config.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker list fails to compile.
    #[expect(clippy::too_many_arguments, reason = "all fields are required collaborators, not optional tuning")]
    pub fn new(
        config: &QguardarrConfig,
        client: Arc<C>,
        journal: Arc<RollbackJournal>,
        dry_run_store: Arc<DryRunStore>,
        metrics: Arc<Metrics>,
        cross_seed: Arc<CrossSeedForwarder>,
        webhook: WebhookIngress,
    ) -> AppResult<Self> {
        let matcher = TrackerMatcher::new(config.trackers.clone())
            .map_err(|err| AppError::alloc("build_tracker_matcher", err))?;
        Ok(Self {
            client,
            journal,
            dry_run_store,
            metrics,
            cross_seed,
            webhook,
            started_at: Instant::now(),
            live: RwLock::new(LiveConfig {
                config: config.clone(),
                matcher,
            }),
            cache: Mutex::new(ManagedTorrentCache::new(ManagedTorrentCache::DEFAULT_CAPACITY)),
            soft_state: Mutex::new(SoftSmoothingState::new()),
            pending_checks: Mutex::new(HashSet::new()),
            pending_tracker_updates: Mutex::new(HashSet::new()),
            last_admitted: Mutex::new(Vec::new()),
            tracker_figures: Mutex::new(HashMap::new()),
            stats: Mutex::new(CycleStats::default()),
            health: Mutex::new(HealthStatus::Starting),
        })
    }

    /// Swap in a newly validated configuration's tracker matcher and global
    /// settings, atomically, for the config watcher's hot-reload path.
    ///
    /// # Errors
    ///
    /// Returns an error if the new tracker list fails to compile; the
    /// previous configuration is left live.
    pub fn apply_config(&self, config: &QguardarrConfig) -> AppResult<()> {
        let matcher = TrackerMatcher::new(config.trackers.clone())
            .map_err(|err| AppError::alloc("reload_tracker_matcher", err))?;
        let mut live = self.live.write().expect("live config lock poisoned");
        live.config = config.clone();
        live.matcher = matcher;
        Ok(())
    }

    /// Current health status, for `/health`.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        *self.health.lock().expect("health lock poisoned")
    }

    /// Snapshot of cycle counters, for `/stats` and `/health`.
    #[must_use]
    pub fn stats(&self) -> CycleStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Current rollout percentage, for `/health`.
    #[must_use]
    pub fn rollout_percentage(&self) -> u8 {
        self.live.read().expect("live config lock poisoned").global().rollout_percentage
    }

    /// Update the live rollout percentage (`POST /rollout`); takes effect on
    /// the next cycle tick.
    pub fn set_rollout_percentage(&self, percentage: u8) {
        let mut live = self.live.write().expect("live config lock poisoned");
        live.config.global.rollout_percentage = percentage.clamp(1, 100);
    }

    /// Configured cycle interval, seconds, for `/health`.
    #[must_use]
    pub fn update_interval(&self) -> u64 {
        self.live.read().expect("live config lock poisoned").global().update_interval
    }

    /// Whether limit writes are currently redirected to the dry-run store.
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.live.read().expect("live config lock poisoned").global().dry_run
    }

    /// Clear smoothing history for one tracker, or every tracker.
    pub fn reset_smoothing(&self, tracker_id: Option<&str>) {
        let mut state = self.soft_state.lock().expect("soft state lock poisoned");
        match tracker_id {
            Some(id) => state.reset_one(id),
            None => state.reset_all(),
        }
    }

    /// Per-tracker figures for `/stats/trackers`.
    #[must_use]
    pub fn tracker_stats(&self) -> HashMap<String, TrackerStats> {
        let live = self.live.read().expect("live config lock poisoned");
        let cache = self.cache.lock().expect("cache lock poisoned");
        let figures = self.tracker_figures.lock().expect("tracker figures lock poisoned");
        let mut out = HashMap::new();
        for tracker in live.matcher.all_trackers() {
            let managed_torrents = cache.by_tracker(&tracker.id).count();
            let (effective_cap_bps, borrowed_bps) = figures
                .get(&tracker.id)
                .map_or((tracker.max_upload_speed, 0), |figures| {
                    (figures.effective_cap_bps, figures.borrowed_bps)
                });
            out.insert(
                tracker.id.clone(),
                TrackerStats {
                    managed_torrents,
                    base_cap_bps: tracker.max_upload_speed,
                    effective_cap_bps,
                    borrowed_bps,
                },
            );
        }
        out
    }

    /// Seconds since the orchestrator was constructed, for `/health`.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Snapshot of the currently live configuration, for `GET /config`.
    #[must_use]
    pub fn config_snapshot(&self) -> QguardarrConfig {
        self.live.read().expect("live config lock poisoned").config.clone()
    }

    /// Classify a tracker announce URL against every configured pattern,
    /// for `GET /match/test`.
    #[must_use]
    pub fn match_test(&self, tracker_url: &str) -> MatchTestDetail {
        let live = self.live.read().expect("live config lock poisoned");
        let tracker_id = live.matcher.match_tracker(tracker_url);
        let pattern_matches = live
            .matcher
            .test_pattern_match(tracker_url)
            .into_iter()
            .map(|(tracker_id, matched)| PatternMatchDto { tracker_id, matched })
            .collect();
        MatchTestDetail { tracker_id, pattern_matches }
    }

    /// One row per currently managed torrent, for `GET /stats/managed`.
    #[must_use]
    pub fn managed_rows(&self) -> Vec<ManagedTorrentRowDto> {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .rows()
            .map(|entry| ManagedTorrentRowDto {
                hash: entry.hash.clone(),
                tracker_id: entry.tracker_id.clone(),
                upload_speed_bps: entry.upload_speed_bps,
                current_limit_bps: entry.current_limit_bps,
                last_seen_epoch: entry.last_seen_epoch,
            })
            .collect()
    }

    /// Restore every unrestored journal entry to its prior limit, applying
    /// the batch to the client (or the dry-run store) before marking the
    /// rows restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, or if applying the
    /// batch to the client or dry-run store fails.
    pub async fn apply_rollback(&self) -> AppResult<usize> {
        let unrestored = self
            .journal
            .unrestored_by_hash()
            .await
            .map_err(|err| AppError::data("rollback_unrestored_by_hash", err))?;
        if unrestored.is_empty() {
            return Ok(0);
        }

        let dry_run = self.live.read().expect("live config lock poisoned").global().dry_run;
        self.apply_updates(&unrestored, dry_run).await?;

        let hashes: Vec<String> = unrestored.into_keys().collect();
        let restored = self
            .journal
            .mark_restored(&hashes)
            .await
            .map_err(|err| AppError::data("rollback_mark_restored", err))?;
        #[expect(clippy::cast_possible_truncation, reason = "rollback batches never approach usize::MAX on 32-bit")]
        Ok(restored as usize)
    }

    /// Reset a scope of managed hashes to unlimited, for `POST /limits/reset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, or if applying the
    /// reset to the client or dry-run store fails.
    pub async fn reset_limits(
        &self,
        scope: qguardarr_api_models::ResetScope,
        mark_restored: bool,
    ) -> AppResult<usize> {
        let hashes: Vec<String> = match scope {
            qguardarr_api_models::ResetScope::Unrestored => self
                .journal
                .distinct_hashes(false)
                .await
                .map_err(|err| AppError::data("limits_reset_distinct_hashes", err))?,
            qguardarr_api_models::ResetScope::All => {
                self.cache.lock().expect("cache lock poisoned").hashes().map(str::to_string).collect()
            }
        };
        if hashes.is_empty() {
            return Ok(0);
        }

        let updates: HashMap<String, i64> = hashes.iter().cloned().map(|hash| (hash, UNLIMITED)).collect();
        let dry_run = self.live.read().expect("live config lock poisoned").global().dry_run;
        let reset = self.apply_updates(&updates, dry_run).await?;

        if mark_restored {
            self.journal
                .mark_restored(&hashes)
                .await
                .map_err(|err| AppError::data("limits_reset_mark_restored", err))?;
        }

        #[expect(clippy::cast_possible_truncation, reason = "reset batches never approach usize::MAX on 32-bit")]
        Ok(reset as usize)
    }

    /// Run one allocation cycle end-to-end. Errors from any phase are
    /// reported to the caller; [`Self::run_cycle_tick`] is the version the
    /// background task uses, which additionally marks health degraded and
    /// swallows the error so the next tick starts fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if any phase (fetch, cache refresh, journal, apply)
    /// fails.
    pub async fn run_cycle(&self) -> AppResult<()> {
        let start = Instant::now();
        let now = now_epoch();

        // Phase 1: fetch.
        let torrents = self.fetch_torrents().await?;
        let active_torrents = torrents.len();

        // Phase 2: rollout filter.
        let rollout_percentage = self.live.read().expect("live config lock poisoned").global().rollout_percentage;
        let torrents: Vec<TorrentInfo> =
            torrents.into_iter().filter(|t| admit(&t.hash, rollout_percentage)).collect();

        // Phase 3: selection (weighted/soft only; equal admits everyone).
        let (global_snapshot, strategy_kind) = {
            let live = self.live.read().expect("live config lock poisoned");
            (live.global().clone(), live.global().allocation_strategy)
        };
        let (admitted, distribution) = self.select(torrents, strategy_kind, &global_snapshot);

        // Phase 4: cache refresh.
        self.refresh_cache(&admitted, now).await?;

        // Phase 5: strategy.
        let (mut new_limits, tracker_figures) = {
            let live = self.live.read().expect("live config lock poisoned");
            match strategy_kind {
                AllocationStrategy::Equal => (strategy::equal(&admitted, &live.matcher), HashMap::new()),
                AllocationStrategy::Weighted => (strategy::weighted(&admitted, &live.matcher), HashMap::new()),
                AllocationStrategy::Soft => {
                    let params = SoftParams {
                        borrow_threshold_ratio: global_snapshot.borrow_threshold_ratio,
                        max_borrow_fraction: global_snapshot.max_borrow_fraction,
                        smoothing_alpha: global_snapshot.smoothing_alpha,
                        min_effective_delta: global_snapshot.min_effective_delta,
                    };
                    let mut soft_state = self.soft_state.lock().expect("soft state lock poisoned");
                    strategy::soft(&admitted, &live.matcher, params, Some(&mut soft_state))
                }
            }
        };

        // Phase 6: auto-unlimit unmanaged (optional). A cached hash that
        // drops out of the new-limits map entirely gets proposed unlimited
        // instead of being left untouched.
        if global_snapshot.auto_unlimit_on_inactive {
            let cache = self.cache.lock().expect("cache lock poisoned");
            for hash in cache.hashes() {
                new_limits.entry(hash.to_string()).or_insert(UNLIMITED);
            }
        }

        // Phase 7: differential apply.
        let update_batch = self.select_updates(&new_limits, global_snapshot.differential_threshold);

        // Phase 8: journal, before the client write.
        if !update_batch.is_empty() {
            let pending: Vec<PendingChange> = {
                let cache = self.cache.lock().expect("cache lock poisoned");
                update_batch
                    .iter()
                    .map(|(hash, new_limit)| PendingChange {
                        torrent_hash: hash.clone(),
                        old_limit: cache.get_limit(hash).unwrap_or(UNLIMITED),
                        new_limit: *new_limit,
                        tracker_id: cache.get_tracker(hash).unwrap_or("unknown").to_string(),
                        reason: "allocation_update".to_string(),
                    })
                    .collect()
            };
            #[expect(clippy::cast_precision_loss, reason = "unix seconds fit comfortably in f64")]
            let timestamp = now as f64;
            if let Err(err) = self.journal.record_batch(&pending, timestamp).await {
                warn!(%err, "rollback journal write failed; proceeding without journalling this batch");
            }
        }

        // Phase 9: apply.
        let limits_applied = self.apply_updates(&update_batch, global_snapshot.dry_run).await?;

        // Phase 10: TTL sweep.
        {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            #[expect(clippy::cast_possible_wrap, reason = "cache TTLs are configured well under i64::MAX seconds")]
            let ttl = global_snapshot.cache_ttl_seconds as i64;
            let evicted = cache.sweep(now, ttl);
            if evicted > 0 {
                debug!(evicted, "ttl sweep evicted stale cache rows");
            }
        }

        *self.last_admitted.lock().expect("last admitted lock poisoned") = admitted;

        // Phase 11: stats.
        let duration = start.elapsed();
        self.metrics.observe_cycle_duration(duration);
        self.record_cycle_stats(active_torrents, limits_applied, duration, now, distribution, tracker_figures);
        self.metrics.set_circuit_breaker_open(self.client.circuit_open());

        Ok(())
    }

    /// [`Self::run_cycle`] wrapped with the failure semantics the cycle
    /// task relies on: any error marks health degraded, increments the
    /// error counter, and is swallowed so the next tick starts fresh.
    pub async fn run_cycle_tick(&self) {
        match self.run_cycle().await {
            Ok(()) => {
                *self.health.lock().expect("health lock poisoned") = HealthStatus::Healthy;
            }
            Err(err) => {
                warn!(%err, "allocation cycle failed");
                let mut stats = self.stats.lock().expect("stats lock poisoned");
                stats.errors += 1;
                drop(stats);
                *self.health.lock().expect("health lock poisoned") = HealthStatus::Degraded;
            }
        }
    }

    /// Read-only preview of the next cycle's proposed limits, computed over
    /// the last admitted snapshot set without touching the client or the
    /// soft strategy's persisted smoothing state.
    #[must_use]
    pub fn preview_next_cycle(&self) -> PreviewResponse {
        let admitted = self.last_admitted.lock().expect("last admitted lock poisoned").clone();
        let live = self.live.read().expect("live config lock poisoned");
        let (limits, trackers) = match live.global().allocation_strategy {
            AllocationStrategy::Equal => (strategy::equal(&admitted, &live.matcher), flat_tracker_figures(&live)),
            AllocationStrategy::Weighted => {
                (strategy::weighted(&admitted, &live.matcher), flat_tracker_figures(&live))
            }
            AllocationStrategy::Soft => {
                let params = SoftParams {
                    borrow_threshold_ratio: live.global().borrow_threshold_ratio,
                    max_borrow_fraction: live.global().max_borrow_fraction,
                    smoothing_alpha: live.global().smoothing_alpha,
                    min_effective_delta: live.global().min_effective_delta,
                };
                let (limits, figures) = strategy::soft(&admitted, &live.matcher, params, None);
                let trackers = figures
                    .into_iter()
                    .map(|(tracker_id, figures)| {
                        (
                            tracker_id,
                            PreviewTrackerDto {
                                base_cap_bps: figures.base_cap_bps,
                                effective_cap_bps: figures.effective_cap_bps,
                                borrowed_bps: figures.borrowed_bps,
                            },
                        )
                    })
                    .collect();
                (limits, trackers)
            }
        };
        drop(live);
        let summary = self.summarize_preview(&trackers);
        PreviewResponse { limits, trackers, summary }
    }

    /// Humanized summary of the largest proposed tracker-cap changes against
    /// the currently live figures, for `GET /preview/next-cycle`.
    fn summarize_preview(&self, trackers: &HashMap<String, PreviewTrackerDto>) -> String {
        let current = self.tracker_stats();
        let mut changes: Vec<(String, i64, i64)> = trackers
            .iter()
            .filter_map(|(tracker_id, proposed)| {
                let before = current.get(tracker_id).map_or(proposed.base_cap_bps, |figures| figures.effective_cap_bps);
                let after = proposed.effective_cap_bps;
                (before != after).then_some((tracker_id.clone(), before, after))
            })
            .collect();
        if changes.is_empty() {
            return "no change from current limits".to_string();
        }

        changes.sort_by_key(|(_, before, after)| {
            let comparable = |bps: i64| if bps == UNLIMITED { i64::MAX } else { bps };
            std::cmp::Reverse((comparable(*before) - comparable(*after)).abs())
        });
        changes
            .into_iter()
            .take(3)
            .map(|(tracker_id, before, after)| {
                format!("{tracker_id}: {} -> {}", format_limit(before), format_limit(after))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn fetch_torrents(&self) -> AppResult<Vec<TorrentInfo>> {
        let active = self
            .client
            .get_torrents(true)
            .await
            .map_err(|err| AppError::client("fetch_active_torrents", err))?;
        self.metrics.inc_api_call("get_torrents_active");

        let mut by_hash: HashMap<String, TorrentInfo> =
            active.into_iter().map(|t| (t.hash.clone(), t)).collect();

        let cached_hashes: Vec<String> = {
            let cache = self.cache.lock().expect("cache lock poisoned");
            cache.hashes().map(str::to_string).collect()
        };
        let still_missing = cached_hashes.iter().any(|hash| !by_hash.contains_key(hash));

        if still_missing {
            let all = self
                .client
                .get_torrents(false)
                .await
                .map_err(|err| AppError::client("fetch_all_torrents", err))?;
            self.metrics.inc_api_call("get_torrents_all");
            for torrent in all {
                if cached_hashes.contains(&torrent.hash) {
                    by_hash.entry(torrent.hash.clone()).or_insert(torrent);
                }
            }
        }

        Ok(by_hash.into_values().collect())
    }

    fn select(
        &self,
        torrents: Vec<TorrentInfo>,
        strategy_kind: AllocationStrategy,
        global: &GlobalSettings,
    ) -> (Vec<TorrentSnapshot>, ScoreDistribution) {
        let now = now_epoch();
        let snapshots: Vec<TorrentSnapshot> = torrents.iter().map(to_snapshot).collect();

        if matches!(strategy_kind, AllocationStrategy::Equal) {
            return (snapshots, ScoreDistribution::default());
        }

        let cache_len = self.cache.lock().expect("cache lock poisoned").len();
        let slots_remaining = global.max_managed_torrents.saturating_sub(cache_len);

        let mut distribution = ScoreDistribution::default();
        let mut scored: Vec<(f64, TorrentSnapshot)> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let value = score(&snapshot, now);
            match ScoreBucket::classify(value) {
                ScoreBucket::High => distribution.high += 1,
                ScoreBucket::Medium => distribution.medium += 1,
                ScoreBucket::Low => distribution.low += 1,
                ScoreBucket::Ignored => distribution.ignored += 1,
            }
            if should_manage(value, slots_remaining) {
                scored.push((value, snapshot));
            }
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(global.max_managed_torrents);
        (scored.into_iter().map(|(_, snapshot)| snapshot).collect(), distribution)
    }

    async fn refresh_cache(&self, admitted: &[TorrentSnapshot], now: i64) -> AppResult<()> {
        let max_api_calls = self.live.read().expect("live config lock poisoned").global().max_api_calls_per_cycle;
        let mut api_calls = self.stats.lock().expect("stats lock poisoned").api_calls_last_cycle;

        for snapshot in admitted {
            let tracker_id = {
                let live = self.live.read().expect("live config lock poisoned");
                live.matcher.match_tracker(&snapshot.tracker_url)
            };

            let known_limit = {
                let cache = self.cache.lock().expect("cache lock poisoned");
                cache.get_limit(&snapshot.hash)
            };

            let current_limit = match known_limit {
                Some(limit) => limit,
                None if api_calls < max_api_calls => {
                    api_calls += 1;
                    self.metrics.inc_api_call("get_torrent_upload_limit");
                    self.client
                        .get_torrent_upload_limit(&snapshot.hash)
                        .await
                        .map_err(|err| AppError::client("fetch_current_limit", err))?
                }
                None => UNLIMITED,
            };

            let mut cache = self.cache.lock().expect("cache lock poisoned");
            if cache.contains(&snapshot.hash) {
                cache.update(&snapshot.hash, snapshot.upspeed_bps, current_limit, now);
            } else if !cache.insert(&snapshot.hash, &tracker_id, snapshot.upspeed_bps, current_limit, now) {
                warn!(hash = %snapshot.hash, "managed-torrent cache full; dropping candidate for this cycle");
            }
        }

        self.stats.lock().expect("stats lock poisoned").api_calls_last_cycle = api_calls;
        Ok(())
    }

    fn select_updates(&self, new_limits: &HashMap<String, i64>, threshold: f64) -> HashMap<String, i64> {
        let cache = self.cache.lock().expect("cache lock poisoned");
        let mut updates = HashMap::new();
        for (hash, &new_limit) in new_limits {
            match cache.get_limit(hash) {
                None => {
                    updates.insert(hash.clone(), new_limit);
                }
                Some(current) if needs_update(current, new_limit, threshold) => {
                    updates.insert(hash.clone(), new_limit);
                }
                Some(_) => {}
            }
        }
        updates
    }

    async fn apply_updates(&self, updates: &HashMap<String, i64>, dry_run: bool) -> AppResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        if dry_run {
            self.dry_run_store
                .set_many(updates)
                .await
                .map_err(|err| AppError::data("dry_run_set_many", err))?;
        } else {
            self.client
                .set_upload_limits_batch(updates)
                .await
                .map_err(|err| AppError::client("set_upload_limits_batch", err))?;
            self.metrics.inc_api_call("set_upload_limit");
        }

        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for (hash, &limit) in updates {
            cache.set_current_limit(hash, limit);
        }
        drop(cache);

        #[expect(clippy::cast_possible_truncation, reason = "cycle batches never approach u64::MAX")]
        let count = updates.len() as u64;
        self.metrics.inc_limits_changed(count);
        Ok(count)
    }

    #[expect(clippy::too_many_arguments, reason = "all fields belong to one cycle's stats snapshot")]
    fn record_cycle_stats(
        &self,
        active_torrents: usize,
        limits_applied: u64,
        duration: Duration,
        now: i64,
        distribution: ScoreDistribution,
        tracker_figures: HashMap<String, SoftTrackerFigures>,
    ) {
        let (managed_torrents, cache_capacity) = {
            let cache = self.cache.lock().expect("cache lock poisoned");
            (cache.len(), cache.capacity())
        };
        #[expect(clippy::cast_possible_wrap, reason = "managed-torrent counts never approach i64::MAX")]
        let managed_i64 = managed_torrents as i64;
        self.metrics.set_torrents_managed(managed_i64);

        *self.tracker_figures.lock().expect("tracker figures lock poisoned") = tracker_figures;

        let matcher_stats = self.live.read().expect("live config lock poisoned").matcher.stats();
        let cross_seed_stats = self.cross_seed.stats();
        let webhook_stats = self.webhook.stats();

        #[expect(clippy::cast_precision_loss, reason = "cache occupancy fits comfortably in f64")]
        let utilization_percent = if cache_capacity == 0 {
            0.0
        } else {
            (managed_torrents as f64 / cache_capacity as f64) * 100.0
        };

        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.cycles_completed += 1;
        stats.active_torrents = active_torrents;
        stats.managed_torrents = managed_torrents;
        stats.limits_applied_last_cycle = limits_applied;
        #[expect(clippy::cast_possible_truncation, reason = "cycle durations never approach u64::MAX ms")]
        let duration_ms = duration.as_millis() as u64;
        stats.last_cycle_duration_ms = duration_ms;
        #[expect(clippy::cast_sign_loss, reason = "now_epoch is always non-negative in practice")]
        let last_cycle_time = now as u64;
        stats.last_cycle_time = Some(last_cycle_time);
        stats.score_distribution = distribution;
        stats.cross_seed = qguardarr_api_models::CrossSeedStatsDto {
            forwarded: cross_seed_stats.forwarded,
            failed: cross_seed_stats.failed,
            last_error: cross_seed_stats.last_error,
        };
        stats.webhook = webhook_stats;
        stats.cache = qguardarr_api_models::CacheStatsDto {
            used: managed_torrents,
            capacity: cache_capacity,
            utilization_percent,
        };
        stats.tracker_matcher = qguardarr_api_models::TrackerMatcherStatsDto {
            cache_size: matcher_stats.cache_size,
            cache_hits: matcher_stats.cache_hits,
            cache_misses: matcher_stats.cache_misses,
            pattern_matches: matcher_stats.pattern_matches,
            failed_matches: matcher_stats.failed_matches,
            hit_rate_percent: matcher_stats.hit_rate_percent(),
        };
        drop(stats);

        info!(
            managed = managed_torrents,
            limits_applied,
            duration_ms,
            "allocation cycle completed"
        );
    }
}

#[async_trait::async_trait]
impl<C: QbittorrentClient> qguardarr_api::OrchestratorHandle for CycleOrchestrator<C> {
    fn health(&self) -> qguardarr_api_models::HealthState {
        match self.health() {
            HealthStatus::Starting => qguardarr_api_models::HealthState::Starting,
            HealthStatus::Healthy => qguardarr_api_models::HealthState::Healthy,
            HealthStatus::Degraded => qguardarr_api_models::HealthState::Degraded,
        }
    }

    fn uptime_seconds(&self) -> u64 {
        Self::uptime_seconds(self)
    }

    fn rollout_percentage(&self) -> u8 {
        Self::rollout_percentage(self)
    }

    fn update_interval(&self) -> u64 {
        Self::update_interval(self)
    }

    fn dry_run(&self) -> bool {
        Self::dry_run(self)
    }

    fn stats(&self) -> CycleStats {
        Self::stats(self)
    }

    fn tracker_stats(&self) -> HashMap<String, TrackerStats> {
        Self::tracker_stats(self)
    }

    fn managed_rows(&self) -> Vec<ManagedTorrentRowDto> {
        Self::managed_rows(self)
    }

    fn preview_next_cycle(&self) -> qguardarr_api_models::PreviewResponse {
        Self::preview_next_cycle(self)
    }

    fn match_test(&self, tracker_url: &str) -> MatchTestDetail {
        Self::match_test(self, tracker_url)
    }

    fn config_snapshot(&self) -> QguardarrConfig {
        Self::config_snapshot(self)
    }

    fn set_rollout_percentage(&self, percentage: u8) {
        Self::set_rollout_percentage(self, percentage);
    }

    fn reset_smoothing(&self, tracker_id: Option<&str>) {
        Self::reset_smoothing(self, tracker_id);
    }

    async fn force_cycle(&self) -> anyhow::Result<()> {
        self.run_cycle().await?;
        Ok(())
    }

    async fn apply_rollback(&self) -> anyhow::Result<usize> {
        Ok(self.apply_rollback().await?)
    }

    async fn reset_limits(&self, scope: qguardarr_api_models::ResetScope, mark_restored: bool) -> anyhow::Result<usize> {
        Ok(self.reset_limits(scope, mark_restored).await?)
    }

    async fn reload_config(&self, config: &QguardarrConfig) -> anyhow::Result<()> {
        self.apply_config(config)?;
        Ok(())
    }
}

impl<C: QbittorrentClient> WebhookHooks for CycleOrchestrator<C> {
    fn mark_for_check(&self, hash: &str) {
        self.pending_checks.lock().expect("pending checks lock poisoned").insert(hash.to_string());
    }

    fn schedule_tracker_update(&self, tracker: &str) {
        self.pending_tracker_updates
            .lock()
            .expect("pending tracker updates lock poisoned")
            .insert(tracker.to_string());
    }

    fn handle_delete(&self, hash: &str) {
        self.cache.lock().expect("cache lock poisoned").remove(hash);
        self.pending_checks.lock().expect("pending checks lock poisoned").remove(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qguardarr_client::ClientResult;
    use qguardarr_config::{CrossSeedSettings, LoggingSettings, QbittorrentSettings, RollbackSettings, TrackerConfig};
    use tempfile::tempdir;

    struct FakeClient {
        torrents: Vec<TorrentInfo>,
    }

    #[async_trait]
    impl QbittorrentClient for FakeClient {
        async fn get_torrents(&self, _filter_active: bool) -> ClientResult<Vec<TorrentInfo>> {
            Ok(self.torrents.clone())
        }

        async fn get_torrent_upload_limit(&self, _hash: &str) -> ClientResult<i64> {
            Ok(-1)
        }

        async fn set_upload_limits_batch(&self, _limits: &HashMap<String, i64>) -> ClientResult<()> {
            Ok(())
        }

        fn circuit_open(&self) -> bool {
            false
        }
    }

    fn torrent(hash: &str, tracker: &str, upspeed: i64) -> TorrentInfo {
        TorrentInfo {
            hash: hash.to_string(),
            name: hash.to_string(),
            state: "uploading".to_string(),
            upspeed,
            num_seeds: 1,
            num_leechs: 0,
            ratio: 1.0,
            category: String::new(),
            tags: String::new(),
            last_activity: 0,
            tracker: tracker.to_string(),
        }
    }

    fn config() -> QguardarrConfig {
        QguardarrConfig {
            global: GlobalSettings {
                update_interval: 300,
                active_torrent_threshold_kb: 10,
                max_api_calls_per_cycle: 500,
                differential_threshold: 0.2,
                rollout_percentage: 100,
                cache_ttl_seconds: 1_800,
                max_managed_torrents: 1_000,
                allocation_strategy: AllocationStrategy::Equal,
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
            trackers: vec![
                TrackerConfig {
                    id: "t".to_string(),
                    name: "T".to_string(),
                    pattern: r"t\.example".to_string(),
                    max_upload_speed: 1_000_000,
                    priority: 1,
                },
                TrackerConfig {
                    id: "catch-all".to_string(),
                    name: "Catch All".to_string(),
                    pattern: ".*".to_string(),
                    max_upload_speed: -1,
                    priority: 1,
                },
            ],
            rollback: RollbackSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    async fn build_orchestrator(torrents: Vec<TorrentInfo>) -> (tempfile::TempDir, CycleOrchestrator<FakeClient>) {
        let dir = tempdir().expect("tempdir");
        let journal = Arc::new(
            RollbackJournal::open(&dir.path().join("rollback.db"))
                .await
                .expect("journal open"),
        );
        let dry_run_store = Arc::new(
            DryRunStore::load(&dir.path().join("dry_run.json"))
                .await
                .expect("dry run store"),
        );
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let client = Arc::new(FakeClient { torrents });
        let cross_seed = Arc::new(
            CrossSeedForwarder::new(CrossSeedSettings::default(), Arc::clone(&metrics)).expect("build cross-seed"),
        );
        let (webhook, _webhook_receiver) = crate::webhook::channel(Arc::clone(&metrics));
        let orchestrator =
            CycleOrchestrator::new(&config(), client, journal, dry_run_store, metrics, cross_seed, webhook)
                .expect("build");
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn cycle_applies_equal_split_in_dry_run() {
        let (_dir, orchestrator) = build_orchestrator(vec![
            torrent("h1", "https://t.example/announce", 0),
            torrent("h2", "https://t.example/announce", 0),
        ])
        .await;

        orchestrator.run_cycle().await.expect("cycle succeeds");

        let stats = orchestrator.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.managed_torrents, 2);
        assert_eq!(stats.limits_applied_last_cycle, 2);
    }

    #[tokio::test]
    async fn run_cycle_tick_marks_health_healthy_on_success() {
        let (_dir, orchestrator) =
            build_orchestrator(vec![torrent("h1", "https://t.example/announce", 0)]).await;
        orchestrator.run_cycle_tick().await;
        assert_eq!(orchestrator.health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn webhook_delete_hook_removes_cache_row_and_pending_check() {
        let (_dir, orchestrator) =
            build_orchestrator(vec![torrent("h1", "https://t.example/announce", 0)]).await;
        orchestrator.run_cycle().await.expect("cycle succeeds");
        assert!(orchestrator.cache.lock().expect("cache lock poisoned").contains("h1"));

        orchestrator.mark_for_check("h1");
        orchestrator.handle_delete("h1");

        assert!(!orchestrator.cache.lock().expect("cache lock poisoned").contains("h1"));
        assert!(!orchestrator.pending_checks.lock().expect("pending checks lock poisoned").contains("h1"));
    }

    #[tokio::test]
    async fn second_cycle_suppresses_unchanged_limits() {
        let (_dir, orchestrator) = build_orchestrator(vec![torrent("h1", "https://t.example/announce", 0)]).await;
        orchestrator.run_cycle().await.expect("first cycle");
        orchestrator.run_cycle().await.expect("second cycle");
        let stats = orchestrator.stats();
        assert_eq!(stats.limits_applied_last_cycle, 0);
    }

    #[tokio::test]
    async fn reset_limits_all_scope_sets_every_managed_hash_unlimited() {
        let (_dir, orchestrator) = build_orchestrator(vec![
            torrent("h1", "https://t.example/announce", 0),
            torrent("h2", "https://t.example/announce", 0),
        ])
        .await;
        orchestrator.run_cycle().await.expect("cycle succeeds");

        let reset = orchestrator
            .reset_limits(qguardarr_api_models::ResetScope::All, false)
            .await
            .expect("reset succeeds");
        assert_eq!(reset, 2);
        assert_eq!(
            orchestrator.cache.lock().expect("cache lock poisoned").get_limit("h1"),
            Some(UNLIMITED)
        );
    }

    #[tokio::test]
    async fn apply_rollback_restores_and_marks_journal_entries() {
        let (_dir, orchestrator) = build_orchestrator(vec![torrent("h1", "https://t.example/announce", 0)]).await;
        orchestrator.run_cycle().await.expect("first cycle writes a journal entry");

        let restored = orchestrator.apply_rollback().await.expect("rollback succeeds");
        assert_eq!(restored, 1);

        let unrestored = orchestrator
            .journal
            .unrestored_by_hash()
            .await
            .expect("journal read succeeds");
        assert!(unrestored.is_empty());
    }
}
