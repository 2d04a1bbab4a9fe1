//! Typed configuration models.
//!
//! Pure data carriers deserialized from the TOML configuration document.
//! Validation lives in [`crate::validate`]; this module only describes shape.

use serde::{Deserialize, Serialize};

/// A single tracker rule: a regex pattern matched against torrent tracker
/// URLs and the upload budget it governs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Stable identifier referenced by the cache, journal, and API.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Regex pattern matched against a torrent's tracker announce URL.
    pub pattern: String,
    /// Upload budget for torrents matched to this tracker, in bytes/sec.
    /// `-1` means unlimited.
    pub max_upload_speed: i64,
    /// Relative priority (1-10) used by the weighted strategy.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

const fn default_priority() -> u8 {
    1
}

/// Which allocation strategy (§4.5) a cycle runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Equal split per tracker.
    #[default]
    Equal,
    /// Intra-tracker weighted split.
    Weighted,
    /// Cross-tracker borrowing with smoothing.
    Soft,
}

/// Global cycle and API behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalSettings {
    /// Seconds between allocation cycles.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Upload speed (KiB/s) above which a torrent is considered active.
    #[serde(default = "default_active_threshold_kb")]
    pub active_torrent_threshold_kb: u64,
    /// Ceiling on qBittorrent API calls issued within one cycle.
    #[serde(default = "default_max_api_calls")]
    pub max_api_calls_per_cycle: u32,
    /// Fractional change required before a limit update is pushed (0.05-1.0).
    #[serde(default = "default_differential_threshold")]
    pub differential_threshold: f64,
    /// Percentage (1-100) of torrents admitted by the rollout gate.
    #[serde(default = "default_rollout_percentage")]
    pub rollout_percentage: u8,
    /// Seconds a cache row may go unseen before the TTL sweep evicts it.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Upper bound on how many torrents the weighted/soft strategies admit.
    #[serde(default = "default_max_managed_torrents")]
    pub max_managed_torrents: usize,
    /// Which allocation strategy (§4.5) a cycle runs.
    #[serde(default)]
    pub allocation_strategy: AllocationStrategy,
    /// Usage fraction of `base_cap` above which a tracker starts donating
    /// slack / demanding a borrow, for the soft strategy.
    #[serde(default = "default_borrow_threshold_ratio")]
    pub borrow_threshold_ratio: f64,
    /// Maximum fraction of `base_cap` a tracker may borrow, for the soft
    /// strategy.
    #[serde(default = "default_max_borrow_fraction")]
    pub max_borrow_fraction: f64,
    /// Exponential smoothing factor applied to the soft strategy's raw
    /// effective cap.
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
    /// Relative-change floor below which the soft strategy's smoothed cap
    /// reuses the previous cycle's value.
    #[serde(default = "default_min_effective_delta")]
    pub min_effective_delta: f64,
    /// When true, cycles compute and log limits but never push them.
    #[serde(default)]
    pub dry_run: bool,
    /// Path to the dry-run store's JSON document.
    #[serde(default = "default_dry_run_store_path")]
    pub dry_run_store_path: String,
    /// When true, a cached hash that drops out of the new-limits map
    /// entirely is proposed `-1` (unlimited) instead of left untouched.
    #[serde(default)]
    pub auto_unlimit_on_inactive: bool,
    /// HTTP bind host for the management API.
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP bind port for the management API.
    #[serde(default = "default_port")]
    pub port: u16,
}

const fn default_update_interval() -> u64 {
    300
}
const fn default_active_threshold_kb() -> u64 {
    10
}
const fn default_max_api_calls() -> u32 {
    500
}
const fn default_differential_threshold() -> f64 {
    0.2
}
const fn default_rollout_percentage() -> u8 {
    10
}
const fn default_cache_ttl_seconds() -> u64 {
    1_800
}
const fn default_max_managed_torrents() -> usize {
    1_000
}
const fn default_borrow_threshold_ratio() -> f64 {
    0.8
}
const fn default_max_borrow_fraction() -> f64 {
    0.5
}
const fn default_smoothing_alpha() -> f64 {
    0.3
}
const fn default_min_effective_delta() -> f64 {
    0.05
}
fn default_dry_run_store_path() -> String {
    "./data/dry_run_limits.json".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
const fn default_port() -> u16 {
    8089
}

/// qBittorrent Web API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QbittorrentSettings {
    /// qBittorrent Web UI host.
    #[serde(default = "default_qbit_host")]
    pub host: String,
    /// qBittorrent Web UI port.
    #[serde(default = "default_qbit_port")]
    pub port: u16,
    /// Web UI username.
    pub username: String,
    /// Web UI password.
    pub password: String,
    /// Request timeout in seconds.
    #[serde(default = "default_qbit_timeout")]
    pub timeout_secs: u64,
}

fn default_qbit_host() -> String {
    "localhost".to_string()
}
const fn default_qbit_port() -> u16 {
    8080
}
const fn default_qbit_timeout() -> u64 {
    30
}

/// Cross-seed forwarder settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CrossSeedSettings {
    /// Whether completion events are forwarded at all.
    #[serde(default)]
    pub enabled: bool,
    /// Target URL for the cross-seed webhook endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Optional API key sent as `X-API-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_cross_seed_timeout")]
    pub timeout_secs: u64,
}

const fn default_cross_seed_timeout() -> u64 {
    15
}

/// Rollback journal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RollbackSettings {
    /// Filesystem path to the SQLite database file.
    #[serde(default = "default_rollback_path")]
    pub database_path: String,
    /// Whether every limit mutation is journaled, not just the first per hash.
    #[serde(default = "default_true")]
    pub track_all_changes: bool,
}

fn default_rollback_path() -> String {
    "./data/rollback.db".to_string()
}
const fn default_true() -> bool {
    true
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `qguardarr=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional path to a rolling log file; empty disables file logging.
    #[serde(default)]
    pub file: String,
    /// Maximum size in megabytes before a log file is rotated.
    #[serde(default = "default_log_max_size_mb")]
    pub max_size_mb: u32,
    /// Number of rotated log files to retain.
    #[serde(default = "default_log_backup_count")]
    pub backup_count: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
const fn default_log_max_size_mb() -> u32 {
    50
}
const fn default_log_backup_count() -> u32 {
    5
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QguardarrConfig {
    /// Global cycle/API settings.
    pub global: GlobalSettings,
    /// qBittorrent connection settings.
    pub qbittorrent: QbittorrentSettings,
    /// Cross-seed forwarder settings.
    #[serde(default)]
    pub cross_seed: CrossSeedSettings,
    /// Ordered tracker rules; the catch-all (`.*`) rule must be last.
    pub trackers: Vec<TrackerConfig>,
    /// Rollback journal settings.
    #[serde(default)]
    pub rollback: RollbackSettings,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for CrossSeedSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            api_key: None,
            timeout_secs: default_cross_seed_timeout(),
        }
    }
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            database_path: default_rollback_path(),
            track_all_changes: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            max_size_mb: default_log_max_size_mb(),
            backup_count: default_log_backup_count(),
        }
    }
}

/// Render a byte-per-second speed as a human-readable string, matching the
/// thresholds used throughout the allocation strategies (KiB/MiB/GiB, base 1024).
#[must_use]
pub fn format_speed(speed_bytes: i64) -> String {
    let speed = speed_bytes as f64;
    if speed_bytes < 1024 {
        format!("{speed_bytes} B/s")
    } else if speed_bytes < 1_048_576 {
        format!("{:.1} KB/s", speed / 1024.0)
    } else if speed_bytes < 1_073_741_824 {
        format!("{:.1} MB/s", speed / 1_048_576.0)
    } else {
        format!("{:.1} GB/s", speed / 1_073_741_824.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_speed_picks_unit_by_magnitude() {
        assert_eq!(format_speed(512), "512 B/s");
        assert_eq!(format_speed(10 * 1024), "10.0 KB/s");
        assert_eq!(format_speed(5 * 1_048_576), "5.0 MB/s");
        assert_eq!(format_speed(2 * 1_073_741_824), "2.0 GB/s");
    }
}
