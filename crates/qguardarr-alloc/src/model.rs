//! Value types shared by the tracker matcher, cache, and allocation strategies.

/// Sentinel upload limit meaning "no limit" in qBittorrent's API and throughout
/// this crate.
pub const UNLIMITED: i64 = -1;

/// A point-in-time view of a torrent as reported by the client.
///
/// Produced fresh every cycle; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentSnapshot {
    /// Torrent info hash.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Client-reported state string (e.g. `"uploading"`, `"stalledUP"`).
    pub state: String,
    /// Current upload speed, bytes/sec.
    pub upspeed_bps: i64,
    /// Number of connected seeds.
    pub num_seeds: u32,
    /// Number of connected leeches.
    pub num_leeches: u32,
    /// Share ratio.
    pub ratio: f64,
    /// Unix timestamp of the last observed activity.
    pub last_activity_epoch: i64,
    /// Tracker announce URL, as reported by the client.
    pub tracker_url: String,
    /// Category assigned in the client, if any.
    pub category: String,
    /// Tags assigned in the client, if any.
    pub tags: String,
}

impl TorrentSnapshot {
    /// Total connected peers (seeds + leeches).
    #[must_use]
    pub const fn num_peers(&self) -> u32 {
        self.num_seeds + self.num_leeches
    }
}

/// One row of the managed-torrent cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedEntry {
    /// Torrent info hash.
    pub hash: String,
    /// Tracker this torrent was classified into at insertion time.
    pub tracker_id: String,
    /// Last observed upload speed, bytes/sec.
    pub upload_speed_bps: i64,
    /// Limit the system believes the client currently holds for this hash.
    /// `-1` means unlimited.
    pub current_limit_bps: i64,
    /// Unix timestamp this row was last refreshed.
    pub last_seen_epoch: i64,
    /// Set when the orchestrator has a pending check queued for this hash.
    pub needs_update_flag: bool,
}

/// A score in `[0, 1]` computed per torrent per cycle, never persisted.
pub type Score = f64;

/// Named buckets a [`Score`] falls into, used for stats reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBucket {
    /// `score >= 0.8`.
    High,
    /// `0.5 <= score < 0.8`.
    Medium,
    /// `0.2 <= score < 0.5`.
    Low,
    /// `score < 0.2`.
    Ignored,
}

impl ScoreBucket {
    /// Classify a raw score into its named bucket.
    #[must_use]
    pub fn classify(score: Score) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else if score >= 0.2 {
            Self::Low
        } else {
            Self::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_peers_sums_seeds_and_leeches() {
        let snapshot = TorrentSnapshot {
            hash: "abc".to_string(),
            name: "demo".to_string(),
            state: "uploading".to_string(),
            upspeed_bps: 1_000,
            num_seeds: 3,
            num_leeches: 2,
            ratio: 1.5,
            last_activity_epoch: 0,
            tracker_url: String::new(),
            category: String::new(),
            tags: String::new(),
        };
        assert_eq!(snapshot.num_peers(), 5);
    }

    #[test]
    fn score_bucket_classifies_boundaries() {
        assert_eq!(ScoreBucket::classify(0.9), ScoreBucket::High);
        assert_eq!(ScoreBucket::classify(0.8), ScoreBucket::High);
        assert_eq!(ScoreBucket::classify(0.6), ScoreBucket::Medium);
        assert_eq!(ScoreBucket::classify(0.3), ScoreBucket::Low);
        assert_eq!(ScoreBucket::classify(0.1), ScoreBucket::Ignored);
    }
}
