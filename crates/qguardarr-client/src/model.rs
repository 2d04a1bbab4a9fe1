//! Wire types for qBittorrent Web API v2 responses.

use serde::Deserialize;

/// One entry from `GET /api/v2/torrents/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentInfo {
    /// Torrent info hash.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Client-reported state string.
    pub state: String,
    /// Current upload speed, bytes/sec.
    pub upspeed: i64,
    /// Number of connected seeds.
    pub num_seeds: u32,
    /// Number of connected leeches. qBittorrent's own field name.
    pub num_leechs: u32,
    /// Share ratio.
    #[serde(default)]
    pub ratio: f64,
    /// Category assigned in the client, if any.
    #[serde(default)]
    pub category: String,
    /// Tags assigned in the client, if any.
    #[serde(default)]
    pub tags: String,
    /// Unix timestamp of the last observed activity.
    #[serde(default)]
    pub last_activity: i64,
    /// Primary tracker URL, filled in by [`crate::qbittorrent`] after a
    /// separate trackers lookup; absent from the raw API response.
    #[serde(default, skip_deserializing)]
    pub tracker: String,
}

impl TorrentInfo {
    /// Total connected peers (seeds + leeches).
    #[must_use]
    pub const fn num_peers(&self) -> u32 {
        self.num_seeds + self.num_leechs
    }
}

/// One entry from `GET /api/v2/torrents/trackers`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerEntry {
    /// Announce URL.
    pub url: String,
    /// Status code; `2` means working.
    pub status: i32,
}

/// Status code qBittorrent reports for a working tracker.
pub const TRACKER_STATUS_WORKING: i32 = 2;

/// Pick the primary tracker for a torrent: the first with `status == 2`
/// (working), falling back to the first non-DHT/non-PeX URL, else empty.
#[must_use]
pub fn primary_tracker(trackers: &[TrackerEntry]) -> String {
    if let Some(working) = trackers
        .iter()
        .find(|t| t.status == TRACKER_STATUS_WORKING && !t.url.is_empty())
    {
        return working.url.clone();
    }
    trackers
        .iter()
        .find(|t| !t.url.is_empty() && !t.url.starts_with("**"))
        .map(|t| t.url.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_tracker_prefers_working_status() {
        let trackers = vec![
            TrackerEntry {
                url: "**[DHT]**".to_string(),
                status: 0,
            },
            TrackerEntry {
                url: "https://tracker.example/announce".to_string(),
                status: 2,
            },
        ];
        assert_eq!(primary_tracker(&trackers), "https://tracker.example/announce");
    }

    #[test]
    fn primary_tracker_falls_back_to_first_real_url() {
        let trackers = vec![
            TrackerEntry {
                url: "**[PeX]**".to_string(),
                status: 0,
            },
            TrackerEntry {
                url: "https://backup.example/announce".to_string(),
                status: 1,
            },
        ];
        assert_eq!(primary_tracker(&trackers), "https://backup.example/announce");
    }

    #[test]
    fn primary_tracker_is_empty_without_any_real_url() {
        let trackers = vec![TrackerEntry {
            url: "**[DHT]**".to_string(),
            status: 0,
        }];
        assert_eq!(primary_tracker(&trackers), "");
    }
}
