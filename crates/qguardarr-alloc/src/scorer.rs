//! Activity scoring and admission for the managed-torrent selection step.

use crate::model::{Score, TorrentSnapshot};

const ONE_HOUR: i64 = 3_600;
const SIX_HOURS: i64 = 6 * ONE_HOUR;
const TWENTY_FOUR_HOURS: i64 = 24 * ONE_HOUR;
const ACTIVE_UPSPEED_THRESHOLD_BPS: i64 = 10 * 1_024;

/// Score a torrent's activity in `[0, 1]` given the current time.
///
/// Immediate 1.0 for currently-uploading torrents; otherwise a recency
/// baseline boosted by connected peer count.
#[must_use]
pub fn score(snapshot: &TorrentSnapshot, now_epoch: i64) -> Score {
    if snapshot.upspeed_bps > ACTIVE_UPSPEED_THRESHOLD_BPS {
        return 1.0;
    }

    let age = (now_epoch - snapshot.last_activity_epoch).max(0);
    let baseline = if age < ONE_HOUR {
        0.8
    } else if age < SIX_HOURS {
        0.5
    } else if age < TWENTY_FOUR_HOURS {
        0.2
    } else {
        0.0
    };

    let peers = snapshot.num_peers();
    let boost = if peers > 20 {
        0.3
    } else if peers > 5 {
        0.1
    } else {
        0.0
    };

    (baseline + boost).min(1.0)
}

/// Decide whether a scored torrent should be admitted into the managed set
/// given how many free slots remain in the cache.
#[must_use]
pub fn should_manage(candidate_score: Score, slots_remaining: usize) -> bool {
    if candidate_score >= 0.8 {
        return true;
    }
    if candidate_score >= 0.5 && slots_remaining > 0 {
        return true;
    }
    candidate_score > 0.3 && slots_remaining > 500
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(upspeed_bps: i64, num_seeds: u32, num_leeches: u32, last_activity_epoch: i64) -> TorrentSnapshot {
        TorrentSnapshot {
            hash: "h".to_string(),
            name: String::new(),
            state: String::new(),
            upspeed_bps,
            num_seeds,
            num_leeches,
            ratio: 0.0,
            last_activity_epoch,
            tracker_url: String::new(),
            category: String::new(),
            tags: String::new(),
        }
    }

    #[test]
    fn uploading_torrent_scores_maximum() {
        let snap = snapshot(20 * 1_024, 0, 0, 0);
        assert!((score(&snap, 1_000_000) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recency_baseline_decays_with_age() {
        let fresh = snapshot(0, 0, 0, 900);
        let mid = snapshot(0, 0, 0, 900);
        let stale = snapshot(0, 0, 0, 0);

        assert!((score(&fresh, 1_000) - 0.8).abs() < f64::EPSILON);
        assert!((score(&mid, 5_000) - 0.5).abs() < f64::EPSILON);
        assert!((score(&stale, 100_000) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn peer_boost_is_clamped_to_one() {
        let snap = snapshot(0, 15, 10, 900);
        assert!((score(&snap, 1_000) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_manage_respects_slot_pressure() {
        assert!(should_manage(0.9, 0));
        assert!(should_manage(0.6, 1));
        assert!(!should_manage(0.6, 0));
        assert!(should_manage(0.35, 600));
        assert!(!should_manage(0.35, 100));
        assert!(!should_manage(0.2, 1_000));
    }
}
