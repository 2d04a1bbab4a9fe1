//! Pure allocation strategies: equal split, intra-tracker weighting, and
//! cross-tracker soft borrowing with smoothing.
//!
//! Every strategy takes a list of managed [`TorrentSnapshot`]s plus a tracker
//! lookup and produces a `{hash -> new_limit_bps}` map. Grouping by tracker
//! and the unlimited-tracker shortcut are shared across all three.

use std::collections::HashMap;

use qguardarr_config::TrackerConfig;

use crate::model::{TorrentSnapshot, UNLIMITED};
use crate::tracker_matcher::TrackerMatcher;

const FLOOR_BPS: i64 = 10 * 1_024;
const MIB: f64 = 1_024.0 * 1_024.0;

/// Group snapshots by the tracker id their announce URL resolves to.
fn group_by_tracker<'a>(
    snapshots: &'a [TorrentSnapshot],
    matcher: &TrackerMatcher,
) -> HashMap<String, Vec<&'a TorrentSnapshot>> {
    let mut groups: HashMap<String, Vec<&TorrentSnapshot>> = HashMap::new();
    for snapshot in snapshots {
        let tracker_id = matcher.match_tracker(&snapshot.tracker_url);
        groups.entry(tracker_id).or_default().push(snapshot);
    }
    groups
}

/// Per-torrent intra-tracker weight, per the weighted strategy's scoring
/// rule: `0.6 * min(peers/20, 1) + 0.4 * min(upspeed / 1 MiB/s, 1)`.
fn weight(snapshot: &TorrentSnapshot) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "peer counts and bps fit comfortably in f64 mantissa precision"
    )]
    let peer_term = (f64::from(snapshot.num_peers()) / 20.0).min(1.0);
    #[expect(
        clippy::cast_precision_loss,
        reason = "peer counts and bps fit comfortably in f64 mantissa precision"
    )]
    let speed_term = (snapshot.upspeed_bps as f64 / MIB).min(1.0);
    0.6 * peer_term + 0.4 * speed_term
}

/// Distribute `cap` across `torrents` using the weighted algorithm, with
/// floor `10 KiB/s` and ceiling `0.6 * cap` per torrent. Shared by the
/// weighted strategy and the soft strategy's per-tracker distribution step.
fn weighted_split(torrents: &[&TorrentSnapshot], cap: i64) -> HashMap<String, i64> {
    let mut limits = HashMap::with_capacity(torrents.len());

    if torrents.len() == 1 {
        limits.insert(torrents[0].hash.clone(), cap);
        return limits;
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "tracker caps fit comfortably in f64 mantissa precision"
    )]
    let cap_f = cap as f64;
    let ceiling = 0.6 * cap_f;
    #[expect(
        clippy::cast_precision_loss,
        reason = "the per-torrent floor fits comfortably in f64 mantissa precision"
    )]
    let floor = FLOOR_BPS.min(cap).max(0) as f64;

    let scores: Vec<f64> = torrents.iter().map(|t| weight(t)).collect();
    let total_score: f64 = scores.iter().sum();

    let mut alloc: Vec<f64> = if total_score <= 0.0 {
        let equal_share = cap_f / torrents.len() as f64;
        vec![equal_share; torrents.len()]
    } else {
        scores
            .iter()
            .map(|s| cap_f * s / total_score)
            .collect()
    };

    for value in &mut alloc {
        *value = value.clamp(floor, ceiling.max(floor));
    }

    let sum: f64 = alloc.iter().sum();
    if sum < cap_f {
        let deficit = cap_f - sum;
        let headroom: Vec<f64> = alloc.iter().map(|a| (ceiling.max(floor) - a).max(0.0)).collect();
        let total_headroom: f64 = headroom.iter().sum();
        if total_headroom > 0.0 {
            for (value, room) in alloc.iter_mut().zip(headroom.iter()) {
                *value += deficit * room / total_headroom;
            }
        }
    } else if sum > cap_f {
        let surplus = sum - cap_f;
        let reducible: Vec<f64> = alloc.iter().map(|a| (a - floor).max(0.0)).collect();
        let total_reducible: f64 = reducible.iter().sum();
        if total_reducible > 0.0 {
            for (value, room) in alloc.iter_mut().zip(reducible.iter()) {
                *value -= surplus * room / total_reducible;
            }
        }
    }

    for value in &mut alloc {
        *value = value.clamp(floor, ceiling.max(floor));
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "allocation values are bounded by the tracker cap, which fits in i64"
    )]
    let mut rounded: Vec<i64> = alloc.iter().map(|v| v.round() as i64).collect();

    let mut remainder = cap - rounded.iter().sum::<i64>();
    #[expect(
        clippy::cast_possible_truncation,
        reason = "bounds are derived from the tracker cap, which fits in i64"
    )]
    let floor_i = floor.round() as i64;
    #[expect(
        clippy::cast_possible_truncation,
        reason = "bounds are derived from the tracker cap, which fits in i64"
    )]
    let ceiling_i = ceiling.max(floor).round() as i64;
    let max_passes = rounded.len() * 4 + 4;
    let mut index = 0;
    while remainder != 0 && index < max_passes {
        let i = index % rounded.len();
        if remainder > 0 && rounded[i] < ceiling_i {
            rounded[i] += 1;
            remainder -= 1;
        } else if remainder < 0 && rounded[i] > floor_i {
            rounded[i] -= 1;
            remainder += 1;
        }
        index += 1;
    }

    for (torrent, limit) in torrents.iter().zip(rounded.iter()) {
        limits.insert(torrent.hash.clone(), *limit);
    }
    limits
}

/// Equal-split strategy (§4.5.1): single torrent gets the full cap; with
/// `k > 1` torrents each gets `max(cap / k, 10 KiB/s)`, floor overflow
/// accepted.
#[must_use]
pub fn equal(
    snapshots: &[TorrentSnapshot],
    matcher: &TrackerMatcher,
) -> HashMap<String, i64> {
    let mut limits = HashMap::new();
    for (tracker_id, torrents) in group_by_tracker(snapshots, matcher) {
        let Some(config) = matcher.tracker_config(&tracker_id) else {
            continue;
        };
        if config.max_upload_speed <= 0 {
            for torrent in torrents {
                limits.insert(torrent.hash.clone(), UNLIMITED);
            }
            continue;
        }

        let cap = config.max_upload_speed;
        if torrents.len() == 1 {
            limits.insert(torrents[0].hash.clone(), cap);
            continue;
        }

        #[expect(
            clippy::cast_possible_wrap,
            reason = "torrent group sizes never approach i64::MAX"
        )]
        let per_torrent = (cap / torrents.len() as i64).max(FLOOR_BPS);
        for torrent in torrents {
            limits.insert(torrent.hash.clone(), per_torrent);
        }
    }
    limits
}

/// Weighted strategy (§4.5.2): applies [`weighted_split`] within each
/// tracker's own cap.
#[must_use]
pub fn weighted(
    snapshots: &[TorrentSnapshot],
    matcher: &TrackerMatcher,
) -> HashMap<String, i64> {
    let mut limits = HashMap::new();
    for (tracker_id, torrents) in group_by_tracker(snapshots, matcher) {
        let Some(config) = matcher.tracker_config(&tracker_id) else {
            continue;
        };
        if config.max_upload_speed <= 0 {
            for torrent in torrents {
                limits.insert(torrent.hash.clone(), UNLIMITED);
            }
            continue;
        }
        limits.extend(weighted_split(&torrents, config.max_upload_speed));
    }
    limits
}

/// Per-tracker figures computed by the soft strategy, returned alongside the
/// limits map so `/stats/trackers` and `/preview/next-cycle` can report
/// borrowed capacity.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SoftTrackerFigures {
    /// Tracker's statically configured cap.
    pub base_cap_bps: i64,
    /// Cap actually used to distribute among this tracker's torrents, after
    /// borrowing and smoothing.
    pub effective_cap_bps: i64,
    /// `effective_cap_bps - base_cap_bps`, for reporting.
    pub borrowed_bps: i64,
}

/// Smoothing state the soft strategy persists across cycles, keyed by
/// tracker id. Owned by the cycle orchestrator; passed by value into real
/// cycles and left untouched for preview cycles.
#[derive(Debug, Clone, Default)]
pub struct SoftSmoothingState {
    last_effective_cap_bps: HashMap<String, f64>,
}

impl SoftSmoothingState {
    /// Empty smoothing state, as if no cycle had ever run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear smoothing history for a single tracker.
    pub fn reset_one(&mut self, tracker_id: &str) {
        self.last_effective_cap_bps.remove(tracker_id);
    }

    /// Clear smoothing history for every tracker.
    pub fn reset_all(&mut self) {
        self.last_effective_cap_bps.clear();
    }
}

/// Parameters governing the soft strategy's borrowing and smoothing
/// behavior, sourced from the global configuration section.
#[derive(Debug, Clone, Copy)]
pub struct SoftParams {
    /// Usage fraction of `base_cap` above which a tracker starts donating
    /// slack / demanding a borrow.
    pub borrow_threshold_ratio: f64,
    /// Maximum fraction of `base_cap` a tracker may borrow in total.
    pub max_borrow_fraction: f64,
    /// Exponential smoothing factor applied to the raw effective cap.
    pub smoothing_alpha: f64,
    /// Relative-change floor below which the smoothed cap reuses the
    /// previous cycle's value to suppress micro-churn.
    pub min_effective_delta: f64,
}

/// Soft strategy (§4.5.3): cross-tracker borrowing with smoothing.
///
/// When `state` is `None`, smoothing is computed but never persisted
/// (preview mode). When `Some`, the smoothing map is read and updated in
/// place.
#[must_use]
pub fn soft(
    snapshots: &[TorrentSnapshot],
    matcher: &TrackerMatcher,
    params: SoftParams,
    mut state: Option<&mut SoftSmoothingState>,
) -> (HashMap<String, i64>, HashMap<String, SoftTrackerFigures>) {
    let groups = group_by_tracker(snapshots, matcher);

    let mut base_caps: HashMap<String, i64> = HashMap::new();
    let mut usages: HashMap<String, f64> = HashMap::new();
    for (tracker_id, torrents) in &groups {
        let Some(config) = matcher.tracker_config(tracker_id) else {
            continue;
        };
        base_caps.insert(tracker_id.clone(), config.max_upload_speed);
        let usage: i64 = torrents.iter().map(|t| t.upspeed_bps).sum();
        #[expect(
            clippy::cast_precision_loss,
            reason = "usage sums fit comfortably in f64 mantissa precision"
        )]
        usages.insert(tracker_id.clone(), usage as f64);
    }

    let mut slack: HashMap<String, f64> = HashMap::new();
    let mut demand: HashMap<String, f64> = HashMap::new();
    let mut pool = 0.0_f64;
    let mut total_demand = 0.0_f64;

    for (tracker_id, &cap) in &base_caps {
        if cap <= 0 {
            continue;
        }
        #[expect(
            clippy::cast_precision_loss,
            reason = "tracker caps fit comfortably in f64 mantissa precision"
        )]
        let cap_f = cap as f64;
        let usage = usages.get(tracker_id).copied().unwrap_or(0.0);
        let threshold = cap_f * params.borrow_threshold_ratio;

        let tracker_slack = (threshold - usage).max(0.0);
        slack.insert(tracker_id.clone(), tracker_slack);
        pool += tracker_slack;

        let priority = f64::from(
            matcher
                .tracker_config(tracker_id)
                .map_or(1, |c| c.priority),
        );
        let tracker_demand = priority * (usage - threshold).max(0.0);
        if tracker_demand > 0.0 {
            demand.insert(tracker_id.clone(), tracker_demand);
            total_demand += tracker_demand;
        }
    }

    let mut figures = HashMap::new();
    let mut limits = HashMap::new();

    for (tracker_id, torrents) in &groups {
        let Some(&base_cap) = base_caps.get(tracker_id) else {
            continue;
        };
        if base_cap <= 0 {
            for torrent in torrents {
                limits.insert(torrent.hash.clone(), UNLIMITED);
            }
            continue;
        }

        #[expect(
            clippy::cast_precision_loss,
            reason = "tracker caps fit comfortably in f64 mantissa precision"
        )]
        let base_cap_f = base_cap as f64;
        let tracker_demand = demand.get(tracker_id).copied().unwrap_or(0.0);
        let borrow_grant = if tracker_demand > 0.0 && total_demand > 0.0 {
            (base_cap_f * params.max_borrow_fraction).min(pool * tracker_demand / total_demand)
        } else {
            0.0
        };
        let raw_effective = base_cap_f + borrow_grant;

        let smoothed = match state.as_deref_mut() {
            Some(persisted) => {
                let previous = persisted
                    .last_effective_cap_bps
                    .get(tracker_id)
                    .copied()
                    .unwrap_or(base_cap_f);
                let next = params.smoothing_alpha * raw_effective
                    + (1.0 - params.smoothing_alpha) * previous;
                let relative_change = if previous.abs() > f64::EPSILON {
                    (next - previous).abs() / previous.abs()
                } else {
                    1.0
                };
                let published = if relative_change < params.min_effective_delta {
                    previous
                } else {
                    next
                };
                persisted
                    .last_effective_cap_bps
                    .insert(tracker_id.clone(), published);
                published
            }
            None => raw_effective,
        };

        #[expect(
            clippy::cast_possible_truncation,
            reason = "effective caps are bounded by base_cap * (1 + max_borrow_fraction), which fits in i64"
        )]
        let effective_cap_bps = smoothed.round() as i64;

        figures.insert(
            tracker_id.clone(),
            SoftTrackerFigures {
                base_cap_bps: base_cap,
                effective_cap_bps,
                borrowed_bps: effective_cap_bps - base_cap,
            },
        );

        limits.extend(weighted_split(torrents, effective_cap_bps));
    }

    (limits, figures)
}
