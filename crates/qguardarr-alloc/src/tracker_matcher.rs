//! Tracker URL to tracker-id matching with pattern normalization and caching.

use std::collections::HashMap;
use std::sync::RwLock;

use md5::{Digest, Md5};
use qguardarr_config::TrackerConfig;
use regex::Regex;

use crate::error::{AllocError, AllocResult};

/// Cache and usage statistics for a [`TrackerMatcher`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MatcherStats {
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
}

impl MatcherStats {
    /// Hit rate as a percentage, rounded to one decimal place.
    #[must_use]
    pub fn hit_rate_percent(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        #[expect(
            clippy::cast_precision_loss,
            reason = "hit-rate reporting tolerates precision loss past 2^53 hits"
        )]
        let rate = (self.cache_hits as f64 / total as f64) * 100.0;
        (rate * 10.0).round() / 10.0
    }
}

struct CompiledTracker {
    id: String,
    pattern: Regex,
}

/// Maps tracker announce URLs to configured tracker ids by ordered regex,
/// with a 16-hex-character digest cache over the URL's lowercased
/// `host+path`.
pub struct TrackerMatcher {
    trackers: Vec<TrackerConfig>,
    compiled: Vec<CompiledTracker>,
    catch_all_id: String,
    cache: RwLock<HashMap<String, String>>,
    cache_hits: std::sync::atomic::AtomicU64,
    cache_misses: std::sync::atomic::AtomicU64,
    pattern_matches: std::sync::atomic::AtomicU64,
    failed_matches: std::sync::atomic::AtomicU64,
}

impl TrackerMatcher {
    /// Compile patterns for `trackers`.
    ///
    /// # Errors
    ///
    /// Returns an error if no catch-all pattern is present, or if any
    /// pattern fails to compile.
    pub fn new(trackers: Vec<TrackerConfig>) -> AllocResult<Self> {
        let catch_all_id = trackers
            .iter()
            .find(|tracker| tracker.pattern == ".*")
            .map(|tracker| tracker.id.clone())
            .ok_or(AllocError::MissingCatchAll)?;

        let mut compiled = Vec::with_capacity(trackers.len());
        for tracker in &trackers {
            let normalized = normalize_pattern(&tracker.pattern);
            let pattern = Regex::new(&format!("(?i){normalized}")).map_err(|source| {
                AllocError::InvalidPattern {
                    tracker_id: tracker.id.clone(),
                    source,
                }
            })?;
            compiled.push(CompiledTracker {
                id: tracker.id.clone(),
                pattern,
            });
        }

        Ok(Self {
            trackers,
            compiled,
            catch_all_id,
            cache: RwLock::new(HashMap::new()),
            cache_hits: std::sync::atomic::AtomicU64::new(0),
            cache_misses: std::sync::atomic::AtomicU64::new(0),
            pattern_matches: std::sync::atomic::AtomicU64::new(0),
            failed_matches: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Match a tracker announce URL to a tracker id, falling back to the
    /// catch-all for an empty or unmatched URL.
    pub fn match_tracker(&self, tracker_url: &str) -> String {
        if tracker_url.is_empty() {
            return self.catch_all_id.clone();
        }

        let cache_key = cache_key(tracker_url);
        if let Some(id) = self.cache.read().expect("tracker cache poisoned").get(&cache_key) {
            self.cache_hits
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return id.clone();
        }
        self.cache_misses
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let matched = self.find_matching_tracker(tracker_url);
        if matched == self.catch_all_id {
            self.failed_matches
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.pattern_matches
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        self.cache
            .write()
            .expect("tracker cache poisoned")
            .insert(cache_key, matched.clone());
        matched
    }

    fn find_matching_tracker(&self, tracker_url: &str) -> String {
        for candidate in &self.compiled {
            if candidate.id == self.catch_all_id {
                continue;
            }
            if candidate.pattern.is_match(tracker_url) {
                return candidate.id.clone();
            }
        }
        self.catch_all_id.clone()
    }

    /// Look up a tracker's static configuration by id.
    #[must_use]
    pub fn tracker_config(&self, tracker_id: &str) -> Option<&TrackerConfig> {
        self.trackers.iter().find(|tracker| tracker.id == tracker_id)
    }

    /// All configured trackers, in declaration order.
    #[must_use]
    pub fn all_trackers(&self) -> &[TrackerConfig] {
        &self.trackers
    }

    /// Clear the match cache without recompiling patterns.
    pub fn clear_cache(&self) {
        self.cache.write().expect("tracker cache poisoned").clear();
    }

    /// Snapshot cache and match statistics.
    #[must_use]
    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            cache_size: self.cache.read().expect("tracker cache poisoned").len(),
            cache_hits: self.cache_hits.load(std::sync::atomic::Ordering::Relaxed),
            cache_misses: self.cache_misses.load(std::sync::atomic::Ordering::Relaxed),
            pattern_matches: self
                .pattern_matches
                .load(std::sync::atomic::Ordering::Relaxed),
            failed_matches: self
                .failed_matches
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Test a URL against every configured pattern, for the `/match/test`
    /// debugging endpoint.
    #[must_use]
    pub fn test_pattern_match(&self, tracker_url: &str) -> Vec<(String, bool)> {
        self.compiled
            .iter()
            .map(|candidate| (candidate.id.clone(), candidate.pattern.is_match(tracker_url)))
            .collect()
    }
}

/// Make simple domain patterns more forgiving.
///
/// A pattern with explicit anchors (`^` or `$`) is left untouched. Otherwise
/// a missing leading/trailing `.*` is added, and a bare leading or trailing
/// `.` is widened to `.*`, so that a pattern like `.example.com.` behaves
/// like `.*example\.com.*`.
fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed.starts_with('^') || trimmed.ends_with('$') {
        return trimmed.to_string();
    }

    let mut normalized = if trimmed.starts_with(".*") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix('.') {
        format!(".*{rest}")
    } else {
        format!(".*{trimmed}")
    };

    normalized = if normalized.ends_with(".*") {
        normalized
    } else if let Some(stripped) = normalized.strip_suffix('.') {
        format!("{stripped}.*")
    } else {
        format!("{normalized}.*")
    };

    normalized
}

/// 16-hex-character digest of the URL's lowercased `host+path`, falling
/// back to the whole lowercased URL if it cannot be parsed.
fn cache_key(tracker_url: &str) -> String {
    let lowered = tracker_url.to_lowercase();
    let subject = host_and_path(&lowered).unwrap_or(lowered.clone());
    let digest = Md5::digest(subject.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

fn host_and_path(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host_and_rest = without_scheme.split(['?', '#']).next()?;
    Some(host_and_rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trackers() -> Vec<TrackerConfig> {
        vec![
            TrackerConfig {
                id: "tracker-a".to_string(),
                name: "Tracker A".to_string(),
                pattern: "tracker-a\\.example".to_string(),
                max_upload_speed: 1_000_000,
                priority: 1,
            },
            TrackerConfig {
                id: "catch-all".to_string(),
                name: "Catch All".to_string(),
                pattern: ".*".to_string(),
                max_upload_speed: 500_000,
                priority: 1,
            },
        ]
    }

    #[test]
    fn matches_configured_pattern_case_insensitively() {
        let matcher = TrackerMatcher::new(trackers()).expect("compile");
        assert_eq!(
            matcher.match_tracker("https://TRACKER-A.example/announce"),
            "tracker-a"
        );
    }

    #[test]
    fn falls_back_to_catch_all_for_unmatched_or_empty_url() {
        let matcher = TrackerMatcher::new(trackers()).expect("compile");
        assert_eq!(matcher.match_tracker("https://unrelated.example/announce"), "catch-all");
        assert_eq!(matcher.match_tracker(""), "catch-all");
    }

    #[test]
    fn cache_hits_return_same_result_without_recomputation() {
        let matcher = TrackerMatcher::new(trackers()).expect("compile");
        let url = "https://tracker-a.example/announce";
        assert_eq!(matcher.match_tracker(url), "tracker-a");
        assert_eq!(matcher.match_tracker(url), "tracker-a");
        let stats = matcher.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn rejects_configuration_without_catch_all() {
        let mut only_specific = trackers();
        only_specific.pop();
        let err = TrackerMatcher::new(only_specific).expect_err("should reject");
        assert!(matches!(err, AllocError::MissingCatchAll));
    }

    #[test]
    fn normalize_pattern_widens_bare_dots_and_respects_anchors() {
        assert_eq!(normalize_pattern(".example.com."), ".*example.com.*");
        assert_eq!(normalize_pattern("example.com"), ".*example.com.*");
        assert_eq!(normalize_pattern("^example\\.com$"), "^example\\.com$");
        assert_eq!(normalize_pattern(".*already.*"), ".*already.*");
    }

    #[test]
    fn clear_cache_resets_entries_but_not_counters() {
        let matcher = TrackerMatcher::new(trackers()).expect("compile");
        matcher.match_tracker("https://tracker-a.example/announce");
        matcher.clear_cache();
        assert_eq!(matcher.stats().cache_size, 0);
    }
}
