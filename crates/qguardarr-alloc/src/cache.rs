//! Fixed-capacity, slotted store of actively managed torrents.
//!
//! Backed by a hash-index into parallel row storage with a free-slot list,
//! giving O(1) insert/update/remove/lookup and fixed capacity.

use std::collections::HashMap;

use crate::model::ManagedEntry;

/// Fixed-capacity cache of [`ManagedEntry`] rows, keyed by torrent hash.
pub struct ManagedTorrentCache {
    capacity: usize,
    rows: Vec<Option<ManagedEntry>>,
    free_slots: Vec<usize>,
    index: HashMap<String, usize>,
}

impl ManagedTorrentCache {
    /// Default capacity used when none is configured.
    pub const DEFAULT_CAPACITY: usize = 5_000;

    /// Build an empty cache with the given fixed capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rows: (0..capacity).map(|_| None).collect(),
            free_slots: (0..capacity).rev().collect(),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Configured fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache currently holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert a new row for `hash`. Returns `false` without mutating state
    /// when the cache is full or `hash` is already present.
    pub fn insert(
        &mut self,
        hash: &str,
        tracker_id: &str,
        upload_speed_bps: i64,
        current_limit_bps: i64,
        now_epoch: i64,
    ) -> bool {
        if self.index.contains_key(hash) {
            return false;
        }
        let Some(slot) = self.free_slots.pop() else {
            return false;
        };
        self.rows[slot] = Some(ManagedEntry {
            hash: hash.to_string(),
            tracker_id: tracker_id.to_string(),
            upload_speed_bps,
            current_limit_bps,
            last_seen_epoch: now_epoch,
            needs_update_flag: false,
        });
        self.index.insert(hash.to_string(), slot);
        true
    }

    /// Refresh the speed/limit/timestamp fields of an existing row. Returns
    /// `false` if `hash` is not present; the tracker assignment is never
    /// changed by a refresh.
    pub fn update(&mut self, hash: &str, upload_speed_bps: i64, current_limit_bps: i64, now_epoch: i64) -> bool {
        let Some(&slot) = self.index.get(hash) else {
            return false;
        };
        if let Some(row) = self.rows[slot].as_mut() {
            row.upload_speed_bps = upload_speed_bps;
            row.current_limit_bps = current_limit_bps;
            row.last_seen_epoch = now_epoch;
            true
        } else {
            false
        }
    }

    /// Set `current_limit_bps` on an existing row, e.g. after a successful
    /// apply. Returns `false` if `hash` is not present.
    pub fn set_current_limit(&mut self, hash: &str, current_limit_bps: i64) -> bool {
        let Some(&slot) = self.index.get(hash) else {
            return false;
        };
        if let Some(row) = self.rows[slot].as_mut() {
            row.current_limit_bps = current_limit_bps;
            true
        } else {
            false
        }
    }

    /// Remove a row, returning its slot to the free list. Returns `false`
    /// if `hash` was not present.
    pub fn remove(&mut self, hash: &str) -> bool {
        let Some(slot) = self.index.remove(hash) else {
            return false;
        };
        self.rows[slot] = None;
        self.free_slots.push(slot);
        true
    }

    /// Current upload limit the system believes is in effect for `hash`.
    #[must_use]
    pub fn get_limit(&self, hash: &str) -> Option<i64> {
        self.get(hash).map(|row| row.current_limit_bps)
    }

    /// Tracker id the hash was classified into at insertion time.
    #[must_use]
    pub fn get_tracker(&self, hash: &str) -> Option<&str> {
        self.get(hash).map(|row| row.tracker_id.as_str())
    }

    /// Full row for `hash`, if present.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&ManagedEntry> {
        self.index
            .get(hash)
            .and_then(|&slot| self.rows[slot].as_ref())
    }

    /// Whether `hash` currently has a row.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains_key(hash)
    }

    /// All hashes currently present, for the cycle orchestrator to compare
    /// against the client's active-torrent list.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// O(N) scan of rows belonging to `tracker_id`, for stats reporting.
    pub fn by_tracker<'a>(&'a self, tracker_id: &'a str) -> impl Iterator<Item = &'a ManagedEntry> + 'a {
        self.rows
            .iter()
            .filter_map(Option::as_ref)
            .filter(move |row| row.tracker_id == tracker_id)
    }

    /// All occupied rows, for stats reporting.
    pub fn rows(&self) -> impl Iterator<Item = &ManagedEntry> {
        self.rows.iter().filter_map(Option::as_ref)
    }

    /// Remove rows whose `last_seen_epoch` predates `now - ttl_seconds`.
    /// Returns the number evicted.
    pub fn sweep(&mut self, now_epoch: i64, ttl_seconds: i64) -> usize {
        let cutoff = now_epoch - ttl_seconds;
        let stale: Vec<String> = self
            .rows()
            .filter(|row| row.last_seen_epoch < cutoff)
            .map(|row| row.hash.clone())
            .collect();
        for hash in &stale {
            self.remove(hash);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_and_remove_round_trip() {
        let mut cache = ManagedTorrentCache::new(4);
        assert!(cache.insert("h1", "tracker-a", 1_000, -1, 100));
        assert_eq!(cache.get_limit("h1"), Some(-1));
        assert_eq!(cache.get_tracker("h1"), Some("tracker-a"));
        assert!(cache.remove("h1"));
        assert!(cache.get("h1").is_none());
    }

    #[test]
    fn insert_fails_when_capacity_is_exhausted() {
        let mut cache = ManagedTorrentCache::new(1);
        assert!(cache.insert("h1", "tracker-a", 0, -1, 0));
        assert!(!cache.insert("h2", "tracker-a", 0, -1, 0));
    }

    #[test]
    fn insert_fails_on_duplicate_hash_without_mutating_state() {
        let mut cache = ManagedTorrentCache::new(4);
        assert!(cache.insert("h1", "tracker-a", 0, -1, 0));
        assert!(!cache.insert("h1", "tracker-b", 0, -1, 0));
        assert_eq!(cache.get_tracker("h1"), Some("tracker-a"));
    }

    #[test]
    fn update_refreshes_fields_but_not_tracker_assignment() {
        let mut cache = ManagedTorrentCache::new(4);
        cache.insert("h1", "tracker-a", 0, -1, 0);
        assert!(cache.update("h1", 5_000, 2_000, 50));
        let row = cache.get("h1").expect("row present");
        assert_eq!(row.upload_speed_bps, 5_000);
        assert_eq!(row.current_limit_bps, 2_000);
        assert_eq!(row.last_seen_epoch, 50);
        assert_eq!(row.tracker_id, "tracker-a");
    }

    #[test]
    fn removed_slot_is_reused_by_next_insert() {
        let mut cache = ManagedTorrentCache::new(1);
        cache.insert("h1", "tracker-a", 0, -1, 0);
        cache.remove("h1");
        assert!(cache.insert("h2", "tracker-b", 0, -1, 0));
    }

    #[test]
    fn sweep_evicts_only_stale_rows() {
        let mut cache = ManagedTorrentCache::new(4);
        cache.insert("fresh", "tracker-a", 0, -1, 100);
        cache.insert("stale", "tracker-a", 0, -1, 0);
        let evicted = cache.sweep(100, 50);
        assert_eq!(evicted, 1);
        assert!(cache.contains("fresh"));
        assert!(!cache.contains("stale"));
    }

    #[test]
    fn by_tracker_filters_rows() {
        let mut cache = ManagedTorrentCache::new(4);
        cache.insert("h1", "tracker-a", 0, -1, 0);
        cache.insert("h2", "tracker-b", 0, -1, 0);
        let a_rows: Vec<_> = cache.by_tracker("tracker-a").collect();
        assert_eq!(a_rows.len(), 1);
        assert_eq!(a_rows[0].hash, "h1");
    }
}
