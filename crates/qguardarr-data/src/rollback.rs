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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! SQLite-backed rollback journal.
//!
//! Every upload-limit mutation the cycle orchestrator applies is journaled
//! here before (or alongside) being pushed to qBittorrent, so the system can
//! always recover the limits it found before it started managing a torrent.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS rollback_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        torrent_hash TEXT NOT NULL,
        old_limit INTEGER NOT NULL,
        new_limit INTEGER NOT NULL,
        tracker_id TEXT NOT NULL,
        timestamp REAL NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        restored INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
";

const CREATE_INDEX_HASH: &str =
    "CREATE INDEX IF NOT EXISTS idx_rollback_torrent_hash ON rollback_entries(torrent_hash)";
const CREATE_INDEX_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_rollback_timestamp ON rollback_entries(timestamp)";
const CREATE_INDEX_RESTORED: &str =
    "CREATE INDEX IF NOT EXISTS idx_rollback_restored ON rollback_entries(restored)";

const INSERT_ENTRY: &str = r"
    INSERT INTO rollback_entries
        (torrent_hash, old_limit, new_limit, tracker_id, timestamp, reason)
    VALUES (?, ?, ?, ?, ?, ?)
";

const SELECT_UNRESTORED: &str = r"
    SELECT torrent_hash, old_limit, new_limit, tracker_id, timestamp, reason
    FROM rollback_entries
    WHERE restored = 0
    ORDER BY timestamp ASC
";

const SELECT_DISTINCT_HASHES: &str = "SELECT DISTINCT torrent_hash FROM rollback_entries";
const SELECT_DISTINCT_UNRESTORED_HASHES: &str =
    "SELECT DISTINCT torrent_hash FROM rollback_entries WHERE restored = 0";

const SELECT_TOTAL_COUNT: &str = "SELECT COUNT(*) AS count FROM rollback_entries";
const SELECT_UNRESTORED_COUNT: &str =
    "SELECT COUNT(*) AS count FROM rollback_entries WHERE restored = 0";
const SELECT_OLDEST_UNRESTORED_TIMESTAMP: &str =
    "SELECT MIN(timestamp) AS oldest FROM rollback_entries WHERE restored = 0";

const DELETE_RESTORED_BEFORE: &str =
    "DELETE FROM rollback_entries WHERE timestamp < ? AND restored = 1";

/// A single upload-limit mutation recorded for a torrent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RollbackEntry {
    /// Torrent info hash the mutation was applied to.
    pub torrent_hash: String,
    /// Limit in effect before the mutation, bytes/sec (`-1` = unlimited).
    pub old_limit: i64,
    /// Limit pushed by the mutation, bytes/sec (`-1` = unlimited).
    pub new_limit: i64,
    /// Tracker id the torrent was matched to at the time of the mutation.
    pub tracker_id: String,
    /// Unix timestamp (seconds, fractional) the mutation was recorded.
    pub timestamp: f64,
    /// Free-form reason string, e.g. `"allocation_update"`.
    pub reason: String,
}

/// A pending mutation to journal, prior to assignment of a timestamp.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// Torrent info hash the mutation applies to.
    pub torrent_hash: String,
    /// Limit in effect before the mutation.
    pub old_limit: i64,
    /// Limit being pushed by the mutation.
    pub new_limit: i64,
    /// Tracker id the torrent is matched to.
    pub tracker_id: String,
    /// Free-form reason string.
    pub reason: String,
}

/// Aggregate counters surfaced on the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackStats {
    /// Total rollback entries ever recorded.
    pub total_entries: i64,
    /// Entries not yet marked restored.
    pub unrestored_entries: i64,
    /// Unix timestamp of the oldest unrestored entry, if any.
    pub oldest_unrestored_timestamp: Option<f64>,
}

/// Durable, append-only journal of upload-limit mutations.
#[derive(Clone)]
pub struct RollbackJournal {
    pool: SqlitePool,
}

impl RollbackJournal {
    /// Open (creating if necessary) the SQLite database at `path` and
    /// ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database file cannot be created/opened or
    /// the schema cannot be applied.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory for {}", path.display()))?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .with_context(|| format!("failed to open rollback database at {}", path.display()))?;

        let journal = Self { pool };
        journal.ensure_schema().await?;
        Ok(journal)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("failed to create rollback_entries table")?;
        sqlx::query(CREATE_INDEX_HASH)
            .execute(&self.pool)
            .await
            .context("failed to create torrent_hash index")?;
        sqlx::query(CREATE_INDEX_TIMESTAMP)
            .execute(&self.pool)
            .await
            .context("failed to create timestamp index")?;
        sqlx::query(CREATE_INDEX_RESTORED)
            .execute(&self.pool)
            .await
            .context("failed to create restored index")?;
        Ok(())
    }

    /// Record a batch of limit mutations. No-op changes (`old_limit ==
    /// new_limit`) are filtered out before insertion.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails.
    pub async fn record_batch(&self, changes: &[PendingChange], timestamp: f64) -> Result<usize> {
        let valid: Vec<&PendingChange> = changes
            .iter()
            .filter(|change| change.old_limit != change.new_limit)
            .collect();

        if valid.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to start rollback batch transaction")?;
        for change in &valid {
            sqlx::query(INSERT_ENTRY)
                .bind(&change.torrent_hash)
                .bind(change.old_limit)
                .bind(change.new_limit)
                .bind(&change.tracker_id)
                .bind(timestamp)
                .bind(&change.reason)
                .execute(&mut *tx)
                .await
                .context("failed to insert rollback entry")?;
        }
        tx.commit()
            .await
            .context("failed to commit rollback batch")?;

        Ok(valid.len())
    }

    /// Return the original limit to restore for each hash with unrestored
    /// entries.
    ///
    /// Entries are read oldest-first; the first entry seen per hash wins,
    /// so a hash with multiple unrestored mutations restores to the limit
    /// that was in effect before the *first* of those mutations, not the
    /// most recent one.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn unrestored_by_hash(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(SELECT_UNRESTORED)
            .fetch_all(&self.pool)
            .await
            .context("failed to query unrestored rollback entries")?;

        let mut original_limits = HashMap::new();
        for row in rows {
            let hash: String = row.try_get("torrent_hash")?;
            let old_limit: i64 = row.try_get("old_limit")?;
            original_limits.entry(hash).or_insert(old_limit);
        }
        Ok(original_limits)
    }

    /// List every unrestored entry, oldest first, for export/inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn export_unrestored(&self) -> Result<Vec<RollbackEntry>> {
        let rows = sqlx::query(SELECT_UNRESTORED)
            .fetch_all(&self.pool)
            .await
            .context("failed to export unrestored rollback entries")?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(RollbackEntry {
                torrent_hash: row.try_get("torrent_hash")?,
                old_limit: row.try_get("old_limit")?,
                new_limit: row.try_get("new_limit")?,
                tracker_id: row.try_get("tracker_id")?,
                timestamp: row.try_get("timestamp")?,
                reason: row.try_get("reason")?,
            });
        }
        Ok(entries)
    }

    /// Mark every unrestored entry for the given hashes as restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_restored(&self, hashes: &[String]) -> Result<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let placeholders = std::iter::repeat("?")
            .take(hashes.len())
            .collect::<Vec<_>>()
            .join(",");
        let query = format!(
            "UPDATE rollback_entries SET restored = 1 WHERE torrent_hash IN ({placeholders}) AND restored = 0"
        );
        let mut statement = sqlx::query(&query);
        for hash in hashes {
            statement = statement.bind(hash);
        }
        let result = statement
            .execute(&self.pool)
            .await
            .context("failed to mark rollback entries restored")?;
        Ok(result.rows_affected())
    }

    /// Distinct torrent hashes ever recorded, or only those with unrestored
    /// entries when `include_restored` is `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn distinct_hashes(&self, include_restored: bool) -> Result<Vec<String>> {
        let query = if include_restored {
            SELECT_DISTINCT_HASHES
        } else {
            SELECT_DISTINCT_UNRESTORED_HASHES
        };
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .context("failed to query distinct rollback hashes")?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("torrent_hash").map_err(Into::into))
            .collect()
    }

    /// Delete restored entries older than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn cleanup_older_than(&self, cutoff_timestamp: f64) -> Result<u64> {
        let result = sqlx::query(DELETE_RESTORED_BEFORE)
            .bind(cutoff_timestamp)
            .execute(&self.pool)
            .await
            .context("failed to clean up old rollback entries")?;
        Ok(result.rows_affected())
    }

    /// Reclaim disk space after a cleanup pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the vacuum fails.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("failed to vacuum rollback database")?;
        Ok(())
    }

    /// Summary counters for the stats endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if any underlying query fails.
    pub async fn stats(&self) -> Result<RollbackStats> {
        let total_entries: i64 = sqlx::query(SELECT_TOTAL_COUNT)
            .fetch_one(&self.pool)
            .await
            .context("failed to count rollback entries")?
            .try_get("count")?;
        let unrestored_entries: i64 = sqlx::query(SELECT_UNRESTORED_COUNT)
            .fetch_one(&self.pool)
            .await
            .context("failed to count unrestored rollback entries")?
            .try_get("count")?;
        let oldest_unrestored_timestamp: Option<f64> =
            sqlx::query(SELECT_OLDEST_UNRESTORED_TIMESTAMP)
                .fetch_one(&self.pool)
                .await
                .context("failed to query oldest unrestored rollback entry")?
                .try_get("oldest")?;

        Ok(RollbackStats {
            total_entries,
            unrestored_entries,
            oldest_unrestored_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(hash: &str, old: i64, new: i64) -> PendingChange {
        PendingChange {
            torrent_hash: hash.to_string(),
            old_limit: old,
            new_limit: new,
            tracker_id: "tracker-a".to_string(),
            reason: "allocation_update".to_string(),
        }
    }

    async fn journal() -> (tempfile::TempDir, RollbackJournal) {
        let dir = tempfile::tempdir().expect("temp dir");
        let journal = RollbackJournal::open(&dir.path().join("rollback.db"))
            .await
            .expect("open journal");
        (dir, journal)
    }

    #[tokio::test]
    async fn record_batch_skips_no_op_changes() {
        let (_dir, journal) = journal().await;
        let changes = vec![change("hash-a", 1000, 1000), change("hash-b", 1000, 2000)];
        let inserted = journal.record_batch(&changes, 1.0).await.expect("record");
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn unrestored_by_hash_keeps_earliest_old_limit() {
        let (_dir, journal) = journal().await;
        journal
            .record_batch(&[change("hash-a", -1, 1000)], 1.0)
            .await
            .expect("first record");
        journal
            .record_batch(&[change("hash-a", 1000, 2000)], 2.0)
            .await
            .expect("second record");

        let original = journal.unrestored_by_hash().await.expect("query");
        assert_eq!(original.get("hash-a"), Some(&-1));
    }

    #[tokio::test]
    async fn mark_restored_excludes_hash_from_future_queries() {
        let (_dir, journal) = journal().await;
        journal
            .record_batch(&[change("hash-a", -1, 1000)], 1.0)
            .await
            .expect("record");
        let restored = journal
            .mark_restored(&["hash-a".to_string()])
            .await
            .expect("mark restored");
        assert_eq!(restored, 1);

        let original = journal.unrestored_by_hash().await.expect("query");
        assert!(!original.contains_key("hash-a"));
    }

    #[tokio::test]
    async fn stats_reflect_recorded_and_restored_entries() {
        let (_dir, journal) = journal().await;
        journal
            .record_batch(
                &[change("hash-a", -1, 1000), change("hash-b", -1, 2000)],
                1.0,
            )
            .await
            .expect("record");
        journal
            .mark_restored(&["hash-a".to_string()])
            .await
            .expect("mark restored");

        let stats = journal.stats().await.expect("stats");
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.unrestored_entries, 1);
    }

    #[tokio::test]
    async fn distinct_hashes_filters_by_restored_flag() {
        let (_dir, journal) = journal().await;
        journal
            .record_batch(
                &[change("hash-a", -1, 1000), change("hash-b", -1, 2000)],
                1.0,
            )
            .await
            .expect("record");
        journal
            .mark_restored(&["hash-a".to_string()])
            .await
            .expect("mark restored");

        let all = journal.distinct_hashes(true).await.expect("all hashes");
        let unrestored = journal
            .distinct_hashes(false)
            .await
            .expect("unrestored hashes");
        assert_eq!(all.len(), 2);
        assert_eq!(unrestored, vec!["hash-b".to_string()]);
    }
}
