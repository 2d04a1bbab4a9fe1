//! JSON-file-backed store for simulated upload limits.
//!
//! When the global dry-run toggle is on, the allocator computes limits as
//! usual but never pushes them to qBittorrent. Instead the simulated limits
//! are kept here, keyed by torrent hash, so operators can inspect what the
//! allocator *would* have done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::RwLock;

/// Simulated upload limits, persisted as a flat JSON object on disk.
pub struct DryRunStore {
    path: PathBuf,
    limits: RwLock<HashMap<String, i64>>,
}

impl DryRunStore {
    /// Load the store from `path`, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        let limits = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse dry-run store at {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read dry-run store at {}", path.display())
                });
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            limits: RwLock::new(limits),
        })
    }

    /// Look up the simulated limit recorded for `hash`.
    pub async fn get(&self, hash: &str) -> Option<i64> {
        self.limits.read().await.get(hash).copied()
    }

    /// Return a snapshot of every simulated limit currently stored.
    pub async fn all(&self) -> HashMap<String, i64> {
        self.limits.read().await.clone()
    }

    /// Merge `new_limits` into the store and persist the result.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated store cannot be serialized or
    /// written to disk.
    pub async fn set_many(&self, new_limits: &HashMap<String, i64>) -> Result<usize> {
        let mut limits = self.limits.write().await;
        for (hash, limit) in new_limits {
            limits.insert(hash.clone(), *limit);
        }
        let count = limits.len();
        self.persist(&limits).await?;
        Ok(count)
    }

    /// Remove every simulated limit and persist the now-empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written to disk.
    pub async fn clear(&self) -> Result<()> {
        let mut limits = self.limits.write().await;
        limits.clear();
        self.persist(&limits).await
    }

    async fn persist(&self, limits: &HashMap<String, i64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory for {}", self.path.display()))?;
        }

        let serialized =
            serde_json::to_vec_pretty(limits).context("failed to serialize dry-run store")?;
        tokio::fs::write(&self.path, serialized)
            .await
            .with_context(|| format!("failed to write dry-run store at {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = DryRunStore::load(&dir.path().join("dry_run.json"))
            .await
            .expect("load");
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn set_many_merges_and_persists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dry_run.json");
        let store = DryRunStore::load(&path).await.expect("load");

        let mut first = HashMap::new();
        first.insert("hash-a".to_string(), 1000);
        store.set_many(&first).await.expect("set_many");

        let mut second = HashMap::new();
        second.insert("hash-b".to_string(), 2000);
        let count = store.set_many(&second).await.expect("set_many");
        assert_eq!(count, 2);

        let reloaded = DryRunStore::load(&path).await.expect("reload");
        assert_eq!(reloaded.get("hash-a").await, Some(1000));
        assert_eq!(reloaded.get("hash-b").await, Some(2000));
    }

    #[tokio::test]
    async fn clear_empties_store_and_persists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dry_run.json");
        let store = DryRunStore::load(&path).await.expect("load");

        let mut limits = HashMap::new();
        limits.insert("hash-a".to_string(), 1000);
        store.set_many(&limits).await.expect("set_many");

        store.clear().await.expect("clear");
        assert!(store.all().await.is_empty());

        let reloaded = DryRunStore::load(&path).await.expect("reload");
        assert!(reloaded.all().await.is_empty());
    }
}
