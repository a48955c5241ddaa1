//! The single current agenda, swapped atomically.
//!
//! Readers get an `Arc` snapshot and never see a partially rebuilt entry.
//! When a path is configured the entry is also written to disk so a restart
//! can serve the last agenda (marked stale) before the first cycle finishes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agenda::AggregationResult;
use crate::config::SourceId;
use crate::error::HearthResult;
use crate::occurrence::Occurrence;

/// Last good occurrences of one source, kept for per-source fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub captured_at: DateTime<Utc>,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Increases by one on every successful publish.
    pub version: u64,
    pub captured_at: DateTime<Utc>,
    /// The result did not come from the most recent cycle.
    pub stale: bool,
    pub result: AggregationResult,
    #[serde(default)]
    pub snapshots: BTreeMap<SourceId, SourceSnapshot>,
}

#[derive(Debug, Default)]
pub struct Cache {
    current: RwLock<Option<Arc<CacheEntry>>>,
    path: Option<PathBuf>,
    /// Serialises disk writes, which happen outside the `current` lock.
    writer: Mutex<()>,
}

impl Cache {
    pub fn in_memory() -> Self {
        Cache::default()
    }

    /// A cache persisted at `path`, seeded from it when the file exists.
    ///
    /// A loaded entry is always marked stale. An unreadable file is logged and
    /// ignored.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match read_entry(&path).await {
            Ok(Some(mut entry)) => {
                entry.stale = true;
                info!(path = %path.display(), version = entry.version, "Loaded cached agenda");
                Some(Arc::new(entry))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable agenda cache");
                None
            }
        };
        Cache {
            current: RwLock::new(current),
            path: Some(path),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The current entry, or `None` before the first successful cycle.
    pub async fn get(&self) -> Option<Arc<CacheEntry>> {
        self.current.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.current
            .read()
            .await
            .as_ref()
            .map_or(0, |entry| entry.version)
    }

    /// Replace the current entry with a fresh one.
    ///
    /// Readers see the new entry as soon as it is swapped in; the disk copy
    /// follows.
    pub async fn put(
        &self,
        result: AggregationResult,
        snapshots: BTreeMap<SourceId, SourceSnapshot>,
        captured_at: DateTime<Utc>,
    ) -> Arc<CacheEntry> {
        let entry = {
            let mut current = self.current.write().await;
            let version = current.as_ref().map_or(0, |entry| entry.version) + 1;
            let entry = Arc::new(CacheEntry {
                version,
                captured_at,
                stale: false,
                result,
                snapshots,
            });
            *current = Some(entry.clone());
            entry
        };
        self.persist().await;
        entry
    }

    /// Keep serving the current result, flagged stale. Returns the entry, if any.
    pub async fn mark_stale(&self) -> Option<Arc<CacheEntry>> {
        let entry = {
            let mut current = self.current.write().await;
            let existing = current.as_ref()?.clone();
            if existing.stale {
                return Some(existing);
            }
            let entry = Arc::new(CacheEntry {
                stale: true,
                ..(*existing).clone()
            });
            *current = Some(entry.clone());
            entry
        };
        self.persist().await;
        Some(entry)
    }

    /// Write whatever entry is current once the writer lock is held, so the
    /// file never ends up behind a later swap.
    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _writer = self.writer.lock().await;
        let Some(entry) = self.get().await else {
            return;
        };
        match write_entry(path, &entry).await {
            Ok(()) => debug!(path = %path.display(), version = entry.version, "Persisted agenda cache"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to persist agenda cache"),
        }
    }
}

async fn read_entry(path: &Path) -> HearthResult<Option<CacheEntry>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling temp file, then rename over the target.
async fn write_entry(path: &Path, entry: &CacheEntry) -> HearthResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(entry)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn result(now: DateTime<Utc>) -> AggregationResult {
        let mut result = AggregationResult::unavailable("placeholder", now, Tz::UTC);
        result.error = None;
        result.today_count = 3;
        result
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let cache = Cache::in_memory();
        assert!(cache.get().await.is_none());
        assert_eq!(cache.version().await, 0);
        assert!(cache.mark_stale().await.is_none());
    }

    #[tokio::test]
    async fn test_put_bumps_version_and_clears_stale() {
        let cache = Cache::in_memory();
        let first = cache.put(result(now()), BTreeMap::new(), now()).await;
        assert_eq!(first.version, 1);
        assert!(!first.stale);

        let stale = cache.mark_stale().await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.version, 1);
        assert_eq!(stale.result, first.result);

        let second = cache.put(result(now()), BTreeMap::new(), now()).await;
        assert_eq!(second.version, 2);
        assert!(!second.stale);
    }

    #[tokio::test]
    async fn test_reader_snapshot_survives_put() {
        let cache = Cache::in_memory();
        cache.put(result(now()), BTreeMap::new(), now()).await;
        let held = cache.get().await.unwrap();

        let mut next = result(now());
        next.today_count = 9;
        cache.put(next, BTreeMap::new(), now()).await;

        assert_eq!(held.result.today_count, 3);
        assert_eq!(cache.get().await.unwrap().result.today_count, 9);
    }

    #[tokio::test]
    async fn test_persisted_entry_reloads_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agenda.json");

        let cache = Cache::open(&path).await;
        assert!(cache.get().await.is_none());
        cache.put(result(now()), BTreeMap::new(), now()).await;
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = Cache::open(&path).await;
        let entry = reopened.get().await.unwrap();
        assert!(entry.stale);
        assert_eq!(entry.version, 1);
        assert_eq!(entry.result.today_count, 3);
    }

    #[tokio::test]
    async fn test_failed_write_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let cache = Cache::open(blocker.join("agenda.json")).await;
        let entry = cache.put(result(now()), BTreeMap::new(), now()).await;
        assert_eq!(entry.version, 1);
        assert_eq!(cache.get().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_file_follows_latest_swap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agenda.json");

        let cache = Cache::open(&path).await;
        cache.put(result(now()), BTreeMap::new(), now()).await;
        cache.put(result(now()), BTreeMap::new(), now()).await;
        cache.mark_stale().await;

        let on_disk: CacheEntry = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.version, 2);
        assert!(on_disk.stale);
        assert_eq!(&on_disk, cache.get().await.unwrap().as_ref());
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agenda.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = Cache::open(&path).await;
        assert!(cache.get().await.is_none());
    }
}
