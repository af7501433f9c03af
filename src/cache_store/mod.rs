//! Cache Store - Bounded On-Disk Segment Table
//!
//! ## Responsibilities
//!
//! - Exclusive ownership of cached segment files and their index entries
//! - Size/age bookkeeping per segment
//! - LRU eviction sweeps (threshold-triggered and timer-triggered)
//! - Per-entry reference counts so active streams are never evicted
//!
//! Locks protect in-memory bookkeeping only; file deletion happens after
//! the index entry has been removed, outside the lock.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// One cached recording unit
#[derive(Debug, Clone)]
pub struct VideoSegment {
    /// Camera the segment was recorded by
    pub camera_id: i64,
    /// Recording start, unix seconds
    pub start_timestamp: i64,
    /// Segment filename (cache key)
    pub filename: String,
    /// Size of the finished file in bytes
    pub size_bytes: u64,
    /// When the download completed
    pub cached_at: DateTime<Utc>,
    /// Updated on every read
    pub last_accessed_at: DateTime<Utc>,
}

/// Index entry: segment bookkeeping plus the active-stream count
struct IndexEntry {
    segment: VideoSegment,
    refs: Arc<AtomicU32>,
}

/// Keeps an entry pinned while a stream is being served.
///
/// Dropping the guard releases the pin, which also covers client
/// disconnects since axum drops the body stream holding it.
pub struct StreamGuard {
    refs: Arc<AtomicU32>,
}

impl StreamGuard {
    fn new(refs: Arc<AtomicU32>) -> Self {
        refs.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!(crate::metrics::STREAMS_IN_FLIGHT).increment(1.0);
        Self { refs }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(crate::metrics::STREAMS_IN_FLIGHT).decrement(1.0);
    }
}

/// Cache size summary for the admin surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheSize {
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Cache store instance
pub struct CacheStore {
    /// Cache directory (exclusively mutated by this store and the
    /// coordinator's temp-file step)
    dir: PathBuf,
    /// Hard storage budget
    max_size_bytes: u64,
    /// Soft watermark; sweeps bring the total back down to this
    cleanup_threshold_bytes: u64,
    /// filename -> entry
    index: RwLock<HashMap<String, IndexEntry>>,
}

impl CacheStore {
    /// Create the store, preparing an empty cache directory.
    ///
    /// Leftover files from a previous run (including `.part` temp files)
    /// are removed so the index and the disk start in agreement.
    pub async fn new(
        dir: PathBuf,
        max_size_bytes: u64,
        cleanup_threshold_bytes: u64,
    ) -> Result<Self> {
        if cleanup_threshold_bytes > max_size_bytes {
            return Err(Error::Config(format!(
                "cleanup threshold {} exceeds max cache size {}",
                cleanup_threshold_bytes, max_size_bytes
            )));
        }

        fs::create_dir_all(&dir).await?;

        let mut removed = 0usize;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed = removed, "Removed stale cache files from previous run");
        }

        Ok(Self {
            dir,
            max_size_bytes,
            cleanup_threshold_bytes,
            index: RwLock::new(HashMap::new()),
        })
    }

    /// Cache directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of a (validated) cached segment file
    pub fn file_path(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.dir.join(filename))
    }

    /// Look up a segment by filename
    pub async fn lookup(&self, filename: &str) -> Option<VideoSegment> {
        self.index
            .read()
            .await
            .get(filename)
            .map(|e| e.segment.clone())
    }

    /// Update `last_accessed_at` for a segment
    pub async fn touch(&self, filename: &str) {
        if let Some(entry) = self.index.write().await.get_mut(filename) {
            entry.segment.last_accessed_at = Utc::now();
        }
    }

    /// Look up a segment and pin it for streaming.
    ///
    /// The returned guard must live as long as the response body; eviction
    /// skips pinned entries.
    pub async fn acquire(&self, filename: &str) -> Option<(VideoSegment, StreamGuard)> {
        let mut index = self.index.write().await;
        let entry = index.get_mut(filename)?;
        entry.segment.last_accessed_at = Utc::now();
        Some((entry.segment.clone(), StreamGuard::new(entry.refs.clone())))
    }

    /// Register a freshly downloaded segment.
    ///
    /// Ownership of the on-disk file transfers to the store here. Triggers
    /// an inline sweep when the running total crosses the threshold; the
    /// sweep spares the segment being registered so it survives until the
    /// waiting client has had a chance to stream it.
    pub async fn register(&self, segment: VideoSegment) {
        let filename = segment.filename.clone();
        let over_threshold = {
            let mut index = self.index.write().await;
            index.insert(
                filename.clone(),
                IndexEntry {
                    segment,
                    refs: Arc::new(AtomicU32::new(0)),
                },
            );
            total_bytes(&index) > self.cleanup_threshold_bytes
        };

        tracing::debug!(filename = %filename, "Segment registered in cache");

        if over_threshold {
            self.sweep_excluding(Some(&filename)).await;
        }
    }

    /// Sum of all indexed segment sizes
    pub async fn current_size_bytes(&self) -> u64 {
        total_bytes(&*self.index.read().await)
    }

    /// File count and total size for the admin surface
    pub async fn size(&self) -> CacheSize {
        let index = self.index.read().await;
        CacheSize {
            file_count: index.len(),
            total_bytes: total_bytes(&index),
        }
    }

    /// Evict least-recently-used unreferenced entries until the total is
    /// at or below the cleanup threshold.
    ///
    /// Pinned entries are skipped. If only pinned entries remain and the
    /// total is still above threshold, the pass stops with a warning; it
    /// never blocks.
    pub async fn sweep(&self) {
        self.sweep_excluding(None).await;
    }

    async fn sweep_excluding(&self, spare: Option<&str>) {
        // Snapshot candidates oldest-accessed first.
        let mut candidates: Vec<(String, DateTime<Utc>)> = {
            let index = self.index.read().await;
            if total_bytes(&index) <= self.cleanup_threshold_bytes {
                return;
            }
            index
                .iter()
                .filter(|(name, _)| spare != Some(name.as_str()))
                .map(|(name, e)| (name.clone(), e.segment.last_accessed_at))
                .collect()
        };
        candidates.sort_by_key(|(_, accessed)| *accessed);

        let mut evicted = 0usize;
        let mut freed = 0u64;
        for (filename, _) in candidates {
            let remaining = {
                let mut index = self.index.write().await;
                if total_bytes(&index) <= self.cleanup_threshold_bytes {
                    break;
                }
                match index.get(&filename) {
                    Some(entry) if entry.refs.load(Ordering::SeqCst) == 0 => {
                        let entry = index.remove(&filename).expect("entry present");
                        freed += entry.segment.size_bytes;
                        evicted += 1;
                        total_bytes(&index)
                    }
                    // Pinned by an active stream, or already gone.
                    _ => continue,
                }
            };

            // Index entry is gone; delete the file outside the lock.
            if let Ok(path) = self.file_path(&filename) {
                if let Err(e) = fs::remove_file(&path).await {
                    tracing::warn!(
                        filename = %filename,
                        error = %e,
                        "Failed to delete evicted segment file"
                    );
                }
            }
            metrics::counter!(crate::metrics::CACHE_EVICTIONS).increment(1);

            tracing::debug!(
                filename = %filename,
                remaining_bytes = remaining,
                "Evicted segment"
            );
        }

        let remaining = self.current_size_bytes().await;
        if remaining > self.max_size_bytes {
            tracing::warn!(
                remaining_bytes = remaining,
                max_size_bytes = self.max_size_bytes,
                "Pinned entries hold the cache above its hard budget"
            );
        } else if remaining > self.cleanup_threshold_bytes {
            tracing::warn!(
                remaining_bytes = remaining,
                threshold_bytes = self.cleanup_threshold_bytes,
                "Eviction pass could not reach threshold; all remaining entries are in use"
            );
        } else if evicted > 0 {
            tracing::info!(
                evicted = evicted,
                freed_bytes = freed,
                remaining_bytes = remaining,
                "Eviction sweep complete"
            );
        }
    }

    /// Drop all entries and files.
    ///
    /// Removes as many files as possible; the first I/O error is surfaced
    /// after the pass instead of aborting it.
    pub async fn clear(&self) -> Result<usize> {
        let filenames: Vec<String> = {
            let mut index = self.index.write().await;
            let names = index.keys().cloned().collect();
            index.clear();
            names
        };

        let mut removed = 0usize;
        let mut first_error: Option<Error> = None;
        for filename in &filenames {
            let path = self.dir.join(filename);
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::error!(
                        filename = %filename,
                        error = %e,
                        "Failed to remove cached file during clear"
                    );
                    if first_error.is_none() {
                        first_error = Some(e.into());
                    }
                }
            }
        }

        tracing::info!(removed = removed, "Cache cleared");

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

fn total_bytes(index: &HashMap<String, IndexEntry>) -> u64 {
    index.values().map(|e| e.segment.size_bytes).sum()
}

/// Reject filenames that could escape the cache directory
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
    {
        return Err(Error::Internal(format!("invalid filename: {:?}", filename)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store(max: u64, threshold: u64) -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().to_path_buf(), max, threshold)
            .await
            .unwrap();
        (dir, store)
    }

    fn segment(filename: &str, size: u64, accessed_offset_secs: i64) -> VideoSegment {
        let now = Utc::now();
        VideoSegment {
            camera_id: 1,
            start_timestamp: 1_752_595_200,
            filename: filename.to_string(),
            size_bytes: size,
            cached_at: now,
            last_accessed_at: now + chrono::Duration::seconds(accessed_offset_secs),
        }
    }

    async fn write_file(store: &CacheStore, filename: &str) {
        fs::write(store.dir().join(filename), b"data").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_lookup_roundtrip() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("a.mp4", 100, 0)).await;

        let found = store.lookup("a.mp4").await.unwrap();
        assert_eq!(found.filename, "a.mp4");
        assert_eq!(found.size_bytes, 100);
        assert!(store.lookup("b.mp4").await.is_none());
    }

    #[tokio::test]
    async fn test_size_accounting() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("a.mp4", 100, 0)).await;
        store.register(segment("b.mp4", 250, 0)).await;

        assert_eq!(store.current_size_bytes().await, 350);
        let size = store.size().await;
        assert_eq!(size.file_count, 2);
        assert_eq!(size.total_bytes, 350);
    }

    #[tokio::test]
    async fn test_sweep_evicts_lru_first_down_to_threshold() {
        // 900MB indexed, threshold 800MB, max 1GB.
        const MB: u64 = 1024 * 1024;
        let (_dir, store) = test_store(1024 * MB, 800 * MB).await;

        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            write_file(&store, name).await;
        }
        // Oldest access first: a, then b, then c. Registering c crosses
        // the threshold and triggers the inline sweep.
        store.register(segment("a.mp4", 300 * MB, 10)).await;
        store.register(segment("b.mp4", 300 * MB, 20)).await;
        store.register(segment("c.mp4", 300 * MB, 30)).await;

        // One eviction (oldest-accessed) suffices: 900 -> 600 <= 800.
        assert!(store.current_size_bytes().await <= 800 * MB);
        assert!(store.lookup("a.mp4").await.is_none());
        assert!(store.lookup("b.mp4").await.is_some());
        assert!(store.lookup("c.mp4").await.is_some());
        assert!(!store.dir().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_inline_sweep_spares_segment_being_registered() {
        // A single segment bigger than the threshold must not be evicted
        // by its own registration.
        let (_dir, store) = test_store(1000, 100).await;
        write_file(&store, "a.mp4").await;
        store.register(segment("a.mp4", 300, 0)).await;

        assert!(store.lookup("a.mp4").await.is_some());

        // A plain sweep later may evict it once nothing pins it.
        store.sweep().await;
        assert!(store.lookup("a.mp4").await.is_none());
    }

    #[tokio::test]
    async fn test_register_triggers_inline_sweep() {
        let (_dir, store) = test_store(1000, 500).await;
        store.register(segment("a.mp4", 400, 0)).await;
        write_file(&store, "a.mp4").await;
        write_file(&store, "b.mp4").await;

        // Crossing the threshold on register runs the sweep inline.
        store.register(segment("b.mp4", 400, 10)).await;

        assert!(store.current_size_bytes().await <= 500);
        assert!(store.lookup("a.mp4").await.is_none());
        assert!(store.lookup("b.mp4").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_referenced_entries() {
        let (_dir, store) = test_store(1000, 400).await;
        for name in ["a.mp4", "b.mp4"] {
            write_file(&store, name).await;
        }
        store.register(segment("a.mp4", 300, 0)).await;

        // Pin the LRU entry before the threshold is crossed; the inline
        // sweep at the next register must pass over it (and spare the
        // entry being registered), leaving the total above threshold.
        let (_, guard) = store.acquire("a.mp4").await.unwrap();
        store.register(segment("b.mp4", 300, 10)).await;

        assert!(store.lookup("a.mp4").await.is_some());
        assert!(store.lookup("b.mp4").await.is_some());
        assert_eq!(store.current_size_bytes().await, 600);

        // Released: the oldest entry goes first and the pass stops at
        // the threshold.
        drop(guard);
        store.sweep().await;
        assert!(store.lookup("a.mp4").await.is_none());
        assert!(store.lookup("b.mp4").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_stops_when_all_entries_referenced() {
        let (_dir, store) = test_store(1000, 400).await;
        for name in ["a.mp4", "b.mp4"] {
            write_file(&store, name).await;
        }
        store.register(segment("a.mp4", 300, 0)).await;
        let (_, _guard_a) = store.acquire("a.mp4").await.unwrap();
        store.register(segment("b.mp4", 300, 10)).await;
        let (_, _guard_b) = store.acquire("b.mp4").await.unwrap();

        store.sweep().await;

        // Nothing evictable: the pass ends without blocking.
        assert_eq!(store.current_size_bytes().await, 600);
    }

    #[tokio::test]
    async fn test_touch_updates_last_accessed() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("a.mp4", 100, -3600)).await;

        let before = store.lookup("a.mp4").await.unwrap().last_accessed_at;
        store.touch("a.mp4").await;
        let after = store.lookup("a.mp4").await.unwrap().last_accessed_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_acquire_updates_last_accessed() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("a.mp4", 100, -3600)).await;

        let before = store.lookup("a.mp4").await.unwrap().last_accessed_at;
        let (_, _guard) = store.acquire("a.mp4").await.unwrap();
        let after = store.lookup("a.mp4").await.unwrap().last_accessed_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_clear_removes_files_and_reports_count() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("a.mp4", 100, 0)).await;
        store.register(segment("b.mp4", 100, 0)).await;
        for name in ["a.mp4", "b.mp4"] {
            write_file(&store, name).await;
        }

        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.size().await.file_count, 0);
        assert!(!store.dir().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_clear_continues_past_missing_files() {
        let (_dir, store) = test_store(1000, 800).await;
        store.register(segment("gone.mp4", 100, 0)).await;
        store.register(segment("here.mp4", 100, 0)).await;
        write_file(&store, "here.mp4").await;

        // "gone.mp4" was never written: clear reports the error but still
        // removes the other file and drops all index entries.
        let result = store.clear().await;
        assert!(result.is_err());
        assert_eq!(store.size().await.file_count, 0);
        assert!(!store.dir().join("here.mp4").exists());
    }

    #[tokio::test]
    async fn test_new_rejects_threshold_above_max() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheStore::new(dir.path().to_path_buf(), 100, 200).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_new_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.mp4.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("old.mp4"), b"stale").unwrap();

        let store = CacheStore::new(dir.path().to_path_buf(), 1000, 800)
            .await
            .unwrap();
        assert!(!store.dir().join("old.mp4.part").exists());
        assert!(!store.dir().join("old.mp4").exists());
    }

    #[test]
    fn test_filename_validation() {
        assert!(validate_filename("seg_1752595140.mp4").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b.mp4").is_err());
        assert!(validate_filename("").is_err());
    }
}
