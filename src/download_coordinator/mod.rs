//! Download Coordinator - Single-Flight Segment Fetching
//!
//! ## Responsibilities
//!
//! - Fetch each `(camera_id, filename)` key from the NVR at most once,
//!   no matter how many requests demand it concurrently
//! - Write downloads to a `.part` temp file and publish them into the
//!   cache with an atomic rename, so a partial file is never served
//! - Bound simultaneous NVR transfers with a semaphore; excess demand
//!   queues instead of failing
//!
//! Failed downloads are not retried here; retry is the caller's decision.

use crate::cache_store::{CacheStore, VideoSegment};
use crate::camera_registry::{CameraDescriptor, CameraRegistry};
use crate::error::{Error, Result};
use crate::metrics as m;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, Semaphore};

/// Seam between the coordinator and the NVR transport.
///
/// Lets the single-flight engine be exercised without a live recorder.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    /// Fetch one segment into `dest`, returning the bytes written
    async fn fetch_segment(
        &self,
        camera: &CameraDescriptor,
        filename: &str,
        dest: &Path,
    ) -> Result<u64>;
}

type TaskKey = (i64, String);

/// Terminal outcome observed by every waiter on a key
#[derive(Debug, Clone)]
enum DownloadOutcome {
    Done(VideoSegment),
    Failed(String),
}

/// Download coordinator instance
pub struct DownloadCoordinator {
    registry: Arc<CameraRegistry>,
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn SegmentFetcher>,
    /// Live tasks; an entry exists exactly while a download is pending or
    /// in flight for its key
    tasks: Arc<Mutex<HashMap<TaskKey, watch::Receiver<Option<DownloadOutcome>>>>>,
    /// Bounds simultaneous NVR transfers
    semaphore: Arc<Semaphore>,
}

impl DownloadCoordinator {
    /// Create a new coordinator
    pub fn new(
        registry: Arc<CameraRegistry>,
        cache: Arc<CacheStore>,
        fetcher: Arc<dyn SegmentFetcher>,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            registry,
            cache,
            fetcher,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
        }
    }

    /// Ensure a segment is present in the cache, suspending the caller
    /// until it is or until failure is final.
    ///
    /// All concurrent callers for one key observe the same terminal
    /// outcome.
    pub async fn ensure_cached(&self, camera_id: i64, filename: &str) -> Result<VideoSegment> {
        if let Some(segment) = self.cache.lookup(filename).await {
            self.cache.touch(filename).await;
            return Ok(segment);
        }

        let key: TaskKey = (camera_id, filename.to_string());
        let mut rx = {
            let mut tasks = self.tasks.lock().await;
            match tasks.get(&key) {
                // A task is already pending or in flight: attach as waiter.
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    tasks.insert(key.clone(), rx.clone());
                    self.spawn_download(key.clone(), tx);
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| Error::Internal("download task dropped without an outcome".to_string()))?
            .clone()
            .expect("waited for Some");

        match outcome {
            DownloadOutcome::Done(segment) => Ok(segment),
            DownloadOutcome::Failed(message) => Err(Error::DownloadFailed(message)),
        }
    }

    fn spawn_download(&self, key: TaskKey, tx: watch::Sender<Option<DownloadOutcome>>) {
        let registry = self.registry.clone();
        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();
        let tasks = self.tasks.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let (camera_id, filename) = key.clone();

            // Queue behind the concurrency bound rather than fail.
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("download semaphore closed");

            metrics::gauge!(m::DOWNLOADS_IN_PROGRESS).increment(1.0);
            let started = Instant::now();

            let outcome = run_download(&registry, &cache, fetcher.as_ref(), camera_id, &filename)
                .await;

            metrics::gauge!(m::DOWNLOADS_IN_PROGRESS).decrement(1.0);

            let outcome = match outcome {
                Ok(segment) => {
                    metrics::histogram!(m::DOWNLOAD_DURATION)
                        .record(started.elapsed().as_secs_f64());
                    registry.mark_available(camera_id).await;
                    tracing::info!(
                        camera_id = camera_id,
                        filename = %filename,
                        size_bytes = segment.size_bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Segment download complete"
                    );
                    DownloadOutcome::Done(segment)
                }
                Err(e) => {
                    metrics::counter!(m::DOWNLOAD_ERRORS, "category" => e.category())
                        .increment(1);
                    if matches!(e, Error::NvrUnreachable(_) | Error::Timeout(_)) {
                        registry.mark_unavailable(camera_id, &e.to_string()).await;
                    }
                    tracing::warn!(
                        camera_id = camera_id,
                        filename = %filename,
                        error = %e,
                        "Segment download failed"
                    );
                    DownloadOutcome::Failed(e.to_string())
                }
            };

            // Publish the terminal outcome, then retire the task. Waiters
            // holding the receiver still observe the value.
            let _ = tx.send(Some(outcome));
            tasks.lock().await.remove(&key);
        });
    }
}

/// Fetch one segment to a temp file and publish it into the cache
async fn run_download(
    registry: &CameraRegistry,
    cache: &CacheStore,
    fetcher: &dyn SegmentFetcher,
    camera_id: i64,
    filename: &str,
) -> Result<VideoSegment> {
    let camera = registry
        .describe(camera_id)
        .await
        .ok_or(Error::UnknownCamera(camera_id))?;

    let final_path = cache.file_path(filename)?;
    let temp_path = final_path.with_extension(
        final_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!("{}.part", e))
            .unwrap_or_else(|| "part".to_string()),
    );

    let size_bytes = match fetcher.fetch_segment(&camera, filename, &temp_path).await {
        Ok(size) => size,
        Err(e) => {
            // Never leave partial content behind.
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
    };

    if size_bytes == 0 {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(Error::DownloadFailed(format!(
            "NVR returned empty segment {}",
            filename
        )));
    }

    // Same-volume rename: the finished file appears atomically.
    if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    let now = Utc::now();
    let segment = VideoSegment {
        camera_id,
        start_timestamp: start_from_filename(filename),
        filename: filename.to_string(),
        size_bytes,
        cached_at: now,
        last_accessed_at: now,
    };
    cache.register(segment.clone()).await;

    Ok(segment)
}

/// Recover the recording start from the NVR filename convention
/// (`<channel>_<unix-seconds>.<ext>`). Returns 0 when no timestamp is
/// embedded; resolution never depends on this, it only enriches the
/// cache bookkeeping.
fn start_from_filename(filename: &str) -> i64 {
    filename
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() >= 9)
        .last()
        .and_then(|run| run.parse().ok())
        .unwrap_or(0)
}
