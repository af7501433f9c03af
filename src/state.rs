//! Application state
//!
//! Holds all shared components and state

use crate::cache_store::CacheStore;
use crate::camera_registry::CameraRegistry;
use crate::download_coordinator::DownloadCoordinator;
use crate::nvr_client::NvrClient;
use crate::segment_resolver::SegmentResolver;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// NVR base URL
    pub nvr_url: String,
    /// Camera registry TOML file
    pub cameras_file: PathBuf,
    /// Cache directory for downloaded segments
    pub cache_dir: PathBuf,
    /// Hard storage budget in bytes
    pub max_cache_size_bytes: u64,
    /// Eviction watermark; sweeps bring the total back down to this
    pub cleanup_threshold_bytes: u64,
    /// Interval between timer-driven eviction sweeps
    pub cleanup_interval: Duration,
    /// Half-width of the resolve listing window, minutes
    pub resolve_window_min: i64,
    /// NVR login timeout
    pub auth_timeout: Duration,
    /// NVR listing/download timeout
    pub request_timeout: Duration,
    /// Ceiling on how long a cache request may wait for a download
    pub stream_wait_timeout: Duration,
    /// Simultaneous NVR transfers
    pub max_concurrent_downloads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            nvr_url: std::env::var("NVR_URL")
                .unwrap_or_else(|_| "http://192.168.3.210:7001".to_string()),
            cameras_file: std::env::var("CAMERAS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/footage-cache/cameras.toml")),
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/footage-cache/segments")),
            max_cache_size_bytes: env_u64("MAX_CACHE_SIZE_BYTES", 1024 * 1024 * 1024),
            cleanup_threshold_bytes: env_u64("CLEANUP_THRESHOLD_BYTES", 800 * 1024 * 1024),
            cleanup_interval: Duration::from_secs(env_u64("CLEANUP_INTERVAL_SEC", 60)),
            resolve_window_min: env_u64("RESOLVE_WINDOW_MIN", 10) as i64,
            auth_timeout: Duration::from_secs(env_u64("AUTH_TIMEOUT_SEC", 5)),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SEC", 30)),
            stream_wait_timeout: Duration::from_secs(env_u64("STREAM_WAIT_TIMEOUT_SEC", 40)),
            max_concurrent_downloads: env_u64("MAX_CONCURRENT_DOWNLOADS", 4) as usize,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// CameraRegistry (camera table + availability hints)
    pub registry: Arc<CameraRegistry>,
    /// NvrClient (recorder adapter)
    pub nvr: Arc<NvrClient>,
    /// SegmentResolver (timestamp -> candidate recordings)
    pub resolver: Arc<SegmentResolver>,
    /// DownloadCoordinator (single-flight fetching)
    pub coordinator: Arc<DownloadCoordinator>,
    /// CacheStore (bounded on-disk segment table)
    pub cache: Arc<CacheStore>,
    /// Prometheus render handle for the /metrics endpoint
    pub metrics_handle: PrometheusHandle,
}
