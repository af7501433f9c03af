//! Metric names and registration
//!
//! All instrumentation in this service is write-only: components emit
//! counters, gauges, and histograms through the `metrics` facade and the
//! Prometheus exporter renders them at `/metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// In-flight NVR segment downloads (gauge)
pub const DOWNLOADS_IN_PROGRESS: &str = "footage_downloads_in_progress";
/// Completed NVR download duration in seconds (histogram)
pub const DOWNLOAD_DURATION: &str = "footage_download_duration_seconds";
/// Download errors, labeled `category` (counter)
pub const DOWNLOAD_ERRORS: &str = "footage_download_errors_total";
/// Cache index hits (counter)
pub const CACHE_HITS: &str = "footage_cache_hits_total";
/// Cache index misses (counter)
pub const CACHE_MISSES: &str = "footage_cache_misses_total";
/// Segments removed by eviction sweeps (counter)
pub const CACHE_EVICTIONS: &str = "footage_cache_evictions_total";
/// Concurrent in-flight stream requests (gauge)
pub const STREAMS_IN_FLIGHT: &str = "footage_stream_requests_in_flight";
/// End-to-end stream request duration in seconds, labeled `result` (histogram)
pub const REQUEST_DURATION: &str = "footage_request_duration_seconds";

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_gauge!(
        DOWNLOADS_IN_PROGRESS,
        "Number of NVR segment downloads currently in flight"
    );
    describe_histogram!(
        DOWNLOAD_DURATION,
        Unit::Seconds,
        "Duration of completed NVR segment downloads"
    );
    describe_counter!(
        DOWNLOAD_ERRORS,
        "Download errors by category (invalid_camera, segment_not_found, upstream, client_abort, unknown)"
    );
    describe_counter!(CACHE_HITS, "Cache index hits");
    describe_counter!(CACHE_MISSES, "Cache index misses");
    describe_counter!(CACHE_EVICTIONS, "Segments removed by eviction sweeps");
    describe_gauge!(
        STREAMS_IN_FLIGHT,
        "Concurrent in-flight stream requests"
    );
    describe_histogram!(
        REQUEST_DURATION,
        Unit::Seconds,
        "End-to-end stream request duration, labeled by cache hit/miss"
    );
}
