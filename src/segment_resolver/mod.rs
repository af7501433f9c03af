//! Segment Resolver - Timestamp to Recording Mapping
//!
//! ## Responsibilities
//!
//! - Validate camera ids against the registry
//! - Query the NVR listing for a time window around the target timestamp
//! - Pick the candidate whose start is closest to the target (ties prefer
//!   the earlier segment) and compute the signed playback offset
//! - Degrade to an availability report instead of an error when the
//!   camera is unknown, the NVR is down, or no footage exists

use crate::camera_registry::CameraRegistry;
use crate::error::Error;
use crate::metrics as m;
use crate::nvr_client::NvrClient;
use std::sync::Arc;

/// One candidate recording, not yet cached
#[derive(Debug, Clone)]
pub struct CandidateSegment {
    pub filename: String,
    pub start_timestamp: i64,
    pub size_bytes: Option<u64>,
}

/// Per-request resolution outcome; camera problems are carried in-band,
/// never thrown
#[derive(Debug, Clone)]
pub struct VideoResolutionResult {
    /// Candidates ordered by start timestamp
    pub candidates: Vec<CandidateSegment>,
    /// Index of the closest candidate, `-1` when there is nothing to play
    pub closest_index: i32,
    /// `target - candidates[closest].start`; negative when the target
    /// precedes the segment start so the player can seek backward
    pub offset_seconds: i64,
    pub camera_available: bool,
    pub camera_error: Option<String>,
}

impl VideoResolutionResult {
    fn unavailable(error: String) -> Self {
        Self {
            candidates: Vec::new(),
            closest_index: -1,
            offset_seconds: 0,
            camera_available: false,
            camera_error: Some(error),
        }
    }
}

/// Segment resolver instance
pub struct SegmentResolver {
    registry: Arc<CameraRegistry>,
    nvr: Arc<NvrClient>,
    /// Half-width of the listing window in seconds
    window_secs: i64,
}

impl SegmentResolver {
    /// Create a new resolver with a ±`window_minutes` listing window
    pub fn new(registry: Arc<CameraRegistry>, nvr: Arc<NvrClient>, window_minutes: i64) -> Self {
        Self {
            registry,
            nvr,
            window_secs: window_minutes * 60,
        }
    }

    /// Resolve the recordings around `target_timestamp` for a camera.
    ///
    /// Camera problems are reported inside the result; callers always get
    /// a well-formed outcome.
    pub async fn resolve(&self, camera_id: i64, target_timestamp: i64) -> VideoResolutionResult {
        let camera = match self.registry.describe(camera_id).await {
            Some(camera) => camera,
            None => {
                metrics::counter!(m::DOWNLOAD_ERRORS, "category" => "invalid_camera").increment(1);
                tracing::warn!(camera_id = camera_id, "Resolve requested for unknown camera");
                return VideoResolutionResult::unavailable("unknown camera".to_string());
            }
        };

        let from = target_timestamp - self.window_secs;
        let to = target_timestamp + self.window_secs;

        let recordings = match self.nvr.list_recordings(&camera, from, to).await {
            Ok(recordings) => recordings,
            Err(e) => {
                metrics::counter!(m::DOWNLOAD_ERRORS, "category" => e.category()).increment(1);
                self.registry
                    .mark_unavailable(camera_id, &e.to_string())
                    .await;
                return VideoResolutionResult::unavailable(e.to_string());
            }
        };

        self.registry.mark_available(camera_id).await;

        let candidates: Vec<CandidateSegment> = recordings
            .into_iter()
            .map(|r| CandidateSegment {
                filename: r.filename,
                start_timestamp: r.start,
                size_bytes: r.size,
            })
            .collect();

        if candidates.is_empty() {
            // The camera responded; "no footage" is an expected condition,
            // reported in-band rather than thrown.
            metrics::counter!(m::DOWNLOAD_ERRORS, "category" => "segment_not_found").increment(1);
            return VideoResolutionResult {
                candidates,
                closest_index: -1,
                offset_seconds: 0,
                camera_available: true,
                camera_error: Some(Error::NoFootage(format!(
                    "no recordings within {}s of {}",
                    self.window_secs, target_timestamp
                ))
                .to_string()),
            };
        }

        let closest = closest_index(&candidates, target_timestamp);
        let offset_seconds = target_timestamp - candidates[closest].start_timestamp;

        tracing::debug!(
            camera_id = camera_id,
            target = target_timestamp,
            candidates = candidates.len(),
            closest_index = closest,
            offset_seconds = offset_seconds,
            "Resolved footage candidates"
        );

        VideoResolutionResult {
            candidates,
            closest_index: closest as i32,
            offset_seconds,
            camera_available: true,
            camera_error: None,
        }
    }
}

/// Index minimizing `abs(start - target)`; ties prefer the earlier
/// segment, which the strict `<` comparison guarantees for a list sorted
/// by start.
fn closest_index(candidates: &[CandidateSegment], target: i64) -> usize {
    let mut best = 0usize;
    let mut best_distance = i64::MAX;
    for (i, candidate) in candidates.iter().enumerate() {
        let distance = (candidate.start_timestamp - target).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_registry::CameraConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(start: i64) -> CandidateSegment {
        CandidateSegment {
            filename: format!("seg_{}.mp4", start),
            start_timestamp: start,
            size_bytes: None,
        }
    }

    #[test]
    fn test_closest_index_prefers_earlier_on_tie() {
        // 60s before vs 60s after the target.
        let candidates = vec![candidate(1_752_595_140), candidate(1_752_595_260)];
        assert_eq!(closest_index(&candidates, 1_752_595_200), 0);
    }

    #[test]
    fn test_closest_index_picks_minimum_distance() {
        let candidates = vec![candidate(100), candidate(190), candidate(400)];
        assert_eq!(closest_index(&candidates, 200), 1);
    }

    async fn resolver_for(server: &MockServer) -> SegmentResolver {
        let registry = Arc::new(CameraRegistry::new(vec![CameraConfig {
            id: 1,
            channel_path: "ch01".to_string(),
            login: "viewer".to_string(),
            password: "secret".to_string(),
        }]));
        let nvr = Arc::new(NvrClient::new(
            server.uri(),
            Duration::from_secs(2),
            Duration::from_secs(5),
        ));
        SegmentResolver::new(registry, nvr, 10)
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "t0ken"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_picks_closest_with_positive_offset() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/channels/ch01/recordings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"filename": "seg_1752595140.mp4", "start": 1752595140i64},
                {"filename": "seg_1752595260.mp4", "start": 1752595260i64}
            ])))
            .mount(&server)
            .await;

        let result = resolver_for(&server).await.resolve(1, 1_752_595_200).await;

        assert!(result.camera_available);
        assert!(result.camera_error.is_none());
        assert_eq!(result.closest_index, 0);
        assert_eq!(result.offset_seconds, 60);
        assert_eq!(result.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_negative_offset_when_target_precedes_start() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/channels/ch01/recordings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"filename": "seg_500.mp4", "start": 500}
            ])))
            .mount(&server)
            .await;

        let result = resolver_for(&server).await.resolve(1, 470).await;
        assert_eq!(result.closest_index, 0);
        assert_eq!(result.offset_seconds, -30);
    }

    #[tokio::test]
    async fn test_resolve_unknown_camera() {
        let server = MockServer::start().await;
        let result = resolver_for(&server).await.resolve(42, 1_752_595_200).await;

        assert!(!result.camera_available);
        assert_eq!(result.camera_error.as_deref(), Some("unknown camera"));
        assert_eq!(result.closest_index, -1);
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_empty_listing_reports_no_footage() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/channels/ch01/recordings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let resolver = resolver_for(&server).await;
        let result = resolver.resolve(1, 1_752_595_200).await;

        // The camera answered: available, but nothing to play.
        assert!(result.camera_available);
        assert_eq!(result.closest_index, -1);
        assert!(result.camera_error.is_some());
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_nvr_failure_marks_camera_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = resolver_for(&server).await;
        let result = resolver.resolve(1, 1_752_595_200).await;

        assert!(!result.camera_available);
        assert!(result.camera_error.is_some());

        let camera = resolver.registry.describe(1).await.unwrap();
        assert!(!camera.last_known_available);
    }
}
