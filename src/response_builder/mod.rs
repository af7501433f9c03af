//! Response Builder - Client-Facing Resolution Payload
//!
//! Pure transformation from a resolution result to the payload the web
//! tier consumes. No I/O; the descriptor is returned before any segment
//! content is cached, so the client can start requesting cache URLs
//! immediately.

use crate::segment_resolver::VideoResolutionResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Camera availability metadata carried alongside the candidates
#[derive(Debug, Clone, Serialize)]
pub struct CameraMeta {
    pub camera_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_error: Option<String>,
}

/// Resolution payload returned to the web tier
#[derive(Debug, Clone, Serialize)]
pub struct VideoResolutionPayload {
    pub camera_id: i64,
    /// Candidate index -> cache-relative URL
    pub videos: BTreeMap<usize, String>,
    /// Candidate index -> recording start, unix seconds
    pub start_timestamps: BTreeMap<usize, i64>,
    /// `-1` means nothing to play; never an index into `videos`
    pub closest_index: i32,
    pub offset_seconds: i64,
    pub meta: CameraMeta,
}

/// Assemble the client payload from a resolution result
pub fn build_response(result: &VideoResolutionResult, camera_id: i64) -> VideoResolutionPayload {
    let mut videos = BTreeMap::new();
    let mut start_timestamps = BTreeMap::new();

    for (index, candidate) in result.candidates.iter().enumerate() {
        videos.insert(
            index,
            format!(
                "/api/cache/{}/{}",
                camera_id,
                urlencoding::encode(&candidate.filename)
            ),
        );
        start_timestamps.insert(index, candidate.start_timestamp);
    }

    VideoResolutionPayload {
        camera_id,
        videos,
        start_timestamps,
        closest_index: result.closest_index,
        offset_seconds: result.offset_seconds,
        meta: CameraMeta {
            camera_available: result.camera_available,
            camera_error: result.camera_error.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_resolver::CandidateSegment;

    fn result_with(candidates: Vec<CandidateSegment>, closest: i32) -> VideoResolutionResult {
        VideoResolutionResult {
            candidates,
            closest_index: closest,
            offset_seconds: 60,
            camera_available: true,
            camera_error: None,
        }
    }

    #[test]
    fn test_build_response_maps_candidates() {
        let result = result_with(
            vec![
                CandidateSegment {
                    filename: "seg_1752595140.mp4".to_string(),
                    start_timestamp: 1_752_595_140,
                    size_bytes: None,
                },
                CandidateSegment {
                    filename: "seg_1752595260.mp4".to_string(),
                    start_timestamp: 1_752_595_260,
                    size_bytes: Some(1024),
                },
            ],
            0,
        );

        let payload = build_response(&result, 7);

        assert_eq!(payload.camera_id, 7);
        assert_eq!(payload.closest_index, 0);
        assert_eq!(payload.offset_seconds, 60);
        assert_eq!(
            payload.videos.get(&0).map(String::as_str),
            Some("/api/cache/7/seg_1752595140.mp4")
        );
        assert_eq!(payload.start_timestamps.get(&1), Some(&1_752_595_260));
        assert!(payload.meta.camera_available);
    }

    #[test]
    fn test_build_response_tolerates_empty_candidates() {
        let mut result = result_with(Vec::new(), -1);
        result.offset_seconds = 0;
        result.camera_error = Some("no recordings within 600s of 100".to_string());

        let payload = build_response(&result, 3);

        assert!(payload.videos.is_empty());
        assert!(payload.start_timestamps.is_empty());
        assert_eq!(payload.closest_index, -1);
        assert!(payload.meta.camera_error.is_some());
    }

    #[test]
    fn test_payload_serializes_with_string_indices() {
        let result = result_with(
            vec![CandidateSegment {
                filename: "a.mp4".to_string(),
                start_timestamp: 100,
                size_bytes: None,
            }],
            0,
        );

        let json = serde_json::to_value(build_response(&result, 1)).unwrap();
        assert_eq!(json["videos"]["0"], "/api/cache/1/a.mp4");
        assert_eq!(json["start_timestamps"]["0"], 100);
        assert_eq!(json["meta"]["camera_available"], true);
    }
}
