//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::metrics as m;
use crate::response_builder;
use crate::state::AppState;
use crate::streaming;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & metrics
        .route("/healthz", get(super::health_check))
        .route("/metrics", get(render_metrics))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        // Footage resolution
        .route("/api/videos/:camera_id", get(resolve_videos))
        // Cache
        .route("/api/cache/size", get(cache_size))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/:camera_id/:filename", get(stream_segment))
        .with_state(state)
}

/// Prometheus exposition endpoint
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

/// List registered cameras with availability hints
async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    /// Event time, unix seconds
    timestamp: i64,
}

/// Resolve the recordings closest to an event timestamp.
///
/// Camera problems are reported in the payload's `meta` block; this
/// endpoint only fails on transport-level errors.
async fn resolve_videos(
    State(state): State<AppState>,
    Path(camera_id): Path<i64>,
    Query(query): Query<VideoQuery>,
) -> impl IntoResponse {
    let result = state.resolver.resolve(camera_id, query.timestamp).await;
    Json(response_builder::build_response(&result, camera_id))
}

/// Stream one cached segment, downloading it first when necessary.
///
/// Waits up to the configured stream-wait timeout for a download before
/// giving up with 504.
async fn stream_segment(
    State(state): State<AppState>,
    Path((camera_id, filename)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let started = Instant::now();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (segment, guard, result) = match state.cache.acquire(&filename).await {
        Some((segment, guard)) => {
            metrics::counter!(m::CACHE_HITS).increment(1);
            (segment, guard, "hit")
        }
        None => {
            metrics::counter!(m::CACHE_MISSES).increment(1);
            let wait = state.config.stream_wait_timeout;
            tokio::time::timeout(
                wait,
                state.coordinator.ensure_cached(camera_id, &filename),
            )
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "segment {} not ready after {}s",
                    filename,
                    wait.as_secs()
                ))
            })??;

            // The segment was just registered; losing it here means the
            // cache is thrashing under pinned load.
            let (segment, guard) = state.cache.acquire(&filename).await.ok_or_else(|| {
                Error::CacheFull(format!("segment {} evicted before streaming", filename))
            })?;
            (segment, guard, "miss")
        }
    };

    metrics::histogram!(m::REQUEST_DURATION, "result" => result)
        .record(started.elapsed().as_secs_f64());

    tracing::debug!(
        camera_id = camera_id,
        filename = %segment.filename,
        result = result,
        range = range.as_deref().unwrap_or("-"),
        "Serving cached segment"
    );

    streaming::serve_segment(
        &state.cache.file_path(&segment.filename)?,
        &segment.filename,
        guard,
        range.as_deref(),
    )
    .await
}

/// Cache occupancy for the admin surface
async fn cache_size(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.size().await)
}

/// Drop every cached segment
async fn clear_cache(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let removed = state.cache.clear().await?;
    Ok(Json(json!({ "removed_count": removed })))
}
