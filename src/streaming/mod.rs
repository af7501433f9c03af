//! Streaming - Range-Aware Segment Serving
//!
//! ## Responsibilities
//!
//! - `Range: bytes=...` parsing (closed, open-ended, and suffix forms)
//! - Chunked file bodies via `ReaderStream` so memory stays bounded
//! - Keeping the cache entry pinned for exactly as long as the body
//!   lives; a client disconnect drops the body and releases the pin
//!
//! Failure mapping to client-visible statuses happens in `web_api`; this
//! module only builds successful 200/206/416 responses.

use crate::cache_store::StreamGuard;
use crate::error::{Error, Result};
use crate::metrics as m;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

const CHUNK_SIZE: usize = 64 * 1024;

/// Parsed `Range` header value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-`
    From(u64),
    /// `bytes=START-END`, inclusive
    FromTo(u64, u64),
    /// `bytes=-N`: the last N bytes
    Suffix(u64),
}

/// Parse a `Range: bytes=START-END` header value
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.strip_prefix("bytes=")?;
    let mut parts = spec.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    match (start_str.is_empty(), end_str.is_empty()) {
        (true, false) => Some(ByteRange::Suffix(end_str.parse().ok()?)),
        (false, true) => Some(ByteRange::From(start_str.parse().ok()?)),
        (false, false) => {
            let start = start_str.parse().ok()?;
            let end = end_str.parse().ok()?;
            if start > end {
                return None;
            }
            Some(ByteRange::FromTo(start, end))
        }
        (true, true) => None,
    }
}

/// Resolve a parsed range against the actual file size.
///
/// Returns the inclusive `(start, end)` byte positions, or `None` when
/// the range cannot be satisfied.
pub fn resolve_range(range: ByteRange, file_size: u64) -> Option<(u64, u64)> {
    if file_size == 0 {
        return None;
    }
    let last = file_size - 1;
    match range {
        ByteRange::From(start) if start <= last => Some((start, last)),
        ByteRange::FromTo(start, end) if start <= last => Some((start, end.min(last))),
        ByteRange::Suffix(n) if n > 0 => Some((file_size.saturating_sub(n), last)),
        _ => None,
    }
}

/// Guess the MIME type from the segment filename extension
pub fn guess_content_type(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or("") {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// File body that holds the cache pin until the client is done (or gone)
struct GuardedStream {
    inner: ReaderStream<tokio::io::Take<tokio::fs::File>>,
    completed: bool,
    _guard: StreamGuard,
}

impl Stream for GuardedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.completed = true;
        }
        poll
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        // Dropped before the last chunk: the client went away mid-stream.
        if !self.completed {
            metrics::counter!(m::DOWNLOAD_ERRORS, "category" => Error::ClientAborted.category())
                .increment(1);
            tracing::debug!("Stream body dropped before completion");
        }
    }
}

/// Serve a cached segment file, honoring an optional `Range` header.
///
/// `guard` is the pin acquired from the cache store; it is released when
/// the returned body is dropped.
pub async fn serve_segment(
    file_path: &Path,
    filename: &str,
    guard: StreamGuard,
    range_header: Option<&str>,
) -> Result<Response> {
    let metadata = tokio::fs::metadata(file_path).await.map_err(|e| {
        Error::Internal(format!("cached file missing for {}: {}", filename, e))
    })?;
    let file_size = metadata.len();
    let content_type = guess_content_type(filename);

    let range = range_header.and_then(parse_range_header);

    if let Some(range) = range {
        let Some((start, end)) = resolve_range(range, file_size) else {
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(
                    header::CONTENT_RANGE.as_str(),
                    format!("bytes */{file_size}"),
                )],
                Body::empty(),
            )
                .into_response());
        };

        let length = end - start + 1;
        let mut file = tokio::fs::File::open(file_path).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let stream = GuardedStream {
            inner: ReaderStream::with_capacity(file.take(length), CHUNK_SIZE),
            completed: false,
            _guard: guard,
        };

        Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                (
                    header::CONTENT_RANGE.as_str(),
                    format!("bytes {start}-{end}/{file_size}"),
                ),
                (header::CONTENT_LENGTH.as_str(), length.to_string()),
                (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
            ],
            Body::from_stream(stream),
        )
            .into_response())
    } else {
        let file = tokio::fs::File::open(file_path).await?;
        let stream = GuardedStream {
            inner: ReaderStream::with_capacity(file.take(file_size), CHUNK_SIZE),
            completed: false,
            _guard: guard,
        };

        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                (header::CONTENT_LENGTH.as_str(), file_size.to_string()),
                (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
            ],
            Body::from_stream(stream),
        )
            .into_response())
    }
}
