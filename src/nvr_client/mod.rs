//! NVR Client - HTTP Adapter for the Network Video Recorder
//!
//! ## Responsibilities
//!
//! - Session login per camera (bounded by the auth timeout)
//! - Recording listing scoped by channel path and time window
//! - Segment download streamed to a local file (bounded by the request
//!   timeout)
//!
//! The NVR is treated as an opaque HTTP source of time-indexed video
//! files; nothing here knows about its recording format.

use crate::camera_registry::CameraDescriptor;
use crate::error::{Error, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// One recording entry from the NVR listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct NvrRecording {
    /// Segment filename, unique per NVR
    pub filename: String,
    /// Recording start, unix seconds
    pub start: i64,
    /// Size in bytes when the NVR reports it
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// NVR client instance
pub struct NvrClient {
    client: reqwest::Client,
    base_url: String,
    auth_timeout: Duration,
    request_timeout: Duration,
}

impl NvrClient {
    /// Create a new NVR client
    pub fn new(base_url: String, auth_timeout: Duration, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            auth_timeout,
            request_timeout,
        }
    }

    /// Authenticate against the NVR with the camera's credentials.
    ///
    /// Bounded by the auth timeout independently of the request timeout.
    async fn authenticate(&self, camera: &CameraDescriptor) -> Result<String> {
        let url = format!("{}/api/login", self.base_url);
        let body = LoginRequest {
            login: &camera.login,
            password: &camera.password,
        };

        let send = self.client.post(&url).json(&body).send();
        let resp = tokio::time::timeout(self.auth_timeout, send)
            .await
            .map_err(|_| {
                Error::NvrUnreachable(format!(
                    "NVR auth timed out after {:?}",
                    self.auth_timeout
                ))
            })?
            .map_err(|e| Error::NvrUnreachable(format!("NVR auth request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::NvrUnreachable(format!(
                "NVR auth rejected for camera {}: {}",
                camera.id,
                resp.status()
            )));
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| Error::NvrUnreachable(format!("NVR auth response invalid: {}", e)))?;

        Ok(login.token)
    }

    /// List recordings on a channel overlapping the `[from, to]` window.
    ///
    /// Returns entries sorted by start timestamp; an empty list means the
    /// NVR responded but has no footage for the window.
    pub async fn list_recordings(
        &self,
        camera: &CameraDescriptor,
        from: i64,
        to: i64,
    ) -> Result<Vec<NvrRecording>> {
        let token = self.authenticate(camera).await?;

        let url = format!(
            "{}/api/channels/{}/recordings?from={}&to={}",
            self.base_url,
            urlencoding::encode(&camera.channel_path),
            from,
            to
        );

        let send = self.client.get(&url).bearer_auth(&token).send();
        let resp = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| Error::Timeout(format!("NVR listing timed out after {:?}", self.request_timeout)))?
            .map_err(|e| Error::NvrUnreachable(format!("NVR listing request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::NvrUnreachable(format!(
                "NVR listing returned {} for channel {}",
                resp.status(),
                camera.channel_path
            )));
        }

        let mut recordings: Vec<NvrRecording> = resp
            .json()
            .await
            .map_err(|e| Error::NvrUnreachable(format!("NVR listing response invalid: {}", e)))?;

        recordings.sort_by_key(|r| r.start);

        tracing::debug!(
            camera_id = camera.id,
            channel = %camera.channel_path,
            from = from,
            to = to,
            count = recordings.len(),
            "NVR listing fetched"
        );

        Ok(recordings)
    }

    /// Download one segment to `dest`, streaming chunks to disk.
    ///
    /// Returns the number of bytes written. The whole transfer is bounded
    /// by the request timeout.
    pub async fn download_segment(
        &self,
        camera: &CameraDescriptor,
        filename: &str,
        dest: &Path,
    ) -> Result<u64> {
        let token = self.authenticate(camera).await?;

        let url = format!(
            "{}/api/channels/{}/recordings/{}",
            self.base_url,
            urlencoding::encode(&camera.channel_path),
            urlencoding::encode(filename)
        );

        let transfer = async {
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| Error::DownloadFailed(format!("NVR download request failed: {}", e)))?;

            if !resp.status().is_success() {
                return Err(Error::DownloadFailed(format!(
                    "NVR download returned {} for {}",
                    resp.status(),
                    filename
                )));
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut stream = resp.bytes_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| Error::DownloadFailed(format!("NVR transfer aborted: {}", e)))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;

            Ok(written)
        };

        tokio::time::timeout(self.request_timeout, transfer)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "NVR download of {} timed out after {:?}",
                    filename, self.request_timeout
                ))
            })?
    }

    /// Check NVR reachability (no auth required)
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api", self.base_url);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.status().is_success())
    }
}

#[async_trait::async_trait]
impl crate::download_coordinator::SegmentFetcher for NvrClient {
    async fn fetch_segment(
        &self,
        camera: &CameraDescriptor,
        filename: &str,
        dest: &Path,
    ) -> Result<u64> {
        self.download_segment(camera, filename, dest).await
    }
}
