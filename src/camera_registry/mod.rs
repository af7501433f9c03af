//! Camera Registry - Static Camera Table with Availability Hints
//!
//! ## Responsibilities
//!
//! - Camera id -> NVR channel path / credentials lookup (no I/O at runtime)
//! - Availability hints updated by failed resolver/download attempts
//! - Only transitions are logged to avoid spamming the event log
//!
//! A camera marked unavailable is still retried on the next request; the
//! hint is informational, not a gate.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// One camera entry from the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera id used by the web tier
    pub id: i64,
    /// NVR channel path for this camera
    pub channel_path: String,
    /// NVR login
    pub login: String,
    /// NVR password
    pub password: String,
}

/// Camera configuration file shape (`[[cameras]]` in TOML)
#[derive(Debug, Deserialize)]
struct CameraFile {
    cameras: Vec<CameraConfig>,
}

/// Runtime camera descriptor
#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    pub id: i64,
    pub channel_path: String,
    pub login: String,
    pub password: String,
    pub last_known_available: bool,
    pub last_error: Option<String>,
}

/// Camera view exposed to the web tier (credentials withheld)
#[derive(Debug, Clone, Serialize)]
pub struct CameraSummary {
    pub id: i64,
    pub channel_path: String,
    pub last_known_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&CameraDescriptor> for CameraSummary {
    fn from(d: &CameraDescriptor) -> Self {
        Self {
            id: d.id,
            channel_path: d.channel_path.clone(),
            last_known_available: d.last_known_available,
            last_error: d.last_error.clone(),
        }
    }
}

/// Camera registry instance
pub struct CameraRegistry {
    /// camera_id -> descriptor; identity is immutable, availability is not
    cameras: RwLock<HashMap<i64, CameraDescriptor>>,
}

impl CameraRegistry {
    /// Build a registry from parsed camera configs
    pub fn new(configs: Vec<CameraConfig>) -> Self {
        let cameras = configs
            .into_iter()
            .map(|c| {
                (
                    c.id,
                    CameraDescriptor {
                        id: c.id,
                        channel_path: c.channel_path,
                        login: c.login,
                        password: c.password,
                        last_known_available: true,
                        last_error: None,
                    },
                )
            })
            .collect();

        Self {
            cameras: RwLock::new(cameras),
        }
    }

    /// Load the registry from a TOML camera file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read camera file {}: {}", path.display(), e))
        })?;

        let file: CameraFile = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid camera file: {}", e)))?;

        if file.cameras.is_empty() {
            tracing::warn!(path = %path.display(), "Camera file contains no cameras");
        }

        tracing::info!(
            path = %path.display(),
            cameras = file.cameras.len(),
            "Camera registry loaded"
        );

        Ok(Self::new(file.cameras))
    }

    /// Look up a camera descriptor
    pub async fn describe(&self, camera_id: i64) -> Option<CameraDescriptor> {
        self.cameras.read().await.get(&camera_id).cloned()
    }

    /// Mark a camera unavailable after a failed NVR interaction
    pub async fn mark_unavailable(&self, camera_id: i64, error: &str) {
        let mut cameras = self.cameras.write().await;
        if let Some(camera) = cameras.get_mut(&camera_id) {
            if camera.last_known_available {
                tracing::warn!(
                    camera_id = camera_id,
                    error = %error,
                    "Camera marked unavailable"
                );
            }
            camera.last_known_available = false;
            camera.last_error = Some(error.to_string());
        }
    }

    /// Mark a camera available again after a successful NVR interaction
    pub async fn mark_available(&self, camera_id: i64) {
        let mut cameras = self.cameras.write().await;
        if let Some(camera) = cameras.get_mut(&camera_id) {
            if !camera.last_known_available {
                tracing::info!(camera_id = camera_id, "Camera recovered");
            }
            camera.last_known_available = true;
            camera.last_error = None;
        }
    }

    /// All cameras, for the web tier listing
    pub async fn list(&self) -> Vec<CameraSummary> {
        let cameras = self.cameras.read().await;
        let mut list: Vec<CameraSummary> = cameras.values().map(CameraSummary::from).collect();
        list.sort_by_key(|c| c.id);
        list
    }
}
