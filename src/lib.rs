//! Footage Cache - CCTV Footage Resolution & Video Cache Engine
//!
//! Resolves NVR recordings around inventory event timestamps, caches the
//! segments on a bounded disk budget, and serves them over HTTP with
//! Range support.

pub mod cache_store;
pub mod camera_registry;
pub mod download_coordinator;
pub mod error;
pub mod metrics;
pub mod nvr_client;
pub mod response_builder;
pub mod segment_resolver;
pub mod state;
pub mod streaming;
pub mod web_api;

pub use error::{Error, Result};
