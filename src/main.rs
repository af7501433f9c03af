//! Footage Cache Engine
//!
//! Main entry point for the footage cache service.

use cctv_cache::{
    cache_store::CacheStore,
    camera_registry::CameraRegistry,
    download_coordinator::DownloadCoordinator,
    metrics as app_metrics,
    nvr_client::NvrClient,
    segment_resolver::SegmentResolver,
    state::{AppConfig, AppState},
    web_api,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cctv_cache=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting footage cache engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        nvr_url = %config.nvr_url,
        cameras_file = %config.cameras_file.display(),
        cache_dir = %config.cache_dir.display(),
        max_cache_size_bytes = config.max_cache_size_bytes,
        cleanup_threshold_bytes = config.cleanup_threshold_bytes,
        "Configuration loaded"
    );

    // Install the Prometheus recorder before any metric is touched
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    app_metrics::describe();

    // Initialize components
    let registry = Arc::new(CameraRegistry::load(&config.cameras_file).await?);
    let nvr = Arc::new(NvrClient::new(
        config.nvr_url.clone(),
        config.auth_timeout,
        config.request_timeout,
    ));
    let cache = Arc::new(
        CacheStore::new(
            config.cache_dir.clone(),
            config.max_cache_size_bytes,
            config.cleanup_threshold_bytes,
        )
        .await?,
    );
    let resolver = Arc::new(SegmentResolver::new(
        registry.clone(),
        nvr.clone(),
        config.resolve_window_min,
    ));
    let coordinator = Arc::new(DownloadCoordinator::new(
        registry.clone(),
        cache.clone(),
        nvr.clone(),
        config.max_concurrent_downloads,
    ));

    let state = AppState {
        config: config.clone(),
        registry,
        nvr,
        resolver,
        coordinator,
        cache: cache.clone(),
        metrics_handle,
    };

    // Timer-driven eviction sweeps
    {
        let cache = cache.clone();
        let interval = config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        });
    }

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
