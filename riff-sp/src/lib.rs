//! riff-sp library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::http::HeaderValue;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::services::{CacheError, CacheStore, JobOrchestrator, ProgressHub, StemSeparator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job registry and dispatch
    pub orchestrator: JobOrchestrator,
    /// Live progress subscribers
    pub hub: ProgressHub,
    /// Content-addressed stem cache
    pub cache: CacheStore,
    pub config: Arc<ServiceConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Open the cache and wire the orchestrator to `separator`
    pub fn new(config: ServiceConfig, separator: Arc<dyn StemSeparator>) -> Result<Self, CacheError> {
        let cache = CacheStore::open(&config.cache_dir, config.max_cache_bytes)?;
        let hub = ProgressHub::new(config.hub);
        let orchestrator = JobOrchestrator::new(
            cache.clone(),
            hub.clone(),
            separator,
            config.upload_dir.clone(),
        );

        Ok(Self {
            orchestrator,
            hub,
            cache,
            config: Arc::new(config),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .merge(api::process_routes())
        .merge(api::cache_routes())
        .merge(api::health_routes())
        .route("/ws/:client_id", get(api::progress_socket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
