//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: String,
    /// Service name ("riff-sp")
    pub service: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git revision the binary was built from ("unknown" outside a checkout)
    pub revision: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Jobs currently tracked by the orchestrator
    pub active_jobs: usize,
    /// Connected progress subscribers
    pub subscribers: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "riff-sp".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        revision: env!("RIFF_GIT_REV").to_string(),
        uptime_seconds,
        active_jobs: state.orchestrator.active_jobs().await,
        subscribers: state.hub.subscriber_count().await,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
