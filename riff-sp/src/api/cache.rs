//! Cache administration
//!
//! GET /api/cache/stats, DELETE /api/cache, DELETE /api/cache/{fingerprint},
//! POST /api/cache/prune

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::Fingerprint;
use crate::services::CacheStats;
use crate::{ApiError, ApiResult, AppState};

/// DELETE/prune response
#[derive(Debug, Serialize, Deserialize)]
pub struct RemovedResponse {
    pub removed: usize,
}

/// POST /api/cache/prune request body (optional)
#[derive(Debug, Default, Deserialize)]
pub struct PruneRequest {
    pub max_age_days: Option<u64>,
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> ApiResult<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await?))
}

/// DELETE /api/cache
pub async fn clear_cache(State(state): State<AppState>) -> ApiResult<Json<RemovedResponse>> {
    let removed = state.cache.clear().await?;
    Ok(Json(RemovedResponse { removed }))
}

/// DELETE /api/cache/{fingerprint}
pub async fn remove_entry(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<RemovedResponse>> {
    let fingerprint: Fingerprint = fingerprint.parse()?;
    if !state.cache.remove(&fingerprint).await? {
        return Err(ApiError::NotFound(format!("No cache entry {}", fingerprint)));
    }
    Ok(Json(RemovedResponse { removed: 1 }))
}

/// POST /api/cache/prune
///
/// Without a body, prunes at the configured horizon.
pub async fn prune_cache(
    State(state): State<AppState>,
    body: Option<Json<PruneRequest>>,
) -> ApiResult<Json<RemovedResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let max_age = match request.max_age_days {
        Some(days) => Duration::from_secs(days.saturating_mul(24 * 60 * 60)),
        None => state.config.cache_max_age,
    };

    let removed = state.cache.prune_older_than(max_age).await?;
    Ok(Json(RemovedResponse { removed }))
}

/// Build cache administration routes
pub fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", delete(clear_cache))
        .route("/api/cache/:fingerprint", delete(remove_entry))
        .route("/api/cache/prune", post(prune_cache))
}
