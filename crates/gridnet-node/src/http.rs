//! Read-only HTTP status surface.
//!
//! These handlers read core accessors and serialize JSON; no business logic
//! lives here.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::coordinator::GlobalCoordinator;
use crate::engine::TaskEngine;
use crate::metrics::MetricsRecorder;
use crate::registry::PeerRegistry;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub engine: Arc<TaskEngine>,
    pub coordinator: Arc<GlobalCoordinator>,
    pub metrics: Arc<MetricsRecorder>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/network/status", get(network_status))
        .route("/api/network/regions", get(regions))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let healthy = state.metrics.is_healthy();
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn network_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "metrics": state.metrics.snapshot(),
        "peers": state.registry.peer_count(),
        "online_peers": state.registry.online_count(),
        "active_tasks": state.engine.active_tasks().len(),
        "global_validators": state.coordinator.tracked_health(),
        "failovers": state.coordinator.failover_log().len(),
    }))
}

#[derive(Debug, Deserialize)]
struct RegionQuery {
    #[serde(rename = "regionId")]
    region_id: Option<String>,
}

async fn regions(
    State(state): State<AppState>,
    Query(query): Query<RegionQuery>,
) -> Result<Json<Value>, StatusCode> {
    match query.region_id {
        Some(region_id) => match state.registry.region(&region_id) {
            Some(region) => Ok(Json(json!({ "region": region }))),
            None => Err(StatusCode::NOT_FOUND),
        },
        None => Ok(Json(json!({ "regions": state.registry.all_regions() }))),
    }
}
