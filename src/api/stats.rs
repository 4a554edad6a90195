//! Aggregated request-stats surface under `/internal/stats/*`.
//!
//! Thin JSON views over [`crate::telemetry::StatsStore`]; `/internal/metrics`
//! (see [`crate::api::metrics`]) exposes the same underlying data in
//! Prometheus text exposition format instead.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::router::RouterState;

pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/internal/stats/models", get(models))
        .route("/internal/stats/translators", get(translators))
        .with_state(state)
}

/// `GET /internal/stats/models` — per-model request/error/byte counters
/// over the current telemetry window.
pub async fn models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({ "models": state.stats.model_stats().await }))
}

/// `GET /internal/stats/translators` — the most recent translator
/// invocations (passthrough and translated alike).
pub async fn translators(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let events = state.stats.recent_translator_events(100).await;
    Json(json!({ "translators": events }))
}
