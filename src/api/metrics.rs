//! Prometheus-compatible `/internal/metrics` endpoint.
//!
//! Rendering itself lives in [`crate::telemetry::StatsStore::render_prometheus`]
//! since it shares the same locked pass over the ring buffer that
//! `/internal/stats/*` uses for its JSON views; this handler just sets the
//! content type.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::router::RouterState;

pub fn router(state: Arc<RouterState>) -> Router {
    Router::new().route("/internal/metrics", get(metrics)).with_state(state)
}

/// `GET /internal/metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let body = state.stats.render_prometheus().await;
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body)
}
