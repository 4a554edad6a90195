//! Primary client-facing proxy surface.
//!
//! This is intentionally a thin layer: all routing logic lives in
//! [`crate::router::handle_request`]. Handlers translate HTTP concerns
//! (path extraction, content-length) into one call and back.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::content_length_of;
use crate::error::OllaError;
use crate::router::{self, RouterState};

/// Build the `/olla/proxy/*`, `/olla/models` router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/olla/proxy/{*path}", any(proxy))
        .route("/olla/models", get(list_models))
        .with_state(state)
}

/// `ANY /olla/proxy/{*path}` — forward to whichever backend the inspector
/// chain and filter select; client dialect inferred from path and body.
async fn proxy(
    State(state): State<Arc<RouterState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, OllaError> {
    let target_path = format!("/{path}");
    let content_length = content_length_of(&headers);
    router::handle_request(&state, method, target_path, content_length, body, None).await
}

#[derive(Deserialize)]
struct ModelsQuery {
    #[serde(default)]
    include_unavailable: bool,
}

/// `GET /olla/models` — unified model listing across the whole fleet.
async fn list_models(State(state): State<Arc<RouterState>>, Query(q): Query<ModelsQuery>) -> impl IntoResponse {
    let mut endpoints = state.catalog.snapshot();
    if !q.include_unavailable {
        endpoints.retain(|e| e.is_healthy());
    }
    let models = state.registry.unified_models(&endpoints);
    Json(json!({ "object": "list", "data": models }))
}
