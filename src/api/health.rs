//! Liveness probe endpoint, always exempt from auth and rate limiting.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /internal/health` — always returns 200 OK with `{"status": "ok"}`.
///
/// Has no dependencies and never blocks, making it safe to use as a
/// Docker / Kubernetes liveness probe. [`crate::api::auth::auth_middleware`]
/// and [`crate::api::rate_limit::rate_limit_middleware`] both special-case
/// this path so it is reachable even when the rest of `/internal/*` is
/// locked down or throttled.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
