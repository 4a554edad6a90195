//! Operator-facing introspection endpoints under `/internal/status/*`.
//!
//! Mounted behind [`crate::api::auth::auth_middleware`] like the rest of
//! `/internal/*`; nothing here is meant to be reachable without the admin
//! token once one is configured.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::router::RouterState;

pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/internal/status/endpoints", get(status_endpoints))
        .route("/internal/status/config", get(status_config))
        .with_state(state)
}

/// `GET /internal/status/endpoints` — endpoint inventory sorted by priority
/// descending, healthy endpoints before unhealthy ones on a priority tie.
pub async fn status_endpoints(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let mut endpoints = state.catalog.snapshot();
    endpoints.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.is_healthy().cmp(&a.is_healthy())));

    let rows: Vec<_> = endpoints
        .iter()
        .map(|e| {
            json!({
                "name": e.name,
                "url": e.url,
                "type": e.endpoint_type,
                "priority": e.priority,
                "health": e.health,
                "consecutive_failures": e.consecutive_failures,
            })
        })
        .collect();

    Json(json!({ "endpoints": rows }))
}

/// `GET /internal/status/config` — current config with secrets redacted to
/// `"set"`/`"unset"` rather than shown or omitted.
pub async fn status_config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();

    let endpoints: Vec<_> = config
        .endpoints
        .iter()
        .map(|e| {
            let api_key_state = match &e.api_key_env {
                None => "unset",
                Some(var) => {
                    if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                        "set"
                    } else {
                        "unset"
                    }
                }
            };
            json!({
                "name": e.name,
                "url": e.url,
                "type": e.endpoint_type,
                "priority": e.priority,
                "api_key": api_key_state,
                "timeout_ms": e.timeout_ms,
                "check_interval_secs": e.check_interval_secs,
            })
        })
        .collect();

    let admin_token_state = match &config.server.admin_token_env {
        None => "unset",
        Some(var) => {
            if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                "set"
            } else {
                "unset"
            }
        }
    };

    Json(json!({
        "server": {
            "listen_addr": config.server.listen_addr,
            "read_timeout_ms": config.server.read_timeout_ms,
            "write_timeout_ms": config.server.write_timeout_ms,
            "idle_timeout_ms": config.server.idle_timeout_ms,
            "request_body_peek_bytes": config.server.request_body_peek_bytes,
            "traffic_log_capacity": config.server.traffic_log_capacity,
            "admin_token": admin_token_state,
            "rate_limits": {
                "rpm": config.server.rate_limits.rpm,
                "trust_proxy_headers": config.server.rate_limits.trust_proxy_headers,
                "trusted_proxy_cidrs": config.server.rate_limits.trusted_proxy_cidrs,
            },
        },
        "endpoints": endpoints,
        "aliases": config.aliases,
    }))
}
