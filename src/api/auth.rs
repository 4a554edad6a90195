//! Bearer-token authentication middleware for `/internal/*`.
//!
//! Client-facing `/olla/*` routes are never gated here — only
//! `/internal/*` requires `Authorization: Bearer <token>` when
//! `server.admin_token_env` resolves to a non-empty value, and even then
//! `/internal/health` is always exempt (liveness probes must not require
//! credentials). When `admin_token_env` is absent the middleware is a
//! no-op.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::router::RouterState;

const HEALTH_PATH: &str = "/internal/health";

/// Axum middleware: requires a valid `Authorization: Bearer <token>` header
/// on every `/internal/*` route except [`HEALTH_PATH`] when
/// `state.admin_token` is set. Client-facing routes (anything outside
/// `/internal/*`) are always passed through unauthenticated.
pub async fn auth_middleware(State(state): State<Arc<RouterState>>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if !path.starts_with("/internal/") || path == HEALTH_PATH {
        return next.run(req).await;
    }

    let Some(expected) = &state.admin_token else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected.as_str() => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"olla internal\"")],
            "Invalid admin token.",
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"olla internal\"")],
            "/internal/* requires Authorization: Bearer <token>.",
        )
            .into_response(),
    }
}
