//! HTTP surface: route handlers and middleware layered over [`crate::router`].
//!
//! Mirrors the teacher's `api/` split between a client-facing router and an
//! admin-facing one, generalized to the three surfaces this proxy exposes:
//! the client proxy (`client`, `provider`), operator introspection (`admin`,
//! `stats`, `metrics`, `health`), and the middleware chain shared by both
//! (`auth`, `rate_limit`, `request_id`).

pub mod admin;
pub mod auth;
pub mod client;
pub mod health;
pub mod metrics;
pub mod provider;
pub mod rate_limit;
pub mod request_id;
pub mod stats;

use axum::http::{header, HeaderMap};

/// Parse `Content-Length` off an inbound request, the same extraction every
/// proxy entrypoint needs before handing the body to [`crate::router::handle_request`].
pub(crate) fn content_length_of(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
