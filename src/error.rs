//! Typed error taxonomy for the request pipeline.
//!
//! Generalized from the teacher's `AppError` (an `anyhow`-wrapping type that
//! always responds 500) into a `thiserror`-derived enum, because the core
//! must map specific failure kinds to specific status codes — a filter
//! rejection is a 404, a translator failure is a 500, a fully-failed
//! dispatch is a 502 — not a single catch-all.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OllaError {
    /// Inspector chain threw. Non-fatal: callers log and continue with an
    /// empty profile rather than constructing this for the client.
    #[error("inspection failed: {0}")]
    InspectFailed(String),

    #[error("no healthy endpoints configured")]
    NoHealthyEndpoints,

    #[error("no compatible endpoints for this request")]
    NoCompatibleEndpoints,

    #[error("model rejected: {reason}")]
    ModelRejected { reason: String, status: StatusCode },

    #[error("translation failed: {0}")]
    TranslatorFailed(String),

    #[error("malformed provider path: {0}")]
    BadProviderPath(String),

    #[error("security chain rejected the request: {0}")]
    SecurityRejected(String),

    #[error("all backend attempts failed")]
    AllBackendsFailed,

    #[error("client canceled the request")]
    ClientCanceled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OllaError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InspectFailed(_) => StatusCode::BAD_REQUEST,
            Self::NoHealthyEndpoints => StatusCode::BAD_GATEWAY,
            Self::NoCompatibleEndpoints => StatusCode::NOT_FOUND,
            Self::ModelRejected { status, .. } => *status,
            Self::TranslatorFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadProviderPath(_) => StatusCode::BAD_REQUEST,
            Self::SecurityRejected(_) => StatusCode::FORBIDDEN,
            Self::AllBackendsFailed => StatusCode::BAD_GATEWAY,
            Self::ClientCanceled => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OllaError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            OllaError::InspectFailed("bad json".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(OllaError::NoHealthyEndpoints.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            OllaError::NoCompatibleEndpoints.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            OllaError::ModelRejected {
                reason: "blocked".into(),
                status: StatusCode::CONFLICT
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(OllaError::AllBackendsFailed.status(), StatusCode::BAD_GATEWAY);
    }
}
