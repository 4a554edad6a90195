//! Provider-scoped proxy surface (§4.7).
//!
//! `/olla/{provider}/...` pre-binds `RequestProfile.supported_by` to the
//! provider's dialect set before the regular pipeline runs, instead of
//! letting the inspector chain infer it from the path/body. `openai` is a
//! superset accepting any OpenAI-compatible backend; the rest are exact
//! matches.

use std::collections::HashSet;
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
use crate::model::{normalize, Dialect};
use crate::router::{self, RouterState};

/// Build the `/olla/{provider}/*`, `/olla/{provider}/models` router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/olla/{provider}/models", get(provider_models))
        .route("/olla/{provider}/{*path}", any(dispatch))
        .with_state(state)
}

/// Split `/olla/{provider}/{rest...}` into `(provider, suffix)`.
///
/// Per the documented trailing-slash decision: when no suffix follows the
/// provider token, the suffix is `"/"`, not `""` — matching the observed
/// behaviour this proxy's upstream inspiration preserves.
pub fn extract_provider_from_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("/olla/")?;
    let mut parts = rest.splitn(2, '/');
    let provider = parts.next()?;
    if provider.is_empty() {
        return None;
    }
    let suffix = match parts.next() {
        Some(s) if !s.is_empty() => format!("/{s}"),
        _ => "/".to_string(),
    };
    Some((normalize(provider), suffix))
}

/// The dialect set a provider token pre-scopes the request to.
fn provider_dialects(normalized: &str) -> Option<HashSet<Dialect>> {
    match normalized {
        "ollama" => Some([Dialect::Ollama].into_iter().collect()),
        "lm-studio" => Some([Dialect::LmStudio].into_iter().collect()),
        "vllm" => Some([Dialect::VLlm].into_iter().collect()),
        "llamacpp" => Some([Dialect::LlamaCpp].into_iter().collect()),
        "anthropic" => Some([Dialect::Anthropic].into_iter().collect()),
        "openai" => Some(Dialect::openai_superset()),
        _ => None,
    }
}

async fn dispatch(
    State(state): State<Arc<RouterState>>,
    method: Method,
    Path((provider, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, OllaError> {
    let normalized = normalize(&provider);
    let dialects =
        provider_dialects(&normalized).ok_or_else(|| OllaError::BadProviderPath(provider.clone()))?;
    let target_path = format!("/{path}");
    let content_length = content_length_of(&headers);
    router::handle_request(&state, method, target_path, content_length, body, Some(dialects)).await
}

#[derive(Deserialize)]
struct ModelsQuery {
    #[serde(default)]
    include_unavailable: bool,
}

/// `GET /olla/{provider}/models` — model listing narrowed to endpoints
/// matching the provider's dialect set.
async fn provider_models(
    State(state): State<Arc<RouterState>>,
    Path(provider): Path<String>,
    Query(q): Query<ModelsQuery>,
) -> Result<impl IntoResponse, OllaError> {
    let normalized = normalize(&provider);
    let dialects =
        provider_dialects(&normalized).ok_or_else(|| OllaError::BadProviderPath(provider.clone()))?;

    let mut endpoints = state.catalog.snapshot();
    if !q.include_unavailable {
        endpoints.retain(|e| e.is_healthy());
    }
    endpoints.retain(|e| dialects.contains(&e.endpoint_type.as_dialect()));

    let models = state.registry.unified_models(&endpoints);
    Ok(Json(json!({ "object": "list", "data": models })))
}
