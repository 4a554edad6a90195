//! Request orchestration: wires the inspector chain, filter, alias
//! resolver, router decision, dispatcher, and telemetry emitter into one
//! pipeline per inbound request.
//!
//! Grounded on the teacher's `router::route`/`RouterState` shape — atomic
//! config swap via `Arc<RwLock<Arc<Config>>>`, a `started_at` uptime clock,
//! an optional rate limiter and admin token built once at startup — with
//! the tier-ladder body gone in favour of the multi-stage pipeline the
//! fleet needs. The "rewrite `model` in the outbound body before
//! forwarding" step is lifted straight from the teacher's `dispatch()`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::alias;
use crate::api::rate_limit::RateLimiter;
use crate::backends::{HttpClient, SseStream};
use crate::config::Config;
use crate::dispatch::{DispatchBody, Dispatcher};
use crate::endpoint::EndpointCatalog;
use crate::error::OllaError;
use crate::filter;
use crate::inspect;
use crate::model::{Dialect, Endpoint, RoutingAction};
use crate::registry::{InMemoryRegistry, ModelRegistry};
use crate::route;
use crate::telemetry::{RequestStats, StatsStore, TranslatorRequestEvent};
use crate::translate::{AnthropicTranslator, Translator};

/// Requests larger than this are rejected rather than buffered. None of the
/// supported backends accept a chunked upload for chat/completions-shaped
/// endpoints, so forwarding is always buffer-then-send; this cap exists to
/// bound memory, not to enable streaming uploads.
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state injected into every request handler.
pub struct RouterState {
    config_lock: Arc<RwLock<Arc<Config>>>,
    pub config_path: PathBuf,
    pub catalog: EndpointCatalog,
    pub registry: Arc<dyn ModelRegistry>,
    pub stats: Arc<StatsStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: Instant,
    /// `None` disables rate limiting. Built once at startup from
    /// `config.server.rate_limits.rpm`; a hot-reload does not change it.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// `None` disables admin authentication on `/internal/*`.
    pub admin_token: Option<String>,
}

impl RouterState {
    pub fn new(config: Arc<Config>, config_path: PathBuf) -> Self {
        let catalog = EndpointCatalog::new(config.build_endpoints());
        let registry: Arc<dyn ModelRegistry> = InMemoryRegistry::new_shared();
        let stats = Arc::new(StatsStore::new(config.server.traffic_log_capacity));
        let rate_limiter = config.server.rate_limits.rpm.filter(|&rpm| rpm > 0).map(|rpm| {
            Arc::new(RateLimiter::new(
                rpm,
                config.server.rate_limits.trust_proxy_headers,
                config.server.rate_limits.trusted_proxy_cidrs.clone(),
            ))
        });
        let admin_token = config
            .server
            .admin_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        Self {
            config_lock: Arc::new(RwLock::new(config)),
            config_path,
            catalog,
            registry,
            stats,
            dispatcher: Arc::new(Dispatcher::new()),
            started_at: Instant::now(),
            rate_limiter,
            admin_token,
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    /// Handle shared with background tasks that need to observe config
    /// hot-reloads (e.g. `registry::refresh_loop`).
    pub fn config_handle(&self) -> Arc<RwLock<Arc<Config>>> {
        Arc::clone(&self.config_lock)
    }

    /// Atomically replace the live config and rebuild the endpoint catalog
    /// from it. Called only from the hot-reload background task.
    pub fn replace_config(&self, new: Arc<Config>) {
        self.catalog.replace(new.build_endpoints());
        *self.config_lock.write().expect("config lock poisoned") = new;
    }
}

/// Run the full pipeline for one inbound request and produce the response
/// to send back to the client.
///
/// `provider_constraint` is `Some` only for requests entering through
/// `/olla/{provider}/...` (§4.7): it overrides path-based dialect
/// classification with the provider's pre-scoped dialect set.
pub async fn handle_request(
    state: &RouterState,
    method: Method,
    target_path: String,
    content_length: Option<u64>,
    body: Body,
    provider_constraint: Option<HashSet<Dialect>>,
) -> Result<Response, OllaError> {
    let config = state.config();
    let method_is_body_bearing = matches!(method, Method::POST | Method::PUT | Method::PATCH);
    let pipeline_start = Instant::now();

    let (mut profile, body) = inspect::run_inspectors(
        method_is_body_bearing,
        &target_path,
        content_length,
        body,
        config.server.request_body_peek_bytes,
    )
    .await;

    if let Some(constraint) = provider_constraint {
        profile.supported_by = constraint;
    }

    let body_bytes: Option<Bytes> = if method_is_body_bearing {
        Some(
            axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
                .await
                .map_err(|e| OllaError::InspectFailed(e.to_string()))?,
        )
    } else {
        None
    };

    let endpoints = state.catalog.snapshot();
    let filter_outcome = filter::filter_endpoints(&endpoints, &profile, state.registry.as_ref());
    if let Some(decision) = &filter_outcome.decision {
        profile.set_decision(decision.clone());
        if decision.action == RoutingAction::Rejected {
            let status = decision.status.unwrap_or(404);
            return Err(OllaError::ModelRejected {
                reason: decision.reason.clone(),
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::NOT_FOUND),
            });
        }
    }
    if filter_outcome.endpoints.is_empty() {
        return Err(OllaError::NoCompatibleEndpoints);
    }

    let mut candidates: Vec<Endpoint> =
        filter_outcome.endpoints.iter().filter(|e| e.is_healthy()).cloned().collect();
    if candidates.is_empty() {
        return Err(OllaError::NoHealthyEndpoints);
    }

    let mut outbound_body = body_bytes;
    if let Some(model) = profile.model.clone() {
        let alias_map = alias::resolve_alias(&model, &candidates, &config.aliases, state.registry.as_ref());
        if alias::apply_alias(&profile, &alias_map) {
            let mapped: Vec<Endpoint> =
                candidates.iter().filter(|e| alias_map.contains_key(&e.url)).cloned().collect();
            if let Some(first) = mapped.first() {
                if let Some(native_name) = alias_map.get(&first.url) {
                    if let Some(bytes) = &outbound_body {
                        outbound_body = rewrite_model_field(bytes, native_name).or(outbound_body);
                    }
                }
                candidates = mapped;
            }
        }
    }

    let translator: Option<Arc<dyn Translator>> = if is_anthropic_path(&target_path) {
        Some(Arc::new(AnthropicTranslator))
    } else {
        None
    };

    let route_outcome = route::decide(&candidates, &profile, outbound_body, translator.clone());

    let mut clients = HashMap::new();
    for endpoint in &route_outcome.candidates {
        let api_key = config.api_key_for(&endpoint.name);
        let timeout_ms = config.endpoint_config(&endpoint.name).map(|e| e.timeout_ms).unwrap_or(30_000);
        match HttpClient::new(&endpoint.url, Duration::from_millis(timeout_ms), api_key) {
            Ok(client) => {
                clients.insert(endpoint.name.clone(), client);
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.name, error = %e, "failed to build dispatch client");
            }
        }
    }

    let dialect = if translator.is_some() { Dialect::Anthropic } else { Dialect::OpenAI };
    let dispatch_start = Instant::now();
    let mut outcome = state
        .dispatcher
        .dispatch(&route_outcome.candidates, &route_outcome.request, method, dialect, &clients, translator.as_ref())
        .await?;
    outcome.timings.path_resolution_ms = pipeline_start.elapsed().as_millis() as u64;

    let mode = profile.get_meta("mode").unwrap_or_else(|| "passthrough".to_string());

    let mut builder = Response::builder().status(outcome.status);
    builder = set_header(builder, "x-olla-endpoint", &outcome.endpoint_name);
    builder = set_header(builder, "x-olla-backend-type", &outcome.endpoint_type.to_string());
    // Translation is an internal implementation detail of serving the
    // client's native dialect; only passthrough/alias-rewrite are reported.
    if mode != "translate" {
        builder = set_header(builder, "x-olla-mode", &mode);
    }
    if let Some(model) = &profile.model {
        builder = set_header(builder, "x-olla-model", model);
    }
    if let Some(content_type) = outcome.headers.get(axum::http::header::CONTENT_TYPE) {
        builder = builder.header(axum::http::header::CONTENT_TYPE, content_type);
    }

    let mut stats_entry = RequestStats::new(outcome.endpoint_name.clone());
    stats_entry.model = profile.model.clone();
    stats_entry.timings = outcome.timings.clone();
    stats_entry.success = outcome.status.is_success();

    let response = match outcome.body {
        DispatchBody::Buffered(bytes) => {
            stats_entry.total_bytes = bytes.len() as u64;
            state.stats.record_request(stats_entry);
            builder.body(Body::from(bytes)).map_err(|e| OllaError::Internal(e.into()))?
        }
        DispatchBody::Streaming(stream) => {
            let instrumented = instrument_stream(stream, Arc::clone(&state.stats), stats_entry, Instant::now());
            builder.body(Body::from_stream(instrumented)).map_err(|e| OllaError::Internal(e.into()))?
        }
    };

    if let Some(translator) = &translator {
        state.stats.record_translator_event(TranslatorRequestEvent {
            translator_name: Some(translator.name().to_string()),
            model: profile.model.clone(),
            mode,
            fallback_reason: profile.decision().map(|d| d.reason),
            success: outcome.status.is_success(),
            is_streaming: profile.streaming,
            latency_ms: dispatch_start.elapsed().as_millis() as u64,
        });
    }

    Ok(response)
}

fn set_header(builder: axum::http::response::Builder, name: &'static str, value: &str) -> axum::http::response::Builder {
    match HeaderValue::from_str(value) {
        Ok(v) => builder.header(name, v),
        Err(_) => builder,
    }
}

fn is_anthropic_path(target_path: &str) -> bool {
    let bare = target_path.split('?').next().unwrap_or(target_path);
    bare == "/v1/messages" || bare.starts_with("/v1/messages/")
}

/// Rewrite the `model` field of a JSON request body, the way the teacher's
/// `dispatch()` rewrites `model`/`stream` in place before forwarding.
/// Returns `None` if the body isn't a JSON object (left unmodified by the
/// caller in that case).
fn rewrite_model_field(body: &[u8], model: &str) -> Option<Bytes> {
    let mut json: Value = serde_json::from_slice(body).ok()?;
    let obj = json.as_object_mut()?;
    obj.insert("model".into(), Value::String(model.to_string()));
    Some(Bytes::from(serde_json::to_vec(&json).ok()?))
}

/// Wrap a streaming backend response so the final byte count and outcome
/// get folded into one [`RequestStats`] emitted when the stream ends (or
/// errors) — a streaming response's size isn't known until the client has
/// finished reading it.
fn instrument_stream(
    upstream: SseStream,
    stats: Arc<StatsStore>,
    entry: RequestStats,
    start: Instant,
) -> SseStream {
    Box::pin(stream::unfold(
        (upstream, stats, entry, start, 0u64, false),
        |(mut upstream, stats, mut entry, start, mut total, ended)| async move {
            if ended {
                return None;
            }
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    total += chunk.len() as u64;
                    Some((Ok(chunk), (upstream, stats, entry, start, total, false)))
                }
                Some(Err(e)) => {
                    entry.success = false;
                    entry.error = Some(e.to_string());
                    entry.total_bytes = total;
                    entry.timings.streaming_duration_ms = start.elapsed().as_millis() as u64;
                    stats.record_request(entry.clone());
                    Some((Err(e), (upstream, stats, entry, start, total, true)))
                }
                None => {
                    entry.total_bytes = total;
                    entry.timings.streaming_duration_ms = start.elapsed().as_millis() as u64;
                    stats.record_request(entry);
                    None
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_model_field_replaces_model_key() {
        let body = br#"{"model":"gpt-4","messages":[]}"#;
        let rewritten = rewrite_model_field(body, "llama3.1:8b").unwrap();
        let json: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(json["model"], "llama3.1:8b");
    }

    #[test]
    fn rewrite_model_field_none_for_non_object_body() {
        assert!(rewrite_model_field(b"[1,2,3]", "x").is_none());
    }

    #[test]
    fn is_anthropic_path_matches_messages_and_subpaths() {
        assert!(is_anthropic_path("/v1/messages"));
        assert!(is_anthropic_path("/v1/messages/count_tokens"));
        assert!(!is_anthropic_path("/v1/chat/completions"));
    }

    #[tokio::test]
    async fn instrument_stream_records_total_bytes_on_completion() {
        let stats = Arc::new(StatsStore::new(10));
        let chunks: SseStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        let entry = RequestStats::new("a");
        let instrumented = instrument_stream(chunks, Arc::clone(&stats), entry, Instant::now());
        let collected: Vec<_> = instrumented.collect().await;
        assert_eq!(collected.len(), 2);
        let recent = stats.recent_requests(1).await;
        assert_eq!(recent[0].total_bytes, 11);
        assert!(recent[0].success);
    }

    #[tokio::test]
    async fn instrument_stream_marks_failure_on_transport_error() {
        let stats = Arc::new(StatsStore::new(10));
        let chunks: SseStream =
            Box::pin(stream::iter(vec![Err(anyhow::anyhow!("connection reset"))]));
        let entry = RequestStats::new("a");
        let instrumented = instrument_stream(chunks, Arc::clone(&stats), entry, Instant::now());
        let collected: Vec<_> = instrumented.collect().await;
        assert_eq!(collected.len(), 1);
        assert!(collected[0].is_err());
        let recent = stats.recent_requests(1).await;
        assert!(!recent[0].success);
    }
}
