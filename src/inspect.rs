//! Inspector chain: turns a raw inbound request into a [`RequestProfile`].
//!
//! Two inspectors run in order — [`PathInspector`] first (URL path only,
//! sets the dialect set), then [`BodyInspector`] (peeks the body for model
//! name, streaming flag, and capability hints). Neither inspector has a
//! teacher counterpart — the teacher always fully deserializes `Json<Value>`
//! — so this module is shaped directly from the contract, reusing axum's own
//! `body::to_bytes` + `Body::from(Bytes)` idiom the teacher relies on
//! implicitly via `Json` extraction.

use std::collections::HashSet;

use axum::body::{to_bytes, Body};
use serde_json::Value;

use crate::model::{Capability, Dialect, RequestProfile};

/// Classifies a backend-relative path into the dialect(s) a request to it
/// is valid for. Operates on the path only — no knowledge of the body.
pub struct PathInspector;

impl PathInspector {
    const OLLAMA_NATIVE_PATHS: &'static [&'static str] =
        &["/api/generate", "/api/chat", "/api/embeddings", "/api/tags", "/api/show"];

    const OPENAI_SHAPED_PATHS: &'static [&'static str] =
        &["/v1/chat/completions", "/v1/completions", "/v1/embeddings", "/v1/models"];

    /// Returns the set of dialects this path is valid for. An empty set
    /// means "unclassifiable" — stage 1 of the filter treats that as "any
    /// compatible" by widening.
    pub fn classify(path: &str) -> HashSet<Dialect> {
        let bare = path.split('?').next().unwrap_or(path);

        if bare == "/v1/messages" || bare.starts_with("/v1/messages/") {
            // Any endpoint is a dialect-compatible candidate here: native
            // ones passthrough, the rest go through translation. route.rs
            // does the native/translate split.
            return Dialect::all_endpoint_types();
        }

        if Self::OLLAMA_NATIVE_PATHS.iter().any(|p| bare == *p || bare.starts_with(&format!("{p}/"))) {
            return [Dialect::Ollama].into_iter().collect();
        }

        if Self::OPENAI_SHAPED_PATHS.contains(&bare) {
            return Dialect::all_endpoint_types();
        }

        HashSet::new()
    }
}

/// Peeks the request body for `model`, `stream`, and capability hints.
/// Never consumes more than the configured peek budget.
pub struct BodyInspector;

#[derive(Default)]
pub struct BodyInspection {
    pub model: Option<String>,
    pub streaming: bool,
    pub capabilities: Option<HashSet<Capability>>,
}

impl BodyInspector {
    pub fn inspect(json: &Value, target_path: &str) -> BodyInspection {
        let model = json.get("model").and_then(Value::as_str).map(str::to_string);
        let streaming = json.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let mut capabilities = HashSet::new();

        if target_path.contains("embeddings") {
            capabilities.insert(Capability::Embeddings);
        }
        if json.get("tools").is_some() || json.get("functions").is_some() {
            capabilities.insert(Capability::FunctionCalling);
        }
        if let Some(messages) = json.get("messages").and_then(Value::as_array) {
            for message in messages {
                let Some(content) = message.get("content").and_then(Value::as_array) else {
                    continue;
                };
                for block in content {
                    let kind = block.get("type").and_then(Value::as_str).unwrap_or("");
                    if kind == "image_url" || kind == "image" {
                        capabilities.insert(Capability::Vision);
                    }
                }
            }
        }
        if let Some(explicit) = json.get("capabilities").and_then(Value::as_array) {
            for entry in explicit {
                if let Some(cap) = entry.as_str().and_then(Capability::parse) {
                    capabilities.insert(cap);
                }
            }
        }

        BodyInspection {
            model,
            streaming,
            capabilities: if capabilities.is_empty() { None } else { Some(capabilities) },
        }
    }
}

/// Run the full inspector chain over one request.
///
/// `body` is consumed and — when it fits within `peek_budget` — returned
/// reconstructed byte-for-byte via `Body::from(Bytes)` so downstream
/// forwarding is unaffected. When the body's `Content-Length` is absent or
/// exceeds the budget, the body is returned untouched and body inspection
/// is skipped entirely (translation-requiring routes then fall back to
/// dialect-only filtering with `model == None`), because a streaming axum
/// `Body` cannot be partially peeked and then un-read without buffering it
/// whole — the spec's "falls back to pure streaming passthrough" behavior
/// for oversized bodies follows directly from that constraint.
pub async fn run_inspectors(
    method_is_body_bearing: bool,
    target_path: &str,
    content_length: Option<u64>,
    body: Body,
    peek_budget: usize,
) -> (RequestProfile, Body) {
    let profile = RequestProfile::new(target_path);
    let supported_by = PathInspector::classify(target_path);

    if !method_is_body_bearing {
        return (finish_profile(profile, supported_by, BodyInspection::default()), body);
    }

    let within_budget = content_length.map(|len| (len as usize) <= peek_budget).unwrap_or(false);
    if !within_budget {
        return (finish_profile(profile, supported_by, BodyInspection::default()), body);
    }

    let bytes = match to_bytes(body, peek_budget).await {
        Ok(bytes) => bytes,
        Err(_) => {
            // Shouldn't happen given the content-length check above, but
            // the body is gone either way — proceed dialect-only.
            return (finish_profile(profile, supported_by, BodyInspection::default()), Body::empty());
        }
    };

    let inspection = match serde_json::from_slice::<Value>(&bytes) {
        Ok(json) => BodyInspector::inspect(&json, target_path),
        Err(_) => BodyInspection::default(),
    };

    let rebuilt = Body::from(bytes);
    (finish_profile(profile, supported_by, inspection), rebuilt)
}

fn finish_profile(
    mut profile: RequestProfile,
    supported_by: HashSet<Dialect>,
    inspection: BodyInspection,
) -> RequestProfile {
    profile.supported_by = supported_by;
    profile.model = inspection.model;
    profile.streaming = inspection.streaming;
    profile.capabilities = inspection.capabilities;
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_ollama_native_paths() {
        assert_eq!(PathInspector::classify("/api/generate"), [Dialect::Ollama].into_iter().collect());
        assert_eq!(PathInspector::classify("/api/chat"), [Dialect::Ollama].into_iter().collect());
    }

    #[test]
    fn classify_openai_shaped_paths_returns_all_endpoint_types() {
        let claim = PathInspector::classify("/v1/chat/completions");
        assert_eq!(claim, Dialect::all_endpoint_types());
    }

    #[test]
    fn classify_anthropic_messages_returns_all_endpoint_types() {
        let claim = PathInspector::classify("/v1/messages");
        assert_eq!(claim, Dialect::all_endpoint_types());
    }

    #[test]
    fn classify_unknown_path_is_empty() {
        assert!(PathInspector::classify("/totally/unknown").is_empty());
    }

    #[test]
    fn classify_ignores_query_string() {
        assert_eq!(
            PathInspector::classify("/api/chat?stream=true"),
            [Dialect::Ollama].into_iter().collect()
        );
    }

    #[test]
    fn body_inspector_extracts_model_and_stream_flag() {
        let body = json!({ "model": "llama3", "stream": true, "messages": [] });
        let result = BodyInspector::inspect(&body, "/v1/chat/completions");
        assert_eq!(result.model.as_deref(), Some("llama3"));
        assert!(result.streaming);
    }

    #[test]
    fn body_inspector_detects_vision_from_image_content_block() {
        let body = json!({
            "model": "llava",
            "messages": [{
                "role": "user",
                "content": [{ "type": "image_url", "image_url": { "url": "data:..." } }]
            }]
        });
        let result = BodyInspector::inspect(&body, "/v1/chat/completions");
        assert!(result.capabilities.unwrap().contains(&Capability::Vision));
    }

    #[test]
    fn body_inspector_detects_function_calling_from_tools_field() {
        let body = json!({ "model": "llama3", "tools": [{"type": "function"}] });
        let result = BodyInspector::inspect(&body, "/v1/chat/completions");
        assert!(result.capabilities.unwrap().contains(&Capability::FunctionCalling));
    }

    #[test]
    fn body_inspector_detects_embeddings_from_path() {
        let body = json!({ "model": "nomic-embed", "input": "text" });
        let result = BodyInspector::inspect(&body, "/v1/embeddings");
        assert!(result.capabilities.unwrap().contains(&Capability::Embeddings));
    }

    #[test]
    fn body_inspector_returns_no_capabilities_when_nothing_detected() {
        let body = json!({ "model": "llama3", "messages": [{"role": "user", "content": "hi"}] });
        let result = BodyInspector::inspect(&body, "/v1/chat/completions");
        assert!(result.capabilities.is_none());
    }

    #[tokio::test]
    async fn run_inspectors_rebuilds_body_byte_exact_within_budget() {
        let json_body = br#"{"model":"llama3","stream":false}"#.to_vec();
        let body = Body::from(json_body.clone());
        let (profile, rebuilt) =
            run_inspectors(true, "/v1/chat/completions", Some(json_body.len() as u64), body, 1024).await;
        assert_eq!(profile.model.as_deref(), Some("llama3"));
        let rebuilt_bytes = to_bytes(rebuilt, 1024).await.unwrap();
        assert_eq!(rebuilt_bytes.as_ref(), json_body.as_slice());
    }

    #[tokio::test]
    async fn run_inspectors_skips_body_when_over_budget() {
        let json_body = br#"{"model":"llama3"}"#.to_vec();
        let body = Body::from(json_body.clone());
        let (profile, _rebuilt) =
            run_inspectors(true, "/v1/chat/completions", Some(json_body.len() as u64), body, 4).await;
        assert!(profile.model.is_none());
    }

    #[tokio::test]
    async fn run_inspectors_skips_body_when_content_length_missing() {
        let body = Body::from(br#"{"model":"llama3"}"#.to_vec());
        let (profile, _rebuilt) = run_inspectors(true, "/v1/chat/completions", None, body, 1024).await;
        assert!(profile.model.is_none());
        assert_eq!(profile.supported_by, Dialect::all_endpoint_types());
    }
}
