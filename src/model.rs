//! Core data model for the proxy: endpoints, dialects, capabilities, and the
//! per-request profile the inspector chain builds up.
//!
//! Mirrors the `Provider` enum in the teacher gateway (normalized type +
//! `Display`), generalized from "one of four backend adapters" to the
//! six-canonical-type endpoint fleet this proxy aggregates.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical backend type. Every configured [`Endpoint`] has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointType {
    Ollama,
    LmStudio,
    OpenAI,
    OpenAICompatible,
    VLlm,
    LlamaCpp,
}

impl EndpointType {
    /// Parse a (possibly differently-cased or underscored) type string into
    /// a canonical [`EndpointType`], applying the same normalization the
    /// filter's dialect-compatibility stage uses.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "ollama" => Some(Self::Ollama),
            "lm-studio" => Some(Self::LmStudio),
            "openai" => Some(Self::OpenAI),
            "openai-compatible" => Some(Self::OpenAICompatible),
            "vllm" => Some(Self::VLlm),
            "llamacpp" | "llama.cpp" | "llama-cpp" => Some(Self::LlamaCpp),
            _ => None,
        }
    }

    pub fn as_dialect(self) -> Dialect {
        match self {
            Self::Ollama => Dialect::Ollama,
            Self::LmStudio => Dialect::LmStudio,
            Self::OpenAI => Dialect::OpenAI,
            Self::OpenAICompatible => Dialect::OpenAICompatible,
            Self::VLlm => Dialect::VLlm,
            Self::LlamaCpp => Dialect::LlamaCpp,
        }
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lm-studio",
            Self::OpenAI => "openai",
            Self::OpenAICompatible => "openai-compatible",
            Self::VLlm => "vllm",
            Self::LlamaCpp => "llamacpp",
        })
    }
}

/// Normalize a raw type string the way the filter's stage 1 does: fold the
/// LM Studio spelling variants to `lm-studio`, lowercase everything else.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "lmstudio" | "lm_studio" => "lm-studio".to_string(),
        _ => lower,
    }
}

/// The wire-protocol dialect a request or endpoint speaks. A superset of
/// [`EndpointType`]: every endpoint type is a dialect, plus `Anthropic`,
/// which endpoints support as a bolt-on capability flag rather than a
/// canonical type (see [`AnthropicSupport`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Ollama,
    LmStudio,
    OpenAI,
    OpenAICompatible,
    VLlm,
    LlamaCpp,
    Anthropic,
}

impl Dialect {
    /// All six canonical endpoint-type dialects, excluding `Anthropic`.
    pub fn all_endpoint_types() -> HashSet<Dialect> {
        [
            Dialect::Ollama,
            Dialect::LmStudio,
            Dialect::OpenAI,
            Dialect::OpenAICompatible,
            Dialect::VLlm,
            Dialect::LlamaCpp,
        ]
        .into_iter()
        .collect()
    }

    /// The superset of backend types that accept `openai` as a provider
    /// token (spec §4.7): ollama, lm-studio, vllm, openai, openai-compatible.
    /// Notably excludes llama.cpp, per the literal provider-surface list.
    pub fn openai_superset() -> HashSet<Dialect> {
        [
            Dialect::Ollama,
            Dialect::LmStudio,
            Dialect::VLlm,
            Dialect::OpenAI,
            Dialect::OpenAICompatible,
        ]
        .into_iter()
        .collect()
    }

    pub fn matches_endpoint_type(self, t: EndpointType) -> bool {
        self == t.as_dialect()
    }
}

/// A model capability flag a request may require and a model may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Vision,
    FunctionCalling,
    Embeddings,
    Code,
}

impl Capability {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "vision" | "image" | "images" => Some(Self::Vision),
            "function-calling" | "function_calling" | "tools" | "functions" => {
                Some(Self::FunctionCalling)
            }
            "embeddings" | "embedding" => Some(Self::Embeddings),
            "code" | "coding" => Some(Self::Code),
            _ => None,
        }
    }
}

/// Health of an [`Endpoint`] as tracked by the health-check collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Offline,
    Warming,
}

/// Declares whether an endpoint natively accepts the Anthropic Messages
/// protocol, and at which path.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicSupport {
    pub enabled: bool,
    /// Defaults to `/v1/messages` when unset.
    pub messages_path: Option<String>,
}

impl AnthropicSupport {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            messages_path: None,
        }
    }

    pub fn path(&self) -> &str {
        self.messages_path.as_deref().unwrap_or("/v1/messages")
    }
}

impl Default for AnthropicSupport {
    fn default() -> Self {
        Self::disabled()
    }
}

/// A routable backend. Created at discovery time, mutated only by the
/// health-check collaborator, treated as an immutable snapshot by the core
/// for the duration of one request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    pub priority: i32,
    pub health: HealthStatus,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub anthropic_support: AnthropicSupport,
}

impl Endpoint {
    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }
}

/// Strategy the router used to narrow candidates down to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    None,
    Model,
    Capability,
    Alias,
    Provider,
}

/// Outcome of the routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingAction {
    Routed,
    Fallback,
    Rejected,
}

/// Record of which strategy and fallback path the router chose for a
/// request — attached to [`RequestProfile`] for telemetry and response
/// headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingDecision {
    pub strategy: RoutingStrategy,
    pub action: RoutingAction,
    pub reason: String,
    pub status: Option<u16>,
}

impl RoutingDecision {
    pub fn routed(strategy: RoutingStrategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            action: RoutingAction::Routed,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn fallback(strategy: RoutingStrategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            action: RoutingAction::Fallback,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn rejected(strategy: RoutingStrategy, reason: impl Into<String>, status: u16) -> Self {
        Self {
            strategy,
            action: RoutingAction::Rejected,
            reason: reason.into(),
            status: Some(status),
        }
    }
}

/// Per-request metadata produced by the inspector chain.
///
/// Created at request start; read-only after the inspector chain completes
/// except for `meta` and `decision`, which are guarded by a mutex per
/// §5 — alias resolution and late-stage decoration are sequential in
/// practice, so the lock is defensive, not a real contention point.
#[derive(Debug)]
pub struct RequestProfile {
    pub target_path: String,
    pub supported_by: HashSet<Dialect>,
    pub model: Option<String>,
    pub capabilities: Option<HashSet<Capability>>,
    pub streaming: bool,
    meta: Mutex<HashMap<String, String>>,
    decision: Mutex<Option<RoutingDecision>>,
}

impl RequestProfile {
    pub fn new(target_path: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            supported_by: HashSet::new(),
            model: None,
            capabilities: None,
            streaming: false,
            meta: Mutex::new(HashMap::new()),
            decision: Mutex::new(None),
        }
    }

    pub fn set_meta(&self, key: &str, value: impl Into<String>) {
        self.meta
            .lock()
            .expect("request profile meta lock poisoned")
            .insert(key.to_string(), value.into());
    }

    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.meta
            .lock()
            .expect("request profile meta lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn set_decision(&self, decision: RoutingDecision) {
        *self.decision.lock().expect("request profile decision lock poisoned") = Some(decision);
    }

    pub fn decision(&self) -> Option<RoutingDecision> {
        self.decision
            .lock()
            .expect("request profile decision lock poisoned")
            .clone()
    }
}

/// One endpoint a [`UnifiedModel`] has been observed on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEndpoint {
    pub url: String,
    pub last_seen: DateTime<Utc>,
}

/// A canonical model identity aggregated from multiple endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnifiedModel {
    pub id: String,
    pub capabilities: HashSet<Capability>,
    pub sources: Vec<SourceEndpoint>,
    pub aliases: Vec<String>,
    /// endpoint name -> the model's native name on that endpoint.
    pub native_names: HashMap<String, String>,
}
