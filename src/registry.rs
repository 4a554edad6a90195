//! Model registry: the external collaborator that knows which models are
//! resident on which endpoints.
//!
//! The spec treats this as a contract, not an implementation detail — so it
//! is shaped as a trait object the way the teacher's `BackendClient` enum
//! gives `router.rs` a single surface over three concrete adapters. The only
//! concrete implementation here, [`InMemoryRegistry`], is refreshed by
//! polling each endpoint's model-listing call (`HttpClient::list_models`),
//! on the same interval as the health checker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::backends::HttpClient;
use crate::config::Config;
use crate::endpoint::EndpointCatalog;
use crate::model::{Capability, Endpoint, SourceEndpoint, UnifiedModel};

/// Outcome of a stage-3 model lookup (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLookup {
    /// At least one healthy candidate hosts the model.
    Found(Vec<String>),
    /// The model is known to the registry, but only on endpoints outside
    /// the healthy candidate set.
    KnownUnhealthyOnly,
    /// The registry has never observed this model on any endpoint.
    Unknown,
    /// The registry explicitly refuses to serve this model.
    Rejected { reason: String, status: u16 },
}

/// Contract the endpoint filter depends on. `filter.rs` never reaches past
/// this trait into a concrete storage type.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Whether this registry can answer capability queries at all. Filter
    /// stage 2 is a no-op when this is `false`.
    fn supports_capability_queries(&self) -> bool;

    /// Endpoint names (restricted to `candidates`) hosting at least one
    /// model with every capability in `required`. `None` when capability
    /// queries are unsupported.
    fn endpoints_with_capabilities(
        &self,
        required: &[Capability],
        candidates: &[Endpoint],
    ) -> Option<Vec<String>>;

    /// Whether this registry can answer model-to-endpoint lookups.
    fn supports_model_lookup(&self) -> bool;

    /// Stage-3 model lookup, constrained to `candidates`.
    fn find_model(&self, model: &str, candidates: &[Endpoint]) -> ModelLookup;

    /// Whether `model` is resident (by native name) on the named endpoint —
    /// used by the alias resolver.
    fn is_resident(&self, endpoint_name: &str, native_name: &str) -> bool;

    /// Aggregate the current per-endpoint listings into canonical
    /// `UnifiedModel`s, deduplicated by id.
    fn unified_models(&self, endpoints: &[Endpoint]) -> Vec<UnifiedModel>;

    /// Replace the listing for one endpoint, called by the refresh loop.
    fn update_endpoint_listing(&self, endpoint_name: &str, url: &str, models: Vec<String>);

    /// Poll `endpoint` for its current model listing and update the
    /// registry. Async because it makes the network call itself rather
    /// than requiring a separate plumbing step in the refresh loop.
    async fn refresh(&self, endpoint: &Endpoint, client: &HttpClient) -> anyhow::Result<()>;
}

#[derive(Default)]
struct EndpointListing {
    url: String,
    models: Vec<String>,
    last_seen: chrono::DateTime<Utc>,
}

/// Concurrent, in-memory registry backed by a per-endpoint listing map.
/// Capability tagging is heuristic (name-based) since the fleet's backends
/// don't uniformly expose capability metadata.
pub struct InMemoryRegistry {
    listings: DashMap<String, EndpointListing>,
    blocked_models: DashMap<String, String>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            listings: DashMap::new(),
            blocked_models: DashMap::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Block a model name from being served at all (stage-3 explicit reject).
    pub fn block_model(&self, model: &str, reason: &str) {
        self.blocked_models.insert(model.to_string(), reason.to_string());
    }

    fn capability_of(name: &str) -> Vec<Capability> {
        let lower = name.to_lowercase();
        let mut caps = Vec::new();
        if lower.contains("vision") || lower.contains("vl") {
            caps.push(Capability::Vision);
        }
        if lower.contains("embed") {
            caps.push(Capability::Embeddings);
        }
        if lower.contains("code") || lower.contains("coder") {
            caps.push(Capability::Code);
        }
        if lower.contains("tool") || lower.contains("function") {
            caps.push(Capability::FunctionCalling);
        }
        caps
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    fn supports_capability_queries(&self) -> bool {
        true
    }

    fn endpoints_with_capabilities(
        &self,
        required: &[Capability],
        candidates: &[Endpoint],
    ) -> Option<Vec<String>> {
        if required.is_empty() {
            return Some(candidates.iter().map(|e| e.name.clone()).collect());
        }
        let mut matches = Vec::new();
        for endpoint in candidates {
            let Some(listing) = self.listings.get(&endpoint.name) else {
                continue;
            };
            let endpoint_caps: std::collections::HashSet<Capability> = listing
                .models
                .iter()
                .flat_map(|m| Self::capability_of(m))
                .collect();
            if required.iter().all(|c| endpoint_caps.contains(c)) {
                matches.push(endpoint.name.clone());
            }
        }
        Some(matches)
    }

    fn supports_model_lookup(&self) -> bool {
        true
    }

    fn find_model(&self, model: &str, candidates: &[Endpoint]) -> ModelLookup {
        if let Some(entry) = self.blocked_models.get(model) {
            return ModelLookup::Rejected {
                reason: entry.value().clone(),
                status: 409,
            };
        }

        let candidate_names: std::collections::HashSet<&str> =
            candidates.iter().map(|e| e.name.as_str()).collect();
        let healthy_candidate_names: std::collections::HashSet<&str> = candidates
            .iter()
            .filter(|e| e.is_healthy())
            .map(|e| e.name.as_str())
            .collect();

        let mut healthy_hosts = Vec::new();
        let mut known_anywhere = false;
        for entry in self.listings.iter() {
            if !entry.value().models.iter().any(|m| m == model) {
                continue;
            }
            if candidate_names.contains(entry.key().as_str()) {
                known_anywhere = true;
            }
            if healthy_candidate_names.contains(entry.key().as_str()) {
                healthy_hosts.push(entry.key().clone());
            }
        }

        if !healthy_hosts.is_empty() {
            ModelLookup::Found(healthy_hosts)
        } else if known_anywhere {
            ModelLookup::KnownUnhealthyOnly
        } else {
            ModelLookup::Unknown
        }
    }

    fn is_resident(&self, endpoint_name: &str, native_name: &str) -> bool {
        self.listings
            .get(endpoint_name)
            .map(|l| l.models.iter().any(|m| m == native_name))
            .unwrap_or(false)
    }

    fn unified_models(&self, endpoints: &[Endpoint]) -> Vec<UnifiedModel> {
        let endpoint_urls: HashMap<&str, &str> =
            endpoints.iter().map(|e| (e.name.as_str(), e.url.as_str())).collect();
        let mut by_id: HashMap<String, UnifiedModel> = HashMap::new();

        for entry in self.listings.iter() {
            let endpoint_name = entry.key();
            let Some(&url) = endpoint_urls.get(endpoint_name.as_str()) else {
                continue;
            };
            for model in &entry.value().models {
                let unified = by_id.entry(model.clone()).or_insert_with(|| UnifiedModel {
                    id: model.clone(),
                    capabilities: std::collections::HashSet::new(),
                    sources: Vec::new(),
                    aliases: Vec::new(),
                    native_names: HashMap::new(),
                });
                unified.capabilities.extend(Self::capability_of(model));
                unified.sources.push(SourceEndpoint {
                    url: url.to_string(),
                    last_seen: entry.value().last_seen,
                });
                unified
                    .native_names
                    .insert(endpoint_name.clone(), model.clone());
            }
        }

        let mut models: Vec<UnifiedModel> = by_id.into_values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    fn update_endpoint_listing(&self, endpoint_name: &str, url: &str, models: Vec<String>) {
        self.listings.insert(
            endpoint_name.to_string(),
            EndpointListing {
                url: url.to_string(),
                models,
                last_seen: Utc::now(),
            },
        );
    }

    async fn refresh(&self, endpoint: &Endpoint, client: &HttpClient) -> anyhow::Result<()> {
        let models = client.list_models(endpoint.endpoint_type).await?;
        self.update_endpoint_listing(&endpoint.name, &endpoint.url, models);
        Ok(())
    }
}

/// Background task that polls every endpoint's model listing on an
/// interval and folds the result into `registry`, mirroring
/// `endpoint::health_check_loop`'s shape.
pub async fn refresh_loop(
    catalog: EndpointCatalog,
    registry: Arc<dyn ModelRegistry>,
    config_lock: Arc<RwLock<Arc<Config>>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot = catalog.snapshot();
        let config = config_lock.read().expect("config lock poisoned").clone();
        for endpoint in snapshot {
            let api_key = config.api_key_for(&endpoint.name);
            let timeout_ms = config
                .endpoint_config(&endpoint.name)
                .map(|e| e.timeout_ms)
                .unwrap_or(30_000);
            let client = match HttpClient::new(&endpoint.url, Duration::from_millis(timeout_ms), api_key) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %e, "failed to build registry refresh client");
                    continue;
                }
            };
            if let Err(e) = registry.refresh(&endpoint, &client).await {
                tracing::debug!(endpoint = %endpoint.name, error = %e, "model listing refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, EndpointType, HealthStatus};

    fn endpoint(name: &str, healthy: bool) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: format!("http://{name}.invalid"),
            endpoint_type: EndpointType::Ollama,
            priority: 0,
            health: if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
            consecutive_failures: 0,
            anthropic_support: AnthropicSupport::disabled(),
        }
    }

    #[test]
    fn find_model_found_when_healthy_candidate_hosts_it() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["phi3".into()]);
        let candidates = vec![endpoint("a", true)];
        assert_eq!(
            registry.find_model("phi3", &candidates),
            ModelLookup::Found(vec!["a".to_string()])
        );
    }

    #[test]
    fn find_model_falls_back_to_unhealthy_only_when_only_unhealthy_endpoint_hosts_it() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("b", "http://b", vec!["phi3".into()]);
        let candidates = vec![endpoint("a", true), endpoint("b", false)];
        assert_eq!(
            registry.find_model("phi3", &candidates),
            ModelLookup::KnownUnhealthyOnly
        );
    }

    #[test]
    fn find_model_unknown_when_never_observed() {
        let registry = InMemoryRegistry::new();
        let candidates = vec![endpoint("a", true)];
        assert_eq!(registry.find_model("ghost", &candidates), ModelLookup::Unknown);
    }

    #[test]
    fn find_model_rejected_when_blocked() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["banned".into()]);
        registry.block_model("banned", "policy violation");
        let candidates = vec![endpoint("a", true)];
        match registry.find_model("banned", &candidates) {
            ModelLookup::Rejected { status, .. } => assert_eq!(status, 409),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn endpoints_with_capabilities_matches_by_name_heuristic() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["llava-vision".into()]);
        registry.update_endpoint_listing("b", "http://b", vec!["llama3".into()]);
        let candidates = vec![endpoint("a", true), endpoint("b", true)];
        let matches = registry
            .endpoints_with_capabilities(&[Capability::Vision], &candidates)
            .unwrap();
        assert_eq!(matches, vec!["a".to_string()]);
    }

    #[test]
    fn unified_models_dedups_and_tracks_sources() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["llama3".into()]);
        registry.update_endpoint_listing("b", "http://b", vec!["llama3".into()]);
        let endpoints = vec![endpoint("a", true), endpoint("b", true)];
        let unified = registry.unified_models(&endpoints);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].sources.len(), 2);
    }

    #[test]
    fn is_resident_checks_exact_native_name() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["llama3.1:8b".into()]);
        assert!(registry.is_resident("a", "llama3.1:8b"));
        assert!(!registry.is_resident("a", "llama3.1:70b"));
        assert!(!registry.is_resident("missing", "llama3.1:8b"));
    }
}
