//! Endpoint filter: the pure three-stage narrowing function from §4.2.
//!
//! No teacher counterpart exists (the teacher routes across a fixed tier
//! ladder, never a multi-endpoint fleet); shaped as a small, directly
//! unit-tested free function in the teacher's style (see `router::is_sufficient`
//! for the closest analog: a pure predicate with its own focused test block).
//! Deliberately dependency-free beyond std, mirroring that same heuristic's
//! zero-dependency style.

use crate::model::{Endpoint, RequestProfile, RoutingDecision, RoutingStrategy};
use crate::registry::{ModelLookup, ModelRegistry};

pub struct FilterOutcome {
    pub endpoints: Vec<Endpoint>,
    pub decision: Option<RoutingDecision>,
}

/// Apply the dialect -> capability -> model stages in order.
pub fn filter_endpoints(
    endpoints: &[Endpoint],
    profile: &RequestProfile,
    registry: &dyn ModelRegistry,
) -> FilterOutcome {
    let stage1 = dialect_stage(endpoints, profile);

    let stage2 = capability_stage(&stage1, profile, registry);

    model_stage(&stage2, profile, registry)
}

/// Stage 1 — dialect compatibility. Keep endpoints whose type is in
/// `profile.supported_by`; widen to all input endpoints if that's empty.
fn dialect_stage(endpoints: &[Endpoint], profile: &RequestProfile) -> Vec<Endpoint> {
    if profile.supported_by.is_empty() {
        return endpoints.to_vec();
    }
    let matched: Vec<Endpoint> = endpoints
        .iter()
        .filter(|e| profile.supported_by.contains(&e.endpoint_type.as_dialect()))
        .cloned()
        .collect();
    if matched.is_empty() {
        endpoints.to_vec()
    } else {
        matched
    }
}

/// Stage 2 — capability match, intersected across every required
/// capability. A no-op when capabilities aren't requested or the registry
/// can't answer; falls back to stage 1's output on an empty match.
fn capability_stage(
    stage1: &[Endpoint],
    profile: &RequestProfile,
    registry: &dyn ModelRegistry,
) -> Vec<Endpoint> {
    let Some(required) = &profile.capabilities else {
        return stage1.to_vec();
    };
    if !registry.supports_capability_queries() {
        return stage1.to_vec();
    }
    let required: Vec<_> = required.iter().copied().collect();
    match registry.endpoints_with_capabilities(&required, stage1) {
        None => stage1.to_vec(),
        Some(names) if names.is_empty() => stage1.to_vec(),
        Some(names) => stage1.iter().filter(|e| names.contains(&e.name)).cloned().collect(),
    }
}

/// Stage 3 — specific model lookup, per §4.2's four-way branch.
fn model_stage(stage2: &[Endpoint], profile: &RequestProfile, registry: &dyn ModelRegistry) -> FilterOutcome {
    let Some(model) = &profile.model else {
        return FilterOutcome { endpoints: stage2.to_vec(), decision: None };
    };
    if !registry.supports_model_lookup() {
        return FilterOutcome { endpoints: stage2.to_vec(), decision: None };
    }

    match registry.find_model(model, stage2) {
        ModelLookup::Found(names) => {
            let endpoints = stage2.iter().filter(|e| names.contains(&e.name)).cloned().collect();
            FilterOutcome {
                endpoints,
                decision: Some(RoutingDecision::routed(RoutingStrategy::Model, "exact model match")),
            }
        }
        ModelLookup::KnownUnhealthyOnly => FilterOutcome {
            endpoints: stage2.to_vec(),
            decision: Some(RoutingDecision::fallback(
                RoutingStrategy::Model,
                "model only on unhealthy endpoints",
            )),
        },
        ModelLookup::Unknown => FilterOutcome {
            endpoints: stage2.to_vec(),
            decision: Some(RoutingDecision::fallback(RoutingStrategy::Alias, "model unknown, trying aliases")),
        },
        ModelLookup::Rejected { reason, status } => FilterOutcome {
            endpoints: Vec::new(),
            decision: Some(RoutingDecision::rejected(RoutingStrategy::Model, reason, status)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, Capability, Dialect, EndpointType, HealthStatus};
    use crate::registry::InMemoryRegistry;

    fn endpoint(name: &str, etype: EndpointType, healthy: bool) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: format!("http://{name}.invalid"),
            endpoint_type: etype,
            priority: 0,
            health: if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
            consecutive_failures: 0,
            anthropic_support: AnthropicSupport::disabled(),
        }
    }

    #[test]
    fn stage1_keeps_only_matching_dialects() {
        let endpoints = vec![
            endpoint("a", EndpointType::Ollama, true),
            endpoint("b", EndpointType::VLlm, true),
        ];
        let profile = RequestProfile::new("/api/chat");
        let mut p = RequestProfile::new("/api/chat");
        p.supported_by = [Dialect::Ollama].into_iter().collect();
        let result = dialect_stage(&endpoints, &p);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "a");
        let _ = profile;
    }

    #[test]
    fn stage1_widens_to_all_when_no_match() {
        let endpoints = vec![endpoint("a", EndpointType::Ollama, true)];
        let mut p = RequestProfile::new("/x");
        p.supported_by = [Dialect::VLlm].into_iter().collect();
        let result = dialect_stage(&endpoints, &p);
        assert_eq!(result.len(), 1, "should widen to all input endpoints");
    }

    #[test]
    fn stage1_keeps_all_when_supported_by_is_empty() {
        let endpoints = vec![
            endpoint("a", EndpointType::Ollama, true),
            endpoint("b", EndpointType::VLlm, true),
        ];
        let p = RequestProfile::new("/unclassifiable");
        let result = dialect_stage(&endpoints, &p);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn stage3_found_narrows_to_healthy_hosts() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["phi3".into()]);
        let endpoints = vec![endpoint("a", EndpointType::Ollama, true), endpoint("b", EndpointType::Ollama, true)];
        let mut p = RequestProfile::new("/api/chat");
        p.model = Some("phi3".into());
        let outcome = filter_endpoints(&endpoints, &p, &registry);
        assert_eq!(outcome.endpoints.len(), 1);
        assert_eq!(outcome.endpoints[0].name, "a");
    }

    #[test]
    fn stage3_falls_back_when_model_only_on_unhealthy_endpoint() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("b", "http://b", vec!["phi3".into()]);
        let endpoints = vec![endpoint("a", EndpointType::Ollama, true), endpoint("b", EndpointType::Ollama, false)];
        let mut p = RequestProfile::new("/api/chat");
        p.model = Some("phi3".into());
        let outcome = filter_endpoints(&endpoints, &p, &registry);
        assert_eq!(outcome.endpoints.len(), 2, "falls back to stage 2's output");
        let decision = outcome.decision.unwrap();
        assert_eq!(decision.reason, "model only on unhealthy endpoints");
    }

    #[test]
    fn stage3_rejected_model_returns_empty_with_status() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["banned".into()]);
        registry.block_model("banned", "policy");
        let endpoints = vec![endpoint("a", EndpointType::Ollama, true)];
        let mut p = RequestProfile::new("/api/chat");
        p.model = Some("banned".into());
        let outcome = filter_endpoints(&endpoints, &p, &registry);
        assert!(outcome.endpoints.is_empty());
        assert_eq!(outcome.decision.unwrap().status, Some(409));
    }

    #[test]
    fn capability_stage_intersects_vision_requirement() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["llava-vision".into()]);
        registry.update_endpoint_listing("b", "http://b", vec!["llama3".into()]);
        let endpoints = vec![endpoint("a", EndpointType::Ollama, true), endpoint("b", EndpointType::Ollama, true)];
        let mut p = RequestProfile::new("/api/chat");
        p.capabilities = Some([Capability::Vision].into_iter().collect());
        let outcome = filter_endpoints(&endpoints, &p, &registry);
        assert_eq!(outcome.endpoints.len(), 1);
        assert_eq!(outcome.endpoints[0].name, "a");
    }
}
