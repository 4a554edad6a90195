//! Alias resolver (§4.3): maps one logical model name to per-endpoint
//! native names.
//!
//! Generalized from the teacher's `Config::resolve_tier`
//! (`aliases.get(model).unwrap_or(model)` — one alias, one tier) to "one
//! alias, first resident candidate per endpoint".

use std::collections::HashMap;

use crate::model::{Endpoint, RequestProfile};
use crate::registry::ModelRegistry;

/// `endpoint_name -> rewritten_model_name` for every candidate that has a
/// resident alias target. Stored in `profile.meta["alias_map"]` as a
/// `;`-joined `name=value` list (kept as plain text, the way the teacher's
/// config stores simple string maps, since `RequestProfile::meta` is a
/// `String -> String` map).
pub fn resolve_alias(
    requested_model: &str,
    candidates: &[Endpoint],
    aliases: &HashMap<String, Vec<String>>,
    registry: &dyn ModelRegistry,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(targets) = aliases.get(requested_model) else {
        return map;
    };

    for endpoint in candidates {
        if let Some(target) = targets.iter().find(|t| registry.is_resident(&endpoint.name, t)) {
            map.insert(endpoint.url.clone(), target.clone());
        }
    }
    map
}

/// Encode an alias map into the `profile.meta["alias_map"]` wire form.
pub fn encode_alias_map(map: &HashMap<String, String>) -> String {
    map.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(";")
}

/// Decode `profile.meta["alias_map"]` back into a map.
pub fn decode_alias_map(encoded: &str) -> HashMap<String, String> {
    encoded
        .split(';')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Apply a resolved alias rewrite to `profile`: stores the map, sets the
/// mode meta to `alias-rewrite`, and returns `true`. Falls back to a no-op
/// (stage-1 output unchanged) when no endpoint has a resident alias target.
pub fn apply_alias(profile: &RequestProfile, map: &HashMap<String, String>) -> bool {
    if map.is_empty() {
        return false;
    }
    profile.set_meta("alias_map", encode_alias_map(map));
    profile.set_meta("mode", "alias-rewrite");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, EndpointType, HealthStatus};
    use crate::registry::InMemoryRegistry;

    fn endpoint(name: &str, url: &str) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: url.to_string(),
            endpoint_type: EndpointType::Ollama,
            priority: 0,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            anthropic_support: AnthropicSupport::disabled(),
        }
    }

    #[test]
    fn resolve_alias_picks_first_resident_target_per_endpoint() {
        let registry = InMemoryRegistry::new();
        registry.update_endpoint_listing("a", "http://a", vec!["llama3.1:8b".into()]);
        let aliases: HashMap<String, Vec<String>> =
            [("gpt-4".to_string(), vec!["llama3.1:70b".to_string(), "llama3.1:8b".to_string()])]
                .into_iter()
                .collect();
        let candidates = vec![endpoint("a", "http://a")];
        let map = resolve_alias("gpt-4", &candidates, &aliases, &registry);
        assert_eq!(map.get("http://a"), Some(&"llama3.1:8b".to_string()));
    }

    #[test]
    fn resolve_alias_empty_when_no_endpoint_has_a_resident_target() {
        let registry = InMemoryRegistry::new();
        let aliases: HashMap<String, Vec<String>> =
            [("gpt-4".to_string(), vec!["llama3.1:70b".to_string()])].into_iter().collect();
        let candidates = vec![endpoint("a", "http://a")];
        let map = resolve_alias("gpt-4", &candidates, &aliases, &registry);
        assert!(map.is_empty());
    }

    #[test]
    fn resolve_alias_empty_when_model_not_in_alias_table() {
        let registry = InMemoryRegistry::new();
        let aliases = HashMap::new();
        let candidates = vec![endpoint("a", "http://a")];
        let map = resolve_alias("unknown", &candidates, &aliases, &registry);
        assert!(map.is_empty());
    }

    #[test]
    fn alias_map_round_trips_through_encoding() {
        let mut map = HashMap::new();
        map.insert("http://a".to_string(), "llama3.1:8b".to_string());
        map.insert("http://b".to_string(), "llama3.1:70b".to_string());
        let decoded = decode_alias_map(&encode_alias_map(&map));
        assert_eq!(decoded, map);
    }

    #[test]
    fn apply_alias_returns_false_and_skips_meta_when_map_is_empty() {
        let profile = RequestProfile::new("/v1/chat/completions");
        assert!(!apply_alias(&profile, &HashMap::new()));
        assert!(profile.get_meta("alias_map").is_none());
    }

    #[test]
    fn apply_alias_stores_map_and_returns_true_when_non_empty() {
        let profile = RequestProfile::new("/v1/chat/completions");
        let mut map = HashMap::new();
        map.insert("http://a".to_string(), "llama3.1:8b".to_string());
        assert!(apply_alias(&profile, &map));
        assert_eq!(profile.get_meta("alias_map"), Some("http://a=llama3.1:8b".to_string()));
        assert_eq!(profile.get_meta("mode"), Some("alias-rewrite".to_string()));
    }
}
