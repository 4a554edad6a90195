//! Router / translation decision (§4.4): chooses passthrough vs
//! translation for a filtered candidate list, and records why.
//!
//! No teacher counterpart routes across heterogeneous dialects — the
//! teacher's `router::route` always dispatches to exactly one
//! `BackendClient` adapter per tier. This module generalizes that
//! top-level orchestration shape from a single dispatch call into the
//! passthrough/translation binary the fleet needs, while keeping the same
//! "decide first, then hand off to the dispatcher" structure.

use std::sync::Arc;

use bytes::Bytes;

use crate::model::{Endpoint, RequestProfile, RoutingDecision, RoutingStrategy};
use crate::translate::Translator;

/// A request ready for the dispatcher: either handed through unmodified or
/// already rewritten into the target dialect.
pub struct PassthroughRequest {
    pub body: Option<Bytes>,
    pub target_path: String,
    pub model: Option<String>,
    pub streaming: bool,
}

pub enum RouteMode {
    Passthrough,
    Translate,
}

pub struct RouteOutcome {
    pub mode: RouteMode,
    pub candidates: Vec<Endpoint>,
    pub request: PassthroughRequest,
    pub translator: Option<Arc<dyn Translator>>,
}

/// Decide passthrough vs translation for one request.
///
/// `translator` is `None` when the inbound path needs no translation at
/// all (every other route besides `/olla/anthropic/...` and
/// `/v1/messages` when the caller actually wants Anthropic semantics). When
/// present, it gates the decision per §4.4: passthrough is preferred only
/// when the translator itself exposes passthrough capability *and* at
/// least one filtered candidate natively speaks the translator's dialect.
pub fn decide(
    candidates: &[Endpoint],
    profile: &RequestProfile,
    body: Option<Bytes>,
    translator: Option<Arc<dyn Translator>>,
) -> RouteOutcome {
    let Some(translator) = translator else {
        return RouteOutcome {
            mode: RouteMode::Passthrough,
            candidates: candidates.to_vec(),
            request: PassthroughRequest {
                body,
                target_path: profile.target_path.clone(),
                model: profile.model.clone(),
                streaming: profile.streaming,
            },
            translator: None,
        };
    };

    let (native, xlate): (Vec<Endpoint>, Vec<Endpoint>) =
        candidates.iter().cloned().partition(|e| e.anthropic_support.enabled);

    if translator.supports_passthrough() && !native.is_empty() {
        profile.set_meta("mode", "passthrough");
        profile.set_decision(RoutingDecision::routed(RoutingStrategy::None, "native dialect support found"));
        let target_path = native
            .first()
            .map(|e| translator.native_path(&e.anthropic_support))
            .unwrap_or_else(|| profile.target_path.clone());
        return RouteOutcome {
            mode: RouteMode::Passthrough,
            candidates: native,
            request: PassthroughRequest {
                body,
                target_path,
                model: profile.model.clone(),
                streaming: profile.streaming,
            },
            translator: Some(translator),
        };
    }

    profile.set_meta("mode", "translate");
    profile.set_decision(RoutingDecision::fallback(
        RoutingStrategy::None,
        "no native dialect support, translating request",
    ));

    let translated_body = match &body {
        Some(bytes) => translator.transform_request(bytes).ok(),
        None => None,
    };

    RouteOutcome {
        mode: RouteMode::Translate,
        candidates: if xlate.is_empty() { candidates.to_vec() } else { xlate },
        request: PassthroughRequest {
            body: translated_body.or(body),
            target_path: translator.translated_path().to_string(),
            model: profile.model.clone(),
            streaming: profile.streaming,
        },
        translator: Some(translator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, EndpointType, HealthStatus};
    use crate::translate::AnthropicTranslator;

    fn endpoint(name: &str, anthropic: bool) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: format!("http://{name}.invalid"),
            endpoint_type: EndpointType::Ollama,
            priority: 0,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            anthropic_support: if anthropic {
                AnthropicSupport { enabled: true, messages_path: None }
            } else {
                AnthropicSupport::disabled()
            },
        }
    }

    #[test]
    fn no_translator_is_always_passthrough() {
        let candidates = vec![endpoint("a", false)];
        let profile = RequestProfile::new("/v1/chat/completions");
        let outcome = decide(&candidates, &profile, None, None);
        assert!(matches!(outcome.mode, RouteMode::Passthrough));
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn prefers_passthrough_when_a_native_endpoint_exists() {
        let candidates = vec![endpoint("a", true), endpoint("b", false)];
        let profile = RequestProfile::new("/v1/messages");
        let translator: Arc<dyn Translator> = Arc::new(AnthropicTranslator);
        let outcome = decide(&candidates, &profile, None, Some(translator));
        assert!(matches!(outcome.mode, RouteMode::Passthrough));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].name, "a");
        assert_eq!(profile.get_meta("mode"), Some("passthrough".to_string()));
    }

    #[test]
    fn translates_when_no_native_endpoint_exists() {
        let candidates = vec![endpoint("a", false)];
        let profile = RequestProfile::new("/v1/messages");
        let translator: Arc<dyn Translator> = Arc::new(AnthropicTranslator);
        let body = Bytes::from_static(br#"{"model":"x","messages":[{"role":"user","content":"hi"}]}"#);
        let outcome = decide(&candidates, &profile, Some(body), Some(translator));
        assert!(matches!(outcome.mode, RouteMode::Translate));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(profile.get_meta("mode"), Some("translate".to_string()));
        assert_eq!(outcome.request.target_path, "/v1/chat/completions");
        let rewritten = outcome.request.body.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
