//! Dispatcher (§4.5): load-balances across a candidate list, fails over on
//! transport errors before the first response byte, and streams backend
//! responses through unbuffered.
//!
//! Grounded on the teacher's `router::dispatch`/`router::escalate` pair —
//! same "build a client, send, measure latency, build a telemetry record"
//! shape — generalized from trying tiers cheapest-first to the spec's
//! priority-then-least-connections balancer with a round-robin tie-break,
//! and from a single backend adapter call to the generic `HttpClient`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::{header::HeaderMap, Method, StatusCode};

use crate::backends::{HttpClient, SseStream};
use crate::error::OllaError;
use crate::model::{Dialect, Endpoint};
use crate::route::PassthroughRequest;
use crate::telemetry::Timings;
use crate::translate::Translator;

pub enum DispatchBody {
    Buffered(Bytes),
    Streaming(SseStream),
}

pub struct DispatchOutcome {
    pub endpoint_name: String,
    pub endpoint_type: crate::model::EndpointType,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: DispatchBody,
    pub timings: Timings,
}

/// Tracks in-flight request counts per endpoint for least-connections
/// balancing, and a round-robin counter used only to break exact ties.
pub struct Dispatcher {
    in_flight: DashMap<String, AtomicU64>,
    round_robin: AtomicUsize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            round_robin: AtomicUsize::new(0),
        }
    }

    fn load_of(&self, name: &str) -> u64 {
        self.in_flight.get(name).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    fn bump(&self, name: &str, delta: i64) {
        let counter = self.in_flight.entry(name.to_string()).or_insert_with(|| AtomicU64::new(0));
        if delta >= 0 {
            counter.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub((-delta) as u64)))
                .ok();
        }
    }

    /// Order `candidates` by priority (higher first), then by current
    /// in-flight load (fewer first). Exact ties are rotated by a
    /// round-robin counter so repeated calls spread load evenly. Does not
    /// reorder a single-element candidate list — an explicit routing
    /// target is never second-guessed.
    pub fn order_candidates(&self, candidates: &[Endpoint]) -> Vec<Endpoint> {
        if candidates.len() <= 1 {
            return candidates.to_vec();
        }

        let mut scored: Vec<(Endpoint, i32, u64)> =
            candidates.iter().map(|e| (e.clone(), e.priority, self.load_of(&e.name))).collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut ordered = Vec::with_capacity(scored.len());
        let mut i = 0;
        while i < scored.len() {
            let mut j = i + 1;
            while j < scored.len() && scored[j].1 == scored[i].1 && scored[j].2 == scored[i].2 {
                j += 1;
            }
            let mut group: Vec<Endpoint> = scored[i..j].iter().map(|(e, ..)| e.clone()).collect();
            if group.len() > 1 {
                let rr = self.round_robin.fetch_add(1, Ordering::Relaxed);
                let shift = rr % group.len();
                group.rotate_left(shift);
            }
            ordered.extend(group);
            i = j;
        }
        ordered
    }

    /// Dispatch one request, trying candidates in balanced order and
    /// failing over to the next on a transport error. Once a backend
    /// accepts the request and returns a status line, that attempt is
    /// final — there is no retry on a non-2xx HTTP response, only on
    /// errors that occur before any bytes came back.
    pub async fn dispatch(
        &self,
        candidates: &[Endpoint],
        request: &PassthroughRequest,
        method: Method,
        dialect: Dialect,
        clients: &HashMap<String, HttpClient>,
        translator: Option<&Arc<dyn Translator>>,
    ) -> Result<DispatchOutcome, OllaError> {
        let order = self.order_candidates(candidates);
        if order.is_empty() {
            return Err(OllaError::NoHealthyEndpoints);
        }

        let mut timings = Timings::default();
        let selection_start = Instant::now();

        for endpoint in &order {
            let Some(client) = clients.get(&endpoint.name) else {
                continue;
            };
            timings.endpoint_selection_ms = selection_start.elapsed().as_millis() as u64;

            self.bump(&endpoint.name, 1);
            let attempt_start = Instant::now();
            let result = self
                .attempt(client, endpoint.endpoint_type, method.clone(), request, dialect, translator)
                .await;
            self.bump(&endpoint.name, -1);

            match result {
                Ok((status, headers, body)) => {
                    timings.request_send_ms = attempt_start.elapsed().as_millis() as u64;
                    timings.backend_first_byte_ms = timings.request_send_ms;
                    return Ok(DispatchOutcome {
                        endpoint_name: endpoint.name.clone(),
                        endpoint_type: endpoint.endpoint_type,
                        status,
                        headers,
                        body,
                        timings,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint.name,
                        error = %e,
                        "endpoint attempt failed before first byte, trying next candidate"
                    );
                }
            }
        }

        Err(OllaError::AllBackendsFailed)
    }

    async fn attempt(
        &self,
        client: &HttpClient,
        endpoint_type: crate::model::EndpointType,
        method: Method,
        request: &PassthroughRequest,
        dialect: Dialect,
        translator: Option<&Arc<dyn Translator>>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, DispatchBody)> {
        if request.streaming {
            let (status, headers, stream) = client
                .forward_stream(method, endpoint_type, &request.target_path, request.body.clone(), dialect)
                .await?;
            let stream = match translator {
                Some(t) => t.transform_streaming_response(stream),
                None => stream,
            };
            Ok((status, headers, DispatchBody::Streaming(stream)))
        } else {
            let response = client
                .forward(method, endpoint_type, &request.target_path, request.body.clone(), dialect)
                .await?;
            let body = match translator {
                Some(t) if response.status.is_success() => t.transform_response(&response.body)?,
                _ => response.body,
            };
            Ok((response.status, response.headers, DispatchBody::Buffered(body)))
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, EndpointType, HealthStatus};

    fn endpoint(name: &str, priority: i32) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: format!("http://{name}.invalid"),
            endpoint_type: EndpointType::Ollama,
            priority,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            anthropic_support: AnthropicSupport::disabled(),
        }
    }

    #[test]
    fn order_candidates_prefers_higher_priority() {
        let dispatcher = Dispatcher::new();
        let candidates = vec![endpoint("low", 0), endpoint("high", 10)];
        let ordered = dispatcher.order_candidates(&candidates);
        assert_eq!(ordered[0].name, "high");
    }

    #[test]
    fn order_candidates_prefers_lower_load_within_same_priority() {
        let dispatcher = Dispatcher::new();
        dispatcher.bump("busy", 5);
        let candidates = vec![endpoint("busy", 0), endpoint("idle", 0)];
        let ordered = dispatcher.order_candidates(&candidates);
        assert_eq!(ordered[0].name, "idle");
    }

    #[test]
    fn order_candidates_rotates_exact_ties() {
        let dispatcher = Dispatcher::new();
        let candidates = vec![endpoint("a", 0), endpoint("b", 0)];
        let first = dispatcher.order_candidates(&candidates);
        let second = dispatcher.order_candidates(&candidates);
        assert_ne!(first[0].name, second[0].name, "round robin should alternate ties");
    }

    #[test]
    fn order_candidates_never_reorders_a_single_explicit_target() {
        let dispatcher = Dispatcher::new();
        let candidates = vec![endpoint("only", 0)];
        let ordered = dispatcher.order_candidates(&candidates);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "only");
    }
}
