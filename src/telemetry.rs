//! Telemetry emitter (§4.6): fire-and-forget request stats, translator
//! events, and Prometheus rendering.
//!
//! Grounded on the teacher's `traffic::TrafficLog` ring buffer (fixed
//! capacity, `try_lock`-and-drop-on-contention push, `tokio::sync::Mutex`
//! for the read side) and `api::metrics`'s text-exposition renderer,
//! generalized from one `TrafficEntry` shape into the spec's three
//! distinct emission types.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-phase timings captured for one request, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub path_resolution_ms: u64,
    pub endpoint_selection_ms: u64,
    pub request_send_ms: u64,
    pub backend_first_byte_ms: u64,
    pub streaming_duration_ms: u64,
}

/// Emitted once per terminal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStats {
    pub id: String,
    pub endpoint_name: String,
    pub model: Option<String>,
    pub total_bytes: u64,
    pub timings: Timings,
    pub success: bool,
    pub canceled: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestStats {
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            endpoint_name: endpoint_name.into(),
            model: None,
            total_bytes: 0,
            timings: Timings::default(),
            success: true,
            canceled: false,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Emitted once per request that passed through a translator, regardless of
/// whether passthrough or translation mode was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorRequestEvent {
    pub translator_name: Option<String>,
    pub model: Option<String>,
    pub mode: String,
    pub fallback_reason: Option<String>,
    pub success: bool,
    pub is_streaming: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCounters {
    pub requests: u64,
    pub errors: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointCounters {
    pub requests: u64,
    pub errors: u64,
    pub total_bytes: u64,
    pub avg_latency_ms: f64,
}

/// Fixed-capacity ring-buffer telemetry sink. Push is non-blocking
/// (`try_lock`, drop on contention); reads take the async lock since
/// they're only ever called from the low-traffic `/internal/*` surface.
pub struct StatsStore {
    capacity: usize,
    requests: Mutex<VecDeque<RequestStats>>,
    translator_events: Mutex<VecDeque<TranslatorRequestEvent>>,
}

impl StatsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            requests: Mutex::new(VecDeque::with_capacity(capacity)),
            translator_events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record_request(&self, stats: RequestStats) {
        if let Ok(mut entries) = self.requests.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(stats);
        }
    }

    pub fn record_translator_event(&self, event: TranslatorRequestEvent) {
        if let Ok(mut entries) = self.translator_events.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(event);
        }
    }

    pub async fn recent_requests(&self, limit: usize) -> Vec<RequestStats> {
        let entries = self.requests.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn recent_translator_events(&self, limit: usize) -> Vec<TranslatorRequestEvent> {
        let entries = self.translator_events.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Per-model request/error/byte counters over the current window.
    pub async fn model_stats(&self) -> HashMap<String, ModelCounters> {
        let entries = self.requests.lock().await;
        let mut out: HashMap<String, ModelCounters> = HashMap::new();
        for entry in entries.iter() {
            let Some(model) = &entry.model else { continue };
            let counters = out.entry(model.clone()).or_default();
            counters.requests += 1;
            counters.total_bytes += entry.total_bytes;
            if !entry.success {
                counters.errors += 1;
            }
        }
        out
    }

    /// Per-endpoint request/error/byte/latency counters over the current
    /// window.
    pub async fn endpoint_stats(&self) -> HashMap<String, EndpointCounters> {
        let entries = self.requests.lock().await;
        let mut sums: HashMap<String, (u64, u64, u64, u64)> = HashMap::new();
        for entry in entries.iter() {
            let sum = sums.entry(entry.endpoint_name.clone()).or_default();
            sum.0 += 1;
            if !entry.success {
                sum.1 += 1;
            }
            sum.2 += entry.total_bytes;
            sum.3 += entry.timings.backend_first_byte_ms + entry.timings.streaming_duration_ms;
        }
        sums.into_iter()
            .map(|(name, (requests, errors, total_bytes, latency_sum))| {
                let avg_latency_ms = if requests == 0 { 0.0 } else { latency_sum as f64 / requests as f64 };
                (name, EndpointCounters { requests, errors, total_bytes, avg_latency_ms })
            })
            .collect()
    }

    /// Render the current window as Prometheus text exposition format.
    pub async fn render_prometheus(&self) -> String {
        let requests = self.requests.lock().await;
        let window_size = requests.len();

        let mut request_counts: HashMap<(String, bool), u64> = HashMap::new();
        let mut latency: HashMap<String, (u64, u64)> = HashMap::new();
        let mut canceled = 0u64;
        let mut errors = 0u64;

        for entry in requests.iter() {
            if entry.canceled {
                canceled += 1;
            }
            if !entry.success {
                errors += 1;
            }
            *request_counts.entry((entry.endpoint_name.clone(), entry.success)).or_default() += 1;
            let lat = latency.entry(entry.endpoint_name.clone()).or_default();
            lat.0 += entry.timings.backend_first_byte_ms + entry.timings.streaming_duration_ms;
            lat.1 += 1;
        }
        drop(requests);

        let mut out = String::with_capacity(1024);

        out.push_str("# HELP olla_window_size Number of requests currently held in the ring-buffer window.\n");
        out.push_str("# TYPE olla_window_size gauge\n");
        out.push_str(&format!("olla_window_size {window_size}\n\n"));

        out.push_str("# HELP olla_requests Request count in the current window, labelled by endpoint and outcome.\n");
        out.push_str("# TYPE olla_requests gauge\n");
        let mut req_rows: Vec<_> = request_counts.iter().collect();
        req_rows.sort_by(|a, b| a.0.cmp(b.0));
        for ((endpoint, success), count) in req_rows {
            out.push_str(&format!(
                "olla_requests{{endpoint=\"{endpoint}\",success=\"{success}\"}} {count}\n"
            ));
        }
        out.push('\n');

        out.push_str("# HELP olla_latency_ms_sum Sum of backend latency (ms) in the current window, grouped by endpoint.\n");
        out.push_str("# TYPE olla_latency_ms_sum gauge\n");
        out.push_str("# HELP olla_latency_ms_count Number of observations for the latency sum above.\n");
        out.push_str("# TYPE olla_latency_ms_count gauge\n");
        let mut lat_rows: Vec<_> = latency.iter().collect();
        lat_rows.sort_by(|a, b| a.0.cmp(b.0));
        for (endpoint, (sum, count)) in lat_rows {
            out.push_str(&format!("olla_latency_ms_sum{{endpoint=\"{endpoint}\"}} {sum}\n"));
            out.push_str(&format!("olla_latency_ms_count{{endpoint=\"{endpoint}\"}} {count}\n"));
        }
        out.push('\n');

        out.push_str("# HELP olla_canceled_total Requests canceled by the client before completion in the current window.\n");
        out.push_str("# TYPE olla_canceled_total gauge\n");
        out.push_str(&format!("olla_canceled_total {canceled}\n\n"));

        out.push_str("# HELP olla_errors_total Requests that returned an error in the current window.\n");
        out.push_str("# TYPE olla_errors_total gauge\n");
        out.push_str(&format!("olla_errors_total {errors}\n"));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(endpoint: &str, model: &str, bytes: u64, success: bool) -> RequestStats {
        let mut s = RequestStats::new(endpoint);
        s.model = Some(model.to_string());
        s.total_bytes = bytes;
        s.success = success;
        s
    }

    #[tokio::test]
    async fn record_and_recent_round_trip() {
        let store = StatsStore::new(10);
        store.record_request(stats("a", "llama3", 100, true));
        store.record_request(stats("a", "llama3", 50, false));
        let recent = store.recent_requests(10).await;
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_when_full() {
        let store = StatsStore::new(2);
        store.record_request(stats("a", "m1", 1, true));
        store.record_request(stats("a", "m2", 1, true));
        store.record_request(stats("a", "m3", 1, true));
        let recent = store.recent_requests(10).await;
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.model.as_deref() != Some("m1")));
    }

    #[tokio::test]
    async fn model_stats_aggregates_requests_and_errors() {
        let store = StatsStore::new(10);
        store.record_request(stats("a", "llama3", 100, true));
        store.record_request(stats("b", "llama3", 200, false));
        let stats = store.model_stats().await;
        let counters = stats.get("llama3").unwrap();
        assert_eq!(counters.requests, 2);
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.total_bytes, 300);
    }

    #[tokio::test]
    async fn render_prometheus_includes_window_size_and_request_counts() {
        let store = StatsStore::new(10);
        store.record_request(stats("a", "llama3", 100, true));
        let text = store.render_prometheus().await;
        assert!(text.contains("olla_window_size 1"));
        assert!(text.contains("olla_requests{endpoint=\"a\",success=\"true\"} 1"));
    }
}
