//! Endpoint catalog: the live, health-tracked view of the configured
//! backend fleet.
//!
//! Grounded on `main.rs`'s `config_watcher` background task (poll-interval
//! pattern via `tokio::spawn` + `tokio::time::interval`) and each backend
//! adapter's `health_check()` method, generalized to one probe per
//! canonical endpoint type instead of one per named backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::backends::HttpClient;
use crate::model::{Endpoint, HealthStatus};

/// How many consecutive failed probes demote an endpoint to `unhealthy`.
const FAILURE_THRESHOLD: u32 = 3;

/// `Arc<RwLock<..>>` snapshot of the endpoint fleet. Readers clone the
/// `Vec<Endpoint>` once per request and use that snapshot throughout the
/// pipeline; the health checker and config hot-reload are the only writers.
#[derive(Clone)]
pub struct EndpointCatalog {
    inner: Arc<RwLock<Vec<Endpoint>>>,
    version: Arc<AtomicU64>,
}

impl EndpointCatalog {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(endpoints)),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take a consistent snapshot for one request's pipeline run.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.inner
            .read()
            .expect("endpoint catalog lock poisoned")
            .clone()
    }

    /// Replace the entire endpoint list, e.g. on config hot-reload. Any
    /// endpoint dropped from the new list simply disappears from future
    /// snapshots; in-flight requests already holding an old snapshot are
    /// unaffected.
    pub fn replace(&self, endpoints: Vec<Endpoint>) {
        *self.inner.write().expect("endpoint catalog lock poisoned") = endpoints;
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    fn record_probe(&self, name: &str, success: bool) {
        let mut guard = self.inner.write().expect("endpoint catalog lock poisoned");
        if let Some(endpoint) = guard.iter_mut().find(|e| e.name == name) {
            if success {
                endpoint.consecutive_failures = 0;
                endpoint.health = HealthStatus::Healthy;
            } else {
                endpoint.consecutive_failures += 1;
                if endpoint.consecutive_failures >= FAILURE_THRESHOLD {
                    endpoint.health = HealthStatus::Unhealthy;
                }
            }
        }
    }
}

/// Background task that polls every endpoint on its own interval and
/// updates [`EndpointCatalog`] health state. Runs for the lifetime of the
/// process; spawned once from `main`.
pub async fn health_check_loop(catalog: EndpointCatalog, check_interval: Duration) {
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        ticker.tick().await;
        let snapshot = catalog.snapshot();
        for endpoint in snapshot {
            let client = match HttpClient::new(&endpoint.url, Duration::from_secs(5), None) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %e, "failed to build health-check client");
                    catalog.record_probe(&endpoint.name, false);
                    continue;
                }
            };
            let ok = client.health_check(endpoint.endpoint_type, &endpoint.anthropic_support).await.is_ok();
            if !ok {
                tracing::debug!(endpoint = %endpoint.name, "health probe failed");
            }
            catalog.record_probe(&endpoint.name, ok);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnthropicSupport, EndpointType};

    fn endpoint(name: &str) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            url: "http://example.invalid".into(),
            endpoint_type: EndpointType::Ollama,
            priority: 0,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            anthropic_support: AnthropicSupport::disabled(),
        }
    }

    #[test]
    fn record_probe_success_resets_failure_count() {
        let catalog = EndpointCatalog::new(vec![endpoint("a")]);
        catalog.record_probe("a", false);
        catalog.record_probe("a", false);
        catalog.record_probe("a", true);
        let snap = catalog.snapshot();
        assert_eq!(snap[0].consecutive_failures, 0);
        assert_eq!(snap[0].health, HealthStatus::Healthy);
    }

    #[test]
    fn record_probe_demotes_after_threshold_failures() {
        let catalog = EndpointCatalog::new(vec![endpoint("a")]);
        for _ in 0..FAILURE_THRESHOLD {
            catalog.record_probe("a", false);
        }
        let snap = catalog.snapshot();
        assert_eq!(snap[0].health, HealthStatus::Unhealthy);
    }

    #[test]
    fn record_probe_below_threshold_stays_healthy() {
        let catalog = EndpointCatalog::new(vec![endpoint("a")]);
        catalog.record_probe("a", false);
        let snap = catalog.snapshot();
        assert_eq!(snap[0].health, HealthStatus::Healthy);
    }

    #[test]
    fn replace_bumps_version_and_is_independent_of_old_snapshots() {
        let catalog = EndpointCatalog::new(vec![endpoint("a")]);
        let old_snapshot = catalog.snapshot();
        catalog.replace(vec![endpoint("b")]);
        assert_eq!(old_snapshot[0].name, "a");
        assert_eq!(catalog.snapshot()[0].name, "b");
        assert_eq!(catalog.version(), 1);
    }
}
