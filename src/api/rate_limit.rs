//! Token-bucket rate limiting middleware for `/internal/*`.
//!
//! One bucket per client IP. Tokens refill steadily at `rpm / 60` tokens/second
//! and the burst cap is `ceil(rpm / 2)` — enough to absorb short spikes without
//! allowing runaway bursts. Disabled when `server.rate_limits.rpm` is absent.
//! `/internal/health` is always exempt, same as [`crate::api::auth`].
//!
//! When a request is rejected the response includes:
//! - `429 Too Many Requests`
//! - `Retry-After: <seconds>` — exact wait before the bucket has a token again
//! - `X-RateLimit-Limit: <rpm>` — configured limit
//! - `X-RateLimit-Policy: <N>;w=60` — standard hint: N requests per 60-second window

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::router::RouterState;

const HEALTH_PATH: &str = "/internal/health";

/// Per-IP token bucket state.
#[derive(Debug, Clone)]
struct Bucket {
    last_refill: Instant,
    tokens: f64,
}

/// Shared rate limiter: one token bucket per client IP address.
pub struct RateLimiter {
    pub rpm: u32,
    fill_rate: f64,
    capacity: f64,
    trust_proxy_headers: bool,
    trusted_proxy_cidrs: Vec<String>,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new(rpm: u32, trust_proxy_headers: bool, trusted_proxy_cidrs: Vec<String>) -> Self {
        let capacity = ((rpm + 1) / 2) as f64; // ceil(rpm / 2)
        let fill_rate = rpm as f64 / 60.0;
        Self {
            rpm,
            fill_rate,
            capacity,
            trust_proxy_headers,
            trusted_proxy_cidrs,
            buckets: DashMap::new(),
        }
    }

    /// Resolve the bucket key for `req`: the `X-Forwarded-For` client address
    /// when the peer is within a trusted CIDR and header trust is enabled,
    /// otherwise the raw TCP peer address.
    fn bucket_key(&self, req: &Request) -> IpAddr {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        if !self.trust_proxy_headers || !self.trusted_proxy_cidrs.iter().any(|c| ip_in_cidr(peer, c)) {
            return peer;
        }

        req.headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .unwrap_or(peer)
    }

    /// Attempt to consume one token for `ip`.
    pub fn check(&self, ip: IpAddr) -> Result<(), f64> {
        let now = Instant::now();

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket {
            last_refill: now,
            tokens: self.capacity,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let new_tokens = (bucket.tokens + elapsed * self.fill_rate).min(self.capacity);

        if new_tokens < 1.0 {
            let retry_after = (1.0 - new_tokens) / self.fill_rate;
            return Err(retry_after.ceil());
        }

        bucket.last_refill = now;
        bucket.tokens = new_tokens - 1.0;
        Ok(())
    }
}

/// Minimal IPv4/IPv6 CIDR containment check. No new crate: the pack's
/// teacher dependency tree has no lightweight CIDR library, so this is
/// plain `IpAddr` bit arithmetic.
fn ip_in_cidr(ip: IpAddr, cidr: &str) -> bool {
    let mut parts = cidr.splitn(2, '/');
    let Some(addr) = parts.next() else { return false };
    let Ok(net) = addr.parse::<IpAddr>() else { return false };
    let prefix_len: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(match net {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    });

    match (ip, net) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let bits = prefix_len.min(32);
            let mask: u32 = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let bits = prefix_len.min(128);
            let mask: u128 = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

/// Axum middleware that enforces per-IP rate limits. No-ops when
/// `state.rate_limiter` is `None` or the path is `/internal/health`.
pub async fn rate_limit_middleware(State(state): State<Arc<RouterState>>, req: Request, next: Next) -> Response {
    if req.uri().path() == HEALTH_PATH {
        return next.run(req).await;
    }

    if let Some(limiter) = &state.rate_limiter {
        let ip = limiter.bucket_key(&req);

        if let Err(retry_after) = limiter.check(ip) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("retry-after", retry_after.to_string()),
                    ("x-ratelimit-limit", limiter.rpm.to_string()),
                    ("x-ratelimit-policy", format!("{};w=60", limiter.rpm)),
                    ("content-type", "text/plain".into()),
                ],
                "Rate limit exceeded. Please retry after the indicated delay.",
            )
                .into_response();
        }
    }

    next.run(req).await
}
