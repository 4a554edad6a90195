//! Configuration types for olla.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. The same file is polled for
//! mtime changes and hot-reloaded without a restart (see `main::config_watcher`).
//!
//! # Example
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//!
//! [[endpoints]]
//! name = "local-ollama"
//! url  = "http://localhost:11434"
//! type = "ollama"
//!
//! [aliases]
//! "gpt-4" = ["llama3.1:70b", "llama3.1:8b"]
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model::{AnthropicSupport, Endpoint, EndpointType, HealthStatus};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: GatewayConfig,

    #[serde(default)]
    pub profiles: HashMap<String, ProfileSettings>,

    #[serde(default, rename = "endpoints")]
    pub endpoints: Vec<EndpointConfig>,

    /// `logical_name -> [candidate_native_name, ...]`.
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            anyhow::ensure!(
                seen.insert(endpoint.name.as_str()),
                "duplicate endpoint name `{}`",
                endpoint.name
            );
            anyhow::ensure!(
                EndpointType::parse(&endpoint.endpoint_type).is_some(),
                "endpoint `{}` has unknown type `{}`",
                endpoint.name,
                endpoint.endpoint_type
            );
            anyhow::ensure!(
                !endpoint.url.is_empty(),
                "endpoint `{}` has an empty url",
                endpoint.name
            );
        }

        for (logical, candidates) in &self.aliases {
            anyhow::ensure!(
                !candidates.is_empty(),
                "alias `{}` has no candidate native names",
                logical
            );
        }

        if let Some(rpm) = self.server.rate_limits.rpm {
            anyhow::ensure!(rpm > 0, "server.rate_limits.rpm must be positive if set");
        }

        Ok(())
    }

    /// Materialize the configured `[[endpoints]]` into runtime [`Endpoint`]
    /// values, applying the per-type `anthropic_support` default from
    /// `[profiles.<type>]` when an endpoint doesn't override it.
    pub fn build_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|e| {
                let endpoint_type = EndpointType::parse(&e.endpoint_type)
                    .expect("validated at load time");
                let profile_default = self.profiles.get(&e.endpoint_type);
                let anthropic_support = if e.anthropic_support_enabled.is_some()
                    || e.messages_path.is_some()
                {
                    AnthropicSupport {
                        enabled: e.anthropic_support_enabled.unwrap_or(false),
                        messages_path: e.messages_path.clone(),
                    }
                } else if let Some(p) = profile_default {
                    p.anthropic_support.clone()
                } else {
                    AnthropicSupport::disabled()
                };

                Endpoint {
                    name: e.name.clone(),
                    url: e.url.trim_end_matches('/').to_string(),
                    endpoint_type,
                    priority: e.priority,
                    health: HealthStatus::Warming,
                    consecutive_failures: 0,
                    anthropic_support,
                }
            })
            .collect()
    }

    /// Resolve an endpoint's configured API key from its environment
    /// variable, if any.
    pub fn api_key_for(&self, endpoint_name: &str) -> Option<String> {
        self.endpoints
            .iter()
            .find(|e| e.name == endpoint_name)
            .and_then(|e| e.api_key_env.as_deref())
            .and_then(|var| std::env::var(var).ok())
    }

    pub fn endpoint_config(&self, endpoint_name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == endpoint_name)
    }
}

/// Server-wide settings: listener, timeouts, security chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,

    #[serde(default = "defaults::read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "defaults::write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "defaults::idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Byte budget the body inspector will buffer to peek at a request body.
    #[serde(default = "defaults::request_body_peek_bytes")]
    pub request_body_peek_bytes: usize,

    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Environment variable holding the bearer token required on
    /// `/internal/*`. Unset disables admin authentication.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::listen_addr(),
            read_timeout_ms: defaults::read_timeout_ms(),
            write_timeout_ms: defaults::write_timeout_ms(),
            idle_timeout_ms: defaults::idle_timeout_ms(),
            request_body_peek_bytes: defaults::request_body_peek_bytes(),
            traffic_log_capacity: defaults::traffic_log_capacity(),
            admin_token_env: None,
            log_level: None,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

/// Per-IP token-bucket rate limiting.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per minute per client IP. Unset or zero disables limiting.
    #[serde(default)]
    pub rpm: Option<u32>,

    /// Honour `X-Forwarded-For` when the peer address is within
    /// `trusted_proxy_cidrs`.
    #[serde(default)]
    pub trust_proxy_headers: bool,

    #[serde(default)]
    pub trusted_proxy_cidrs: Vec<String>,
}

/// Per-endpoint-type native dialect defaults, configured under
/// `[profiles.<type>]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileSettings {
    #[serde(default)]
    pub messages_path: Option<String>,
    #[serde(default)]
    pub anthropic_support: AnthropicSupport,
}

/// A `[[endpoints]]` entry as read from TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub endpoint_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "defaults::check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "defaults::check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default)]
    pub messages_path: Option<String>,
    #[serde(default)]
    pub anthropic_support_enabled: Option<bool>,
}

mod defaults {
    pub fn listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
    pub fn read_timeout_ms() -> u64 {
        10_000
    }
    pub fn write_timeout_ms() -> u64 {
        30_000
    }
    pub fn idle_timeout_ms() -> u64 {
        60_000
    }
    pub fn request_body_peek_bytes() -> usize {
        65_536
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn timeout_ms() -> u64 {
        30_000
    }
    pub fn check_interval_secs() -> u64 {
        15
    }
    pub fn check_timeout_ms() -> u64 {
        2_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [server]
            listen_addr = "127.0.0.1:9999"

            [[endpoints]]
            name = "local-ollama"
            url  = "http://localhost:11434"
            type = "ollama"

            [[endpoints]]
            name = "local-vllm"
            url  = "http://localhost:8000"
            type = "vllm"
            priority = 10

            [aliases]
            "gpt-4" = ["llama3.1:70b", "llama3.1:8b"]
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn parse_example_config() {
        let content = include_str!("../config.example.toml");
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
    }

    #[test]
    fn validation_rejects_duplicate_endpoint_names() {
        let mut config = minimal_config();
        let dup = config.endpoints[0].clone();
        config.endpoints.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_endpoint_type() {
        let mut config = minimal_config();
        config.endpoints[0].endpoint_type = "not-a-type".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_alias_with_no_candidates() {
        let mut config = minimal_config();
        config.aliases.insert("empty".into(), vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn build_endpoints_normalizes_type_and_trims_trailing_slash() {
        let mut config = minimal_config();
        config.endpoints[0].url = "http://localhost:11434/".to_string();
        let endpoints = config.build_endpoints();
        assert_eq!(endpoints[0].url, "http://localhost:11434");
        assert_eq!(endpoints[0].endpoint_type, EndpointType::Ollama);
        assert_eq!(endpoints[0].health, HealthStatus::Warming);
    }

    #[test]
    fn build_endpoints_applies_profile_anthropic_default() {
        let mut config = minimal_config();
        config.profiles.insert(
            "vllm".into(),
            ProfileSettings {
                messages_path: None,
                anthropic_support: AnthropicSupport {
                    enabled: true,
                    messages_path: Some("/v1/messages".into()),
                },
            },
        );
        let endpoints = config.build_endpoints();
        let vllm = endpoints.iter().find(|e| e.name == "local-vllm").unwrap();
        assert!(vllm.anthropic_support.enabled);
        assert_eq!(vllm.anthropic_support.path(), "/v1/messages");
    }

    #[test]
    fn build_endpoints_per_endpoint_override_wins_over_profile_default() {
        let mut config = minimal_config();
        config.profiles.insert(
            "ollama".into(),
            ProfileSettings {
                messages_path: None,
                anthropic_support: AnthropicSupport {
                    enabled: true,
                    messages_path: None,
                },
            },
        );
        config.endpoints[0].anthropic_support_enabled = Some(false);
        let endpoints = config.build_endpoints();
        assert!(!endpoints[0].anthropic_support.enabled);
    }

    #[test]
    fn gateway_defaults_are_applied_when_section_is_absent() {
        let config: Config = toml::from_str(
            r#"
            [[endpoints]]
            name = "x"
            url = "http://x"
            type = "openai"
            "#,
        )
        .expect("should parse");
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_body_peek_bytes, 65_536);
    }

    #[test]
    fn validation_rejects_zero_rpm() {
        let mut config = minimal_config();
        config.server.rate_limits.rpm = Some(0);
        assert!(config.validate().is_err());
    }
}
