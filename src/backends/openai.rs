//! OpenAI-compatible liveness probing and model listing.
//!
//! Covers every endpoint type that exposes `GET /v1/models` — OpenAI,
//! OpenAI-compatible, vLLM, LM Studio, llama.cpp. Generic request/response
//! forwarding lives in `super::HttpClient`.

use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;

/// Probe the backend with `GET /v1/models`.
pub async fn health_check(client: &Client, base_url: &str, api_key: Option<&str>) -> anyhow::Result<()> {
    let url = format!("{base_url}/v1/models");
    let mut builder = client.get(&url);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let response = builder.send().await.with_context(|| format!("GET {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "health check returned HTTP {}",
        response.status()
    );
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// List models via `GET /v1/models`.
pub async fn list_models(
    client: &Client,
    base_url: &str,
    api_key: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let url = format!("{base_url}/v1/models");
    let mut builder = client.get(&url);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let response = builder.send().await.with_context(|| format!("GET {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "model listing returned HTTP {}",
        response.status()
    );
    let parsed: ModelsResponse = response.json().await.context("parsing /v1/models response")?;
    Ok(parsed.data.into_iter().map(|m| m.id).collect())
}
