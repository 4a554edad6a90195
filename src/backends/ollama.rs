//! Ollama-specific probes: root-page liveness and native `/api/tags` model
//! listing.
//!
//! Generic request/response forwarding lives in `super::HttpClient`; this
//! module only covers the two operations where Ollama's protocol differs
//! from the rest of the OpenAI-compatible family.

use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;

/// Probe Ollama's root endpoint (`GET /`) — returns `"Ollama is running"` on success.
pub async fn health_check(client: &Client, base_url: &str) -> anyhow::Result<()> {
    let url = format!("{base_url}/");
    let response = client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "Ollama health check returned HTTP {}",
        response.status()
    );
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// List models via Ollama's native `/api/tags` endpoint.
pub async fn list_models(client: &Client, base_url: &str) -> anyhow::Result<Vec<String>> {
    let url = format!("{base_url}/api/tags");
    let response = client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
    anyhow::ensure!(
        response.status().is_success(),
        "Ollama model listing returned HTTP {}",
        response.status()
    );
    let parsed: TagsResponse = response
        .json()
        .await
        .context("parsing Ollama /api/tags response")?;
    Ok(parsed.models.into_iter().map(|m| m.name).collect())
}
