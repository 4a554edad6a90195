//! Anthropic Messages health probe and OpenAI<->Anthropic body translation.
//!
//! Two independent pairs, one per direction an endpoint can sit relative to
//! a client: `to_anthropic`/`from_anthropic` serve an OpenAI-speaking
//! client against an Anthropic-native endpoint; `from_anthropic_request`/
//! `to_anthropic_response` serve `translate::AnthropicTranslator`'s actual
//! case, an Anthropic-speaking client against an OpenAI-only endpoint. Kept
//! here, alongside the health-check probe, because all of it exists only to
//! talk about the Anthropic wire format specifically.
//!
//! # Protocol differences handled here
//!
//! | Concern | OpenAI | Anthropic |
//! |---|---|---|
//! | System prompt | First message with `role: "system"` | Top-level `system` field |
//! | Max tokens | Optional (`max_tokens`) | **Required** (`max_tokens`) |
//! | Finish reasons | `"stop"`, `"length"` | `"end_turn"`, `"max_tokens"` |
//! | Response shape | `choices[].message.content` | `content[].text` |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |

use anyhow::Context;
use reqwest::Client;
use serde_json::{json, Value};

/// Default max_tokens when the caller omits it. Required by Anthropic; sensible
/// ceiling for most conversational use-cases.
const DEFAULT_MAX_TOKENS: u64 = 8_192;

/// Probe an Anthropic-speaking endpoint with a minimal 1-token request.
/// Anthropic has no `/v1/models` endpoint, so a cheap inference call is the
/// only reliable way to verify auth + connectivity.
pub async fn health_check(
    client: &Client,
    base_url: &str,
    messages_path: &str,
    api_key: Option<&str>,
) -> anyhow::Result<()> {
    let probe = json!({
        "model": "claude-haiku-4-5-20251001",
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "ping" }],
    });

    let url = format!("{base_url}{messages_path}");
    let mut builder = client
        .post(&url)
        .header("anthropic-version", "2023-06-01")
        .json(&probe);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    let response = builder.send().await.with_context(|| format!("health check POST {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "Anthropic health check returned HTTP {}",
        response.status()
    );
    Ok(())
}

/// Convert an OpenAI chat completions request to the Anthropic Messages format.
pub fn to_anthropic(request: Value) -> anyhow::Result<Value> {
    let model = request["model"]
        .as_str()
        .context("`model` field is required")?
        .to_string();

    let max_tokens = request["max_tokens"].as_u64().unwrap_or(DEFAULT_MAX_TOKENS);

    let raw_messages = request["messages"]
        .as_array()
        .context("`messages` array is required")?;

    // Anthropic treats system content as a top-level field, not a message role.
    // If multiple system messages are present, concatenate them.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        if msg["role"].as_str() == Some("system") {
            if let Some(content) = msg["content"].as_str() {
                system_parts.push(content);
            }
        } else {
            messages.push(msg.clone());
        }
    }

    let mut req = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });

    if !system_parts.is_empty() {
        req["system"] = Value::String(system_parts.join("\n\n"));
    }

    if let Some(temp) = request["temperature"].as_f64() {
        req["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop") {
        req["stop_sequences"] = stop.clone();
    }
    if let Some(stream) = request.get("stream") {
        req["stream"] = stream.clone();
    }

    Ok(req)
}

/// Convert an Anthropic Messages API response to the OpenAI chat completions schema.
pub fn from_anthropic(resp: Value) -> anyhow::Result<Value> {
    // Anthropic responses contain a `content` array of typed blocks.
    // Extract the first text block; non-text blocks (tool_use, etc.) are
    // ignored until streaming/tool-call support is added.
    let text = resp["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .context("no text block in Anthropic response `content` array")?
        .to_string();

    let model = resp["model"].as_str().unwrap_or("unknown");

    let finish_reason = match resp["stop_reason"].as_str().unwrap_or("stop") {
        "end_turn" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = resp["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": resp["id"],
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

/// Convert an Anthropic Messages API request to the OpenAI chat completions
/// format — the direction an Anthropic-speaking client needs when the
/// selected endpoint only speaks OpenAI.
pub fn from_anthropic_request(request: Value) -> anyhow::Result<Value> {
    let model = request["model"].as_str().context("`model` field is required")?.to_string();

    let raw_messages = request["messages"].as_array().context("`messages` array is required")?;
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len() + 1);

    // Anthropic's top-level `system` field becomes a leading `system` message.
    if let Some(system) = request["system"].as_str() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(raw_messages.iter().cloned());

    let mut req = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(max_tokens) = request["max_tokens"].as_u64() {
        req["max_tokens"] = json!(max_tokens);
    }
    if let Some(temp) = request["temperature"].as_f64() {
        req["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop_sequences") {
        req["stop"] = stop.clone();
    }
    if let Some(stream) = request.get("stream") {
        req["stream"] = stream.clone();
    }

    Ok(req)
}

/// Convert an OpenAI chat completions response to the Anthropic Messages
/// schema — the direction an Anthropic-speaking client expects back from an
/// OpenAI-only endpoint.
pub fn to_anthropic_response(resp: Value) -> anyhow::Result<Value> {
    let text = resp["choices"][0]["message"]["content"]
        .as_str()
        .context("no `choices[0].message.content` in OpenAI response")?
        .to_string();

    let model = resp["model"].as_str().unwrap_or("unknown");

    let stop_reason = match resp["choices"][0]["finish_reason"].as_str().unwrap_or("stop") {
        "stop" => "end_turn",
        "length" => "max_tokens",
        other => other,
    };

    let prompt_tokens = resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = resp["usage"]["completion_tokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": resp["id"],
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{ "type": "text", "text": text }],
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": prompt_tokens,
            "output_tokens": completion_tokens,
        },
    }))
}
