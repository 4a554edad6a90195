//! Generic HTTP client for forwarding requests to a backend endpoint.
//!
//! Where the teacher kept one adapter per `Provider` (OpenAI/Ollama/Anthropic),
//! each hard-coding a single `/v1/chat/completions`-shaped call, the proxy
//! forwards arbitrary paths transparently. [`HttpClient`] is the single
//! surface `dispatch` depends on; per-type differences are limited to health
//! probing and model listing, delegated to the small `ollama`/`openai`/
//! `anthropic` helper modules (kept as separate files, the same layout the
//! teacher used for its per-provider adapters).

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::{from_anthropic, from_anthropic_request, to_anthropic, to_anthropic_response};

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{header::HeaderMap, Method, StatusCode};

use crate::model::{AnthropicSupport, Dialect, EndpointType};

/// A boxed stream of response body chunks, forwarded onward to the client
/// unbuffered.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// A fully-buffered backend response, used for non-streaming passthrough
/// and for translation (where the body must be parsed and rewritten
/// anyway).
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// How credentials are attached to an outbound request. Ollama is keyless
/// by convention; everything else is assumed OpenAI-style bearer auth
/// unless the request is actually Anthropic-dialect, in which case the
/// endpoint expects Anthropic's own header pair.
enum AuthStyle {
    None,
    Bearer,
    AnthropicHeaders,
}

fn auth_style(endpoint_type: EndpointType, dialect: Dialect) -> AuthStyle {
    if dialect == Dialect::Anthropic {
        return AuthStyle::AnthropicHeaders;
    }
    match endpoint_type {
        EndpointType::Ollama => AuthStyle::None,
        _ => AuthStyle::Bearer,
    }
}

/// One reqwest client pair bound to a single endpoint's base URL, mirroring
/// the teacher's per-adapter `client`/`stream_client` split: the buffered
/// client has a request timeout, the streaming client does not (a
/// slow-to-finish SSE stream is not a timeout failure).
pub struct HttpClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let stream_client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(
        &self,
        mut builder: reqwest::RequestBuilder,
        style: AuthStyle,
    ) -> reqwest::RequestBuilder {
        match style {
            AuthStyle::None => builder,
            AuthStyle::Bearer => {
                if let Some(key) = &self.api_key {
                    builder = builder.bearer_auth(key);
                }
                builder
            }
            AuthStyle::AnthropicHeaders => {
                if let Some(key) = &self.api_key {
                    builder = builder.header("x-api-key", key);
                }
                builder.header("anthropic-version", "2023-06-01")
            }
        }
    }

    /// Forward a request and buffer the full response. Used for
    /// non-streaming passthrough and for any request a translator must
    /// inspect and rewrite.
    pub async fn forward(
        &self,
        method: Method,
        endpoint_type: EndpointType,
        path: &str,
        body: Option<Bytes>,
        dialect: Dialect,
    ) -> anyhow::Result<ForwardedResponse> {
        let mut builder = self.client.request(method, self.url(path));
        builder = self.apply_auth(builder, auth_style(endpoint_type, dialect));
        if let Some(body) = body {
            builder = builder.header("content-type", "application/json").body(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(ForwardedResponse { status, headers, body })
    }

    /// Forward a request and stream the response body through unbuffered,
    /// chunk by chunk, for server-sent-events style responses.
    pub async fn forward_stream(
        &self,
        method: Method,
        endpoint_type: EndpointType,
        path: &str,
        body: Option<Bytes>,
        dialect: Dialect,
    ) -> anyhow::Result<(StatusCode, HeaderMap, SseStream)> {
        let mut builder = self.stream_client.request(method, self.url(path));
        builder = self.apply_auth(builder, auth_style(endpoint_type, dialect));
        if let Some(body) = body {
            builder = builder.header("content-type", "application/json").body(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok((status, headers, Box::pin(stream)))
    }

    /// Probe liveness the way appropriate for `endpoint_type`: Ollama's
    /// root page, or an OpenAI-compatible model listing, falling back to a
    /// minimal Anthropic Messages probe when the listing call fails but the
    /// endpoint declares Anthropic support.
    pub async fn health_check(
        &self,
        endpoint_type: EndpointType,
        anthropic: &AnthropicSupport,
    ) -> anyhow::Result<()> {
        match endpoint_type {
            EndpointType::Ollama => ollama::health_check(&self.client, &self.base_url).await,
            _ => {
                match openai::health_check(&self.client, &self.base_url, self.api_key.as_deref()).await
                {
                    Ok(()) => Ok(()),
                    Err(e) if anthropic.enabled => {
                        anthropic::health_check(
                            &self.client,
                            &self.base_url,
                            anthropic.path(),
                            self.api_key.as_deref(),
                        )
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// List the native model names currently served by this endpoint.
    pub async fn list_models(&self, endpoint_type: EndpointType) -> anyhow::Result<Vec<String>> {
        match endpoint_type {
            EndpointType::Ollama => ollama::list_models(&self.client, &self.base_url).await,
            _ => openai::list_models(&self.client, &self.base_url, self.api_key.as_deref()).await,
        }
    }
}
