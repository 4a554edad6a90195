//! Translators: pluggable dialect converters the router treats as a black
//! box (§4.4).
//!
//! Grounded on `backends/anthropic.rs`'s field-mapping table. Olla's
//! Anthropic route (`/olla/anthropic/v1/messages`) puts the Anthropic
//! dialect on the *client* side: a client speaking Anthropic Messages hits
//! a non-native (OpenAI-speaking) endpoint, so the request must go
//! Anthropic -> OpenAI before it's forwarded and the response OpenAI ->
//! Anthropic before it's returned. Lifted behind a named [`Translator`]
//! trait instead of being buried inside one backend's HTTP adapter — the
//! spec calls for translation to be a swappable interface, not a variant
//! welded to a specific backend.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::backends::{from_anthropic_request, to_anthropic_response, SseStream};
use crate::model::AnthropicSupport;

/// A named, independently-testable dialect converter.
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this translator's dialect also has native-speaking
    /// endpoints that could serve the request unmodified.
    fn supports_passthrough(&self) -> bool {
        true
    }

    /// The native path on an endpoint that declares support for this
    /// translator's dialect.
    fn native_path(&self, anthropic: &AnthropicSupport) -> String {
        anthropic.path().to_string()
    }

    /// The path on a non-native endpoint that the translated request
    /// should be sent to.
    fn translated_path(&self) -> &'static str;

    /// Convert a client-dialect request body into the target endpoint's
    /// dialect.
    fn transform_request(&self, body: &[u8]) -> anyhow::Result<Bytes>;

    /// Convert a buffered backend response back into the client's dialect.
    fn transform_response(&self, body: &[u8]) -> anyhow::Result<Bytes>;

    /// Convert a streaming backend response back into the client's
    /// dialect, chunk by chunk.
    fn transform_streaming_response(&self, upstream: SseStream) -> SseStream;
}

/// Anthropic Messages <-> OpenAI chat-completions translator, for a client
/// speaking Anthropic against an endpoint that only speaks OpenAI.
pub struct AnthropicTranslator;

impl Translator for AnthropicTranslator {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn translated_path(&self) -> &'static str {
        "/v1/chat/completions"
    }

    fn transform_request(&self, body: &[u8]) -> anyhow::Result<Bytes> {
        let anthropic: Value = serde_json::from_slice(body)?;
        let openai = from_anthropic_request(anthropic)?;
        Ok(Bytes::from(serde_json::to_vec(&openai)?))
    }

    fn transform_response(&self, body: &[u8]) -> anyhow::Result<Bytes> {
        let openai: Value = serde_json::from_slice(body)?;
        let anthropic = to_anthropic_response(openai)?;
        Ok(Bytes::from(serde_json::to_vec(&anthropic)?))
    }

    fn transform_streaming_response(&self, upstream: SseStream) -> SseStream {
        Box::pin(stream::unfold((upstream, BytesMut::new()), |(mut upstream, mut buf)| async move {
            loop {
                if let Some(event) = take_one_sse_event(&mut buf) {
                    if let Some(translated) = translate_openai_event(&event) {
                        return Some((Ok(translated), (upstream, buf)));
                    }
                    continue;
                }

                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        buf.extend_from_slice(&chunk);
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(e), (upstream, buf))),
                    None => {
                        if buf.is_empty() {
                            return None;
                        }
                        let remainder = buf.split();
                        return translate_openai_event(&remainder).map(|out| (Ok(out), (upstream, buf)));
                    }
                }
            }
        }))
    }
}

/// Pull one `\n\n`-terminated SSE frame out of `buf`, if a complete one is
/// buffered.
fn take_one_sse_event(buf: &mut BytesMut) -> Option<Bytes> {
    let haystack = buf.as_ref();
    let pos = haystack.windows(2).position(|w| w == b"\n\n")?;
    let frame = buf.split_to(pos + 2);
    buf.advance(0);
    Some(frame.freeze())
}

/// Translate one OpenAI chat-completion-chunk SSE frame into its Anthropic
/// Messages streaming-event equivalent. Returns `None` for frames with no
/// Anthropic counterpart worth emitting (a chunk with neither delta content
/// nor a finish reason).
fn translate_openai_event(frame: &[u8]) -> Option<Bytes> {
    let text = std::str::from_utf8(frame).ok()?;
    let data_line = text.lines().find(|l| l.starts_with("data:"))?;
    let payload = data_line.trim_start_matches("data:").trim();

    if payload == "[DONE]" {
        let event = serde_json::json!({ "type": "message_stop" });
        return Some(Bytes::from(format!("event: message_stop\ndata: {event}\n\n")));
    }

    let chunk: Value = serde_json::from_str(payload).ok()?;
    let choice = chunk.pointer("/choices/0")?;

    if let Some(delta_text) = choice.pointer("/delta/content").and_then(Value::as_str) {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": delta_text },
        });
        return Some(Bytes::from(format!("event: content_block_delta\ndata: {event}\n\n")));
    }

    if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
        let stop_reason = match finish_reason {
            "stop" => "end_turn",
            "length" => "max_tokens",
            other => other,
        };
        let event = serde_json::json!({
            "type": "message_delta",
            "delta": { "stop_reason": stop_reason },
        });
        return Some(Bytes::from(format!("event: message_delta\ndata: {event}\n\n")));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream as fstream;

    #[test]
    fn transform_request_produces_openai_shaped_body() {
        let translator = AnthropicTranslator;
        let input = br#"{"model":"llama3","max_tokens":256,"messages":[{"role":"user","content":"hi"}]}"#;
        let out = translator.transform_request(input).unwrap();
        let json: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn transform_response_produces_anthropic_shaped_body() {
        let translator = AnthropicTranslator;
        let input = br#"{
            "id": "chatcmpl-1",
            "model": "llama3",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }"#;
        let out = translator.transform_response(input).unwrap();
        let json: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["content"][0]["text"], "hi there");
        assert_eq!(json["stop_reason"], "end_turn");
    }

    #[test]
    fn translated_path_targets_chat_completions() {
        assert_eq!(AnthropicTranslator.translated_path(), "/v1/chat/completions");
    }

    #[test]
    fn translate_openai_event_maps_delta_content_to_content_block_delta() {
        let frame = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n";
        let out = translate_openai_event(frame).unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("content_block_delta"));
        assert!(text.contains("\"text\":\"Hi\""));
    }

    #[test]
    fn translate_openai_event_maps_finish_reason_to_message_delta() {
        let frame = b"data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";
        let out = translate_openai_event(frame).unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("message_delta"));
        assert!(text.contains("end_turn"));
    }

    #[test]
    fn translate_openai_event_maps_done_to_message_stop() {
        let frame = b"data: [DONE]\n\n";
        let out = translate_openai_event(frame).unwrap();
        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.contains("message_stop"));
    }

    #[test]
    fn translate_openai_event_drops_empty_delta_with_no_finish_reason() {
        let frame = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n";
        assert!(translate_openai_event(frame).is_none());
    }

    #[tokio::test]
    async fn transform_streaming_response_translates_a_full_event_sequence() {
        let translator = AnthropicTranslator;
        let raw = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let upstream: SseStream = Box::pin(fstream::once(async move { Ok(Bytes::from(raw)) }));
        let translated = translator.transform_streaming_response(upstream);
        let chunks: Vec<_> = translated.collect().await;
        assert_eq!(chunks.len(), 3);
        assert!(std::str::from_utf8(chunks[0].as_ref().unwrap()).unwrap().contains("content_block_delta"));
        assert!(std::str::from_utf8(chunks[1].as_ref().unwrap()).unwrap().contains("message_delta"));
        assert!(std::str::from_utf8(chunks[2].as_ref().unwrap()).unwrap().contains("message_stop"));
    }
}
