//! Claude streaming adapter (C2). Builds the Messages API SSE request and
//! parses `content_block_delta`/`message_delta` events into chunks; the
//! actual HTTP round-trip and retry/deadline handling live in
//! `collab_core::streaming`, shared across every provider.

use collab_core::chat::{FinishReason, StreamChunk, Usage};
use collab_core::client::HttpChatProvider;
use collab_core::error::CollabError;
use collab_core::provider::Provider;
use http::{header::CONTENT_TYPE, Method, Request};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider;

impl HttpChatProvider for ClaudeProvider {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn default_base_url(&self) -> Url {
        Url::parse("https://api.anthropic.com/v1/").expect("static url")
    }

    fn build_request(
        &self,
        base_url: &Url,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Request<Vec<u8>>, CollabError> {
        let body = json!({
            "model": model,
            "max_tokens": Provider::Claude.output_token_ceiling(),
            "system": system_prompt,
            "stream": true,
            "messages": [
                { "role": "user", "content": [{ "type": "text", "text": user_prompt }] }
            ],
        });
        let url = base_url.join("messages")?;
        Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .body(serde_json::to_vec(&body)?)
            .map_err(|e| CollabError::BadRequest(e.to_string()))
    }

    /// Claude has no single "blocked" response shape the way Gemini does; a
    /// safety refusal instead surfaces as a `stop_reason` of `"refusal"` on an
    /// otherwise normal `message_delta` event, which this adapter turns into
    /// an explicit error rather than silently returning empty text.
    fn parse_stream_chunk(&self, event: &[u8]) -> Result<Vec<StreamChunk>, CollabError> {
        let text = std::str::from_utf8(event).map_err(|e| CollabError::ResponseFormatError {
            message: e.to_string(),
            raw_response: String::new(),
        })?;

        let mut chunks = Vec::new();
        for line in text.lines() {
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: AnthropicStreamEvent = serde_json::from_str(data)?;
            match event.event_type.as_str() {
                "message_start" => {
                    if let Some(usage) = event.message.and_then(|m| m.usage) {
                        chunks.push(StreamChunk::Usage(Usage {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        }));
                    }
                }
                "content_block_delta" => {
                    if let Some(text) = event.delta.and_then(|d| d.text) {
                        chunks.push(StreamChunk::Text(text));
                    }
                }
                "message_delta" => {
                    if let Some(usage) = event.usage {
                        chunks.push(StreamChunk::Usage(Usage {
                            input_tokens: 0,
                            output_tokens: usage.output_tokens,
                        }));
                    }
                    if let Some(stop_reason) = event.delta.and_then(|d| d.stop_reason) {
                        if stop_reason == "refusal" {
                            return Err(CollabError::ResponseFormatError {
                                message: "Claude declined to respond (safety refusal)".to_string(),
                                raw_response: data.to_string(),
                            });
                        }
                        chunks.push(StreamChunk::Done {
                            finish_reason: match stop_reason.as_str() {
                                "max_tokens" => FinishReason::Length,
                                _ => FinishReason::Stop,
                            },
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(chunks)
    }
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    message: Option<AnthropicMessageStart>,
    delta: Option<AnthropicDelta>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicMessageStart {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_becomes_text_chunk() {
        let adapter = ClaudeProvider;
        let event = b"data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}\n\n";
        let chunks = adapter.parse_stream_chunk(event).unwrap();
        assert!(matches!(&chunks[0], StreamChunk::Text(t) if t == "hi"));
    }

    #[test]
    fn stop_reason_maps_to_done() {
        let adapter = ClaudeProvider;
        let event = b"data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n";
        let chunks = adapter.parse_stream_chunk(event).unwrap();
        assert!(matches!(chunks[0], StreamChunk::Done { finish_reason: FinishReason::Stop }));
    }

    #[test]
    fn refusal_stop_reason_is_an_error() {
        let adapter = ClaudeProvider;
        let event = b"data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"refusal\"}}\n\n";
        assert!(adapter.parse_stream_chunk(event).is_err());
    }

    #[test]
    fn default_base_url_is_messages_root() {
        let adapter = ClaudeProvider;
        assert_eq!(adapter.default_base_url().as_str(), "https://api.anthropic.com/v1/");
    }
}
