//! Gemini streaming adapter (C2). Gemini has no `system` role in its
//! `contents` array, so the system prompt is folded in as a synthetic
//! user turn followed by a synthetic model acknowledgment, ahead of the
//! real user turn. Non-text response parts (function calls) are dropped
//! rather than surfaced, per the adapter contract.

use collab_core::chat::{FinishReason, StreamChunk, Usage};
use collab_core::client::HttpChatProvider;
use collab_core::error::CollabError;
use collab_core::provider::Provider;
use http::{header::CONTENT_TYPE, Method, Request};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const SAFETY_FALLBACK_TEXT: &str = "[Gemini withheld its response due to safety filtering]";

pub struct GeminiProvider;

impl HttpChatProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn default_base_url(&self) -> Url {
        Url::parse("https://generativelanguage.googleapis.com/v1beta/models/").expect("static url")
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
            "contents": [
                { "role": "user", "parts": [{ "text": system_prompt }] },
                { "role": "model", "parts": [{ "text": "Understood." }] },
                { "role": "user", "parts": [{ "text": user_prompt }] },
            ],
            "generationConfig": {
                "maxOutputTokens": Provider::Gemini.output_token_ceiling(),
            },
        });

        let mut url = base_url.join(&format!("{model}:streamGenerateContent"))?;
        url.query_pairs_mut().append_pair("alt", "sse").append_pair("key", api_key);

        Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .map_err(|e| CollabError::BadRequest(e.to_string()))
    }

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

            let response: GeminiStreamResponse = serde_json::from_str(data)?;
            let Some(candidate) = response.candidates.into_iter().next() else {
                continue;
            };

            let mut wrote_text = false;
            for part in candidate.content.parts {
                if let Some(text) = part.text {
                    chunks.push(StreamChunk::Text(text));
                    wrote_text = true;
                }
            }

            if let Some(usage) = response.usage_metadata {
                chunks.push(StreamChunk::Usage(Usage {
                    input_tokens: usage.prompt_token_count,
                    output_tokens: usage.candidates_token_count,
                }));
            }

            if let Some(finish_reason) = candidate.finish_reason {
                if finish_reason == "SAFETY" && !wrote_text {
                    chunks.push(StreamChunk::Text(SAFETY_FALLBACK_TEXT.to_string()));
                }
                chunks.push(StreamChunk::Done {
                    finish_reason: match finish_reason.as_str() {
                        "MAX_TOKENS" => FinishReason::Length,
                        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
                        _ => FinishReason::Stop,
                    },
                });
            }
        }
        Ok(chunks)
    }
}

#[derive(Deserialize)]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}
