//! Shared chat-completions-shaped streaming adapter (C2). ChatGPT, Grok,
//! DeepSeek and Llama all speak the same `chat/completions` wire format, so
//! one adapter parameterized by [`Provider`] covers all four instead of
//! reimplementing identical request/response shapes per vendor.

use collab_core::chat::{FinishReason, StreamChunk, Usage};
use collab_core::client::HttpChatProvider;
use collab_core::error::CollabError;
use collab_core::provider::Provider;
use http::{header::CONTENT_TYPE, Method, Request};
use serde::Deserialize;
use serde_json::json;
use url::Url;

pub struct OpenAiCompatProvider {
    provider: Provider,
}

impl OpenAiCompatProvider {
    pub fn new(provider: Provider) -> Self {
        assert!(
            matches!(provider, Provider::Chatgpt | Provider::Grok | Provider::Deepseek | Provider::Llama),
            "openai-compat adapter does not cover {provider}",
        );
        Self { provider }
    }
}

impl HttpChatProvider for OpenAiCompatProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_base_url(&self) -> Url {
        let raw = match self.provider {
            Provider::Chatgpt => "https://api.openai.com/v1/",
            Provider::Grok => "https://api.x.ai/v1/",
            Provider::Deepseek => "https://api.deepseek.com/v1/",
            // Overridden by `LLAMA_BASE_URL` at the registry layer; this is
            // only reached if that env var is unset.
            Provider::Llama => "http://localhost:8080/v1/",
            _ => unreachable!("constructor rejects other providers"),
        };
        Url::parse(raw).expect("static url")
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
            "stream": true,
            "stream_options": { "include_usage": true },
            "max_tokens": self.provider.output_token_ceiling(),
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let url = base_url.join("chat/completions")?;
        Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header("Authorization", format!("Bearer {api_key}"))
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
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            let chunk: OpenAiStreamChunk = serde_json::from_str(data)?;
            if let Some(usage) = chunk.usage {
                chunks.push(StreamChunk::Usage(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }));
            }
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    chunks.push(StreamChunk::Text(content));
                }
                if let Some(finish_reason) = choice.finish_reason {
                    chunks.push(StreamChunk::Done {
                        finish_reason: match finish_reason.as_str() {
                            "length" => FinishReason::Length,
                            "content_filter" => FinishReason::ContentFilter,
                            _ => FinishReason::Stop,
                        },
                    });
                }
            }
        }
        Ok(chunks)
    }
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    #[serde(default, rename = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default, rename = "prompt_tokens")]
    prompt_tokens: u32,
    #[serde(default, rename = "completion_tokens")]
    completion_tokens: u32,
}
