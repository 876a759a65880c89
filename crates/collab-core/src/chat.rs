use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message in a conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider at the end of a stream. Field names on
/// the wire vary wildly by vendor; aliases collapse them onto one shape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "prompt_tokens", alias = "promptTokenCount", alias = "input_tokens")]
    pub input_tokens: u32,
    #[serde(alias = "completion_tokens", alias = "candidatesTokenCount", alias = "output_tokens")]
    pub output_tokens: u32,
}

/// One element of a provider's streamed response.
///
/// Every chunk is treated as either plain text or a terminal marker; SDKs
/// that hand back non-text payloads (e.g. a function-call literal) must be
/// normalized to `Text` or dropped by the adapter before this type is built —
/// this type itself carries no variant capable of smuggling one through.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Usage(Usage),
    Done { finish_reason: FinishReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}
