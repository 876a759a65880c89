use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of provider back-ends the engine knows how to drive.
///
/// Modeled as a sealed enum rather than an open string so that dispatch to a
/// streaming implementation is a `match`, not a registry lookup by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Gemini,
    Chatgpt,
    Grok,
    Deepseek,
    Llama,
}

/// Enumeration order used for every tie-break the spec calls out
/// (vote ties, largest-context-agent ties).
pub const PROVIDER_ORDER: [Provider; 6] = [
    Provider::Claude,
    Provider::Gemini,
    Provider::Chatgpt,
    Provider::Grok,
    Provider::Deepseek,
    Provider::Llama,
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Chatgpt => "chatgpt",
            Provider::Grok => "grok",
            Provider::Deepseek => "deepseek",
            Provider::Llama => "llama",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
            Provider::Chatgpt => "ChatGPT",
            Provider::Grok => "Grok",
            Provider::Deepseek => "DeepSeek",
            Provider::Llama => "Llama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => "claude-4-sonnet",
            Provider::Gemini => "gemini-2.5-pro",
            Provider::Chatgpt => "gpt-4o",
            Provider::Grok => "grok-3",
            Provider::Deepseek => "deepseek-chat",
            Provider::Llama => "llama-3.3-70b",
        }
    }

    pub fn env_key_name(&self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Chatgpt => "OPENAI_API_KEY",
            Provider::Grok => "XAI_API_KEY",
            Provider::Deepseek => "DEEPSEEK_API_KEY",
            Provider::Llama => "LLAMA_API_KEY",
        }
    }

    /// Output token ceiling the streaming adapter must respect per §4.2.
    pub fn output_token_ceiling(&self) -> u32 {
        match self {
            Provider::Deepseek => 8_192,
            _ => 4_096,
        }
    }

    /// Price per 1000 tokens, `(input, output)`, in USD. A static table stands
    /// in for the fixed price table §4.3 calls for; real prices vary by model
    /// and are not the concern of this engine.
    pub fn price_per_1k_usd(&self) -> (f64, f64) {
        match self {
            Provider::Claude => (0.003, 0.015),
            Provider::Gemini => (0.00125, 0.005),
            Provider::Chatgpt => (0.0025, 0.01),
            Provider::Grok => (0.002, 0.01),
            Provider::Deepseek => (0.00027, 0.0011),
            Provider::Llama => (0.0002, 0.0002),
        }
    }

    /// Declared input context window, used to pick the "largest-context agent"
    /// for synthesis/summarization roles.
    pub fn context_window(&self) -> u32 {
        match self {
            Provider::Claude => 200_000,
            Provider::Gemini => 1_000_000,
            Provider::Chatgpt => 128_000,
            Provider::Grok => 128_000,
            Provider::Deepseek => 64_000,
            Provider::Llama => 128_000,
        }
    }

    pub fn all() -> impl Iterator<Item = Provider> {
        PROVIDER_ORDER.into_iter()
    }

    pub fn from_str_loose(s: &str) -> Option<Provider> {
        PROVIDER_ORDER.into_iter().find(|p| p.as_str() == s)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Among `candidates`, pick the one with the largest declared context window,
/// breaking ties by provider enumeration order. Returns `None` for an empty slice.
pub fn largest_context_agent(candidates: &[Provider]) -> Option<Provider> {
    let mut best: Option<Provider> = None;
    for p in PROVIDER_ORDER.into_iter().filter(|p| candidates.contains(p)) {
        match best {
            Some(b) if p.context_window() <= b.context_window() => {}
            _ => best = Some(p),
        }
    }
    best
}
