use crate::provider::Provider;
use serde::{Deserialize, Serialize};

pub const MAX_PROMPT_CHARS: usize = 5000;
pub const MAX_EMBEDDED_ARTIFACT_CHARS: usize = 2000;
const TRUNCATION_SENTINEL: &str = "[…truncated…]";
const DEFAULT_USER_PROMPT: &str = "Please provide your perspective on this collaboration.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStyle {
    Balanced,
    Contrasting,
    Harmonious,
}

impl CollaborationStyle {
    fn directive(&self) -> &'static str {
        match self {
            CollaborationStyle::Balanced => "Weigh trade-offs evenhandedly rather than advocating for one extreme.",
            CollaborationStyle::Contrasting => "Actively seek out and highlight disagreements with other perspectives.",
            CollaborationStyle::Harmonious => "Build on common ground and favor convergence where reasonable.",
        }
    }
}

fn provider_preamble(provider: Provider) -> &'static str {
    match provider {
        Provider::Claude => {
            "You are Claude, participating as one of several AI agents in a structured multi-agent collaboration."
        }
        Provider::Gemini => {
            "You are Gemini, participating as one of several AI agents in a structured multi-agent collaboration."
        }
        Provider::Chatgpt => {
            "You are ChatGPT, participating as one of several AI agents in a structured multi-agent collaboration."
        }
        Provider::Grok => {
            "You are Grok, participating as one of several AI agents in a structured multi-agent collaboration."
        }
        Provider::Deepseek => {
            "You are DeepSeek, participating as one of several AI agents in a structured multi-agent collaboration."
        }
        Provider::Llama => {
            "You are Llama, participating as one of several AI agents in a structured multi-agent collaboration."
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Truncate `text` to at most `limit` chars, cutting at the last whitespace
/// boundary at or before the limit and appending the truncation sentinel.
pub fn truncate_artifact(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    let cut = truncated.rfind(char::is_whitespace).unwrap_or(truncated.len());
    format!("{}{TRUNCATION_SENTINEL}", &truncated[..cut])
}

/// Deterministically builds `{systemPrompt, userPrompt}` (C7). `embedded_context`
/// holds prior-phase artifacts to fold in, each truncated independently before
/// concatenation so no single artifact can crowd out the others.
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(
        provider: Provider,
        phase_directive: &str,
        style: Option<CollaborationStyle>,
        user_question: &str,
        embedded_context: &[(&str, &str)],
        history: &str,
    ) -> AssembledPrompt {
        let mut system_parts = vec![provider_preamble(provider).to_string(), phase_directive.to_string()];
        if let Some(style) = style {
            system_parts.push(style.directive().to_string());
        }
        let system_prompt = system_parts.join("\n\n");

        let safe_question = if user_question.trim().is_empty() {
            DEFAULT_USER_PROMPT.to_string()
        } else {
            user_question.to_string()
        };

        let mut user_parts = vec![format!(
            "The user's original question, verbatim, is below. Answer it directly; \
             do not drift into discussing this collaboration process itself.\n\n\"{safe_question}\""
        )];

        if !history.is_empty() {
            user_parts.push(format!("Conversation history:\n{history}"));
        }

        for (label, content) in embedded_context {
            let truncated = truncate_artifact(content, MAX_EMBEDDED_ARTIFACT_CHARS);
            user_parts.push(format!("{label}:\n{truncated}"));
        }

        let mut user_prompt = user_parts.join("\n\n");
        if user_prompt.chars().count() > MAX_PROMPT_CHARS {
            user_prompt = truncate_artifact(&user_prompt, MAX_PROMPT_CHARS);
        }

        AssembledPrompt { system_prompt, user_prompt }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_question_is_substituted_with_default() {
        let assembled = PromptAssembler::assemble(Provider::Claude, "initial draft", None, "   ", &[], "");
        assert!(assembled.user_prompt.contains(DEFAULT_USER_PROMPT));
    }

    #[test]
    fn embedded_artifact_truncated_at_whitespace_boundary() {
        let long_artifact = "word ".repeat(1000);
        let truncated = truncate_artifact(&long_artifact, MAX_EMBEDDED_ARTIFACT_CHARS);
        assert!(truncated.ends_with("[…truncated…]"));
        assert!(!truncated[..truncated.len() - TRUNCATION_SENTINEL.len()].ends_with("word"));
    }

    #[test]
    fn short_artifact_is_untouched() {
        assert_eq!(truncate_artifact("short", 2000), "short");
    }

    #[test]
    fn user_prompt_never_exceeds_size_bound() {
        let huge_history = "line\n".repeat(5000);
        let assembled =
            PromptAssembler::assemble(Provider::Gemini, "critique", None, "q", &[], &huge_history);
        assert!(assembled.user_prompt.chars().count() <= MAX_PROMPT_CHARS);
    }

    #[test]
    fn style_directive_is_included_when_present() {
        let assembled = PromptAssembler::assemble(
            Provider::Chatgpt,
            "vote",
            Some(CollaborationStyle::Contrasting),
            "q",
            &[],
            "",
        );
        assert!(assembled.system_prompt.contains("disagreements"));
    }
}
