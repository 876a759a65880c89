use crate::chat::ChatRole;
use crate::provider::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    None,
    Summary,
    Full,
}

#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub role: ChatRole,
    pub provider: Option<Provider>,
    pub content: String,
    pub tokens: u32,
    pub timestamp: DateTime<Utc>,
}

impl ContextMessage {
    fn len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Result of an `add*` call: whether the context just crossed the 80% warning
/// threshold, for the Session Gateway to forward as a warning event.
#[derive(Debug, Clone, Copy)]
pub struct NearLimitSignal {
    pub is_near_limit: bool,
    pub percent_used: f64,
}

/// Per-session conversation state (C8). `context_size` is always the exact
/// sum of stored message lengths; enforced by construction, not re-derived.
pub struct Context {
    messages: Vec<ContextMessage>,
    mode: ContextMode,
    context_size: usize,
    max_context_size: usize,
}

const MIN_MAX_CONTEXT_SIZE: usize = 1000;
const DEFAULT_MAX_CONTEXT_SIZE: usize = 8000;
const TRIM_TARGET_RATIO: f64 = 0.9;
const NEAR_LIMIT_RATIO: f64 = 0.8;

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_CONTEXT_SIZE)
    }

    pub fn with_max_size(max_context_size: usize) -> Self {
        Self {
            messages: Vec::new(),
            mode: ContextMode::Full,
            context_size: 0,
            max_context_size: max_context_size.max(MIN_MAX_CONTEXT_SIZE),
        }
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn max_context_size(&self) -> usize {
        self.max_context_size
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn set_mode(&mut self, mode: ContextMode) {
        self.mode = mode;
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_context_size = max_size.max(MIN_MAX_CONTEXT_SIZE);
        self.trim();
    }

    fn push(&mut self, message: ContextMessage) -> NearLimitSignal {
        self.context_size += message.len();
        self.messages.push(message);
        self.trim();
        let percent_used = self.context_size as f64 / self.max_context_size as f64;
        NearLimitSignal {
            is_near_limit: percent_used >= NEAR_LIMIT_RATIO,
            percent_used,
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>, now: DateTime<Utc>) -> NearLimitSignal {
        self.push(ContextMessage {
            role: ChatRole::User,
            provider: None,
            content: content.into(),
            tokens: 0,
            timestamp: now,
        })
    }

    pub fn add_assistant_response(
        &mut self,
        provider: Provider,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> NearLimitSignal {
        self.push(ContextMessage {
            role: ChatRole::Assistant,
            provider: Some(provider),
            content: content.into(),
            tokens: 0,
            timestamp: now,
        })
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.context_size = 0;
    }

    /// Removes the oldest messages one at a time until `context_size <= 0.9 *
    /// max_context_size`. Returns the count removed; a no-op call (nothing to
    /// trim) returns 0, so two consecutive calls with no intervening add
    /// produce the same observable state.
    pub fn trim(&mut self) -> usize {
        let target = (self.max_context_size as f64 * TRIM_TARGET_RATIO) as usize;
        let mut removed = 0;
        while self.context_size > target && !self.messages.is_empty() {
            let oldest = self.messages.remove(0);
            self.context_size -= oldest.len();
            removed += 1;
        }
        removed
    }

    pub fn format_for_prompt(&self) -> String {
        match self.mode {
            ContextMode::None => String::new(),
            ContextMode::Full => self.format_full(),
            ContextMode::Summary => self.format_summary(),
        }
    }

    fn format_full(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", label(m), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Summary mode keeps the most recent window verbatim and folds older
    /// messages into one synthesized paragraph. Which agent (or a fixed cheap
    /// model) produces that paragraph is an open question upstream; here it
    /// is produced locally with no model call, which always fits
    /// `max_context_size` by construction.
    fn format_summary(&self) -> String {
        const RECENT_WINDOW: usize = 6;
        if self.messages.len() <= RECENT_WINDOW {
            return self.format_full();
        }
        let split_at = self.messages.len() - RECENT_WINDOW;
        let (older, recent) = self.messages.split_at(split_at);
        let summary = format!(
            "[summary of {} earlier message(s) from {}]",
            older.len(),
            older
                .iter()
                .map(|m| label(m))
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut lines = vec![summary];
        lines.extend(recent.iter().map(|m| format!("{}: {}", label(m), m.content)));
        lines.join("\n")
    }
}

fn label(m: &ContextMessage) -> String {
    match (m.role, m.provider) {
        (ChatRole::User, _) => "user".to_string(),
        (ChatRole::Assistant, Some(p)) => p.as_str().to_string(),
        (ChatRole::Assistant, None) => "assistant".to_string(),
    }
}

/// Keyed `(userId, sessionId)` — exclusively owns message arrays; callers get
/// immutable snapshots via `format_for_prompt`/accessor methods, never a
/// mutable reference into the store.
pub struct ContextStore {
    contexts: RwLock<HashMap<(String, String), Context>>,
    default_max_size: usize,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        Self::with_default_max_size(DEFAULT_MAX_CONTEXT_SIZE)
    }

    /// `default_max_size` seeds every newly-created context, so a gateway's
    /// `COLLAB_DEFAULT_MAX_CONTEXT_SIZE` takes effect without every caller
    /// having to call `set_max_size` itself right after creation.
    pub fn with_default_max_size(default_max_size: usize) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            default_max_size,
        }
    }

    pub fn with_context<R>(&self, user_id: &str, session_id: &str, f: impl FnOnce(&mut Context) -> R) -> R {
        let key = (user_id.to_string(), session_id.to_string());
        let mut contexts = self.contexts.write().unwrap();
        let context = contexts
            .entry(key)
            .or_insert_with(|| Context::with_max_size(self.default_max_size));
        f(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn reset_zeroes_count_and_size() {
        let mut ctx = Context::new();
        ctx.add_user_message("hello", now());
        ctx.reset();
        assert_eq!(ctx.message_count(), 0);
        assert_eq!(ctx.context_size(), 0);
    }

    #[test]
    fn add_message_preserves_size_invariant() {
        let mut ctx = Context::new();
        ctx.set_max_size(50);
        for i in 0..20 {
            ctx.add_user_message(format!("message number {i}"), now());
            assert!(ctx.context_size() <= ctx.max_context_size());
        }
    }

    #[test]
    fn trim_is_idempotent_with_no_intervening_add() {
        let mut ctx = Context::new();
        ctx.set_max_size(50);
        for i in 0..20 {
            ctx.add_user_message(format!("message number {i}"), now());
        }
        ctx.trim();
        let size_after_first = ctx.context_size();
        let removed = ctx.trim();
        assert_eq!(removed, 0);
        assert_eq!(ctx.context_size(), size_after_first);
    }

    #[test]
    fn mode_none_returns_empty_regardless_of_history() {
        let mut ctx = Context::new();
        ctx.add_user_message("hi", now());
        ctx.add_assistant_response(Provider::Claude, "hello", now());
        ctx.set_mode(ContextMode::None);
        assert_eq!(ctx.format_for_prompt(), "");
    }

    #[test]
    fn mode_switching_round_trips_full_history() {
        let mut ctx = Context::new();
        for i in 0..5 {
            ctx.add_user_message(format!("msg {i}"), now());
        }
        let full_before = ctx.format_for_prompt();
        assert_eq!(full_before.lines().count(), 5);

        ctx.set_mode(ContextMode::None);
        assert_eq!(ctx.format_for_prompt(), "");

        ctx.set_mode(ContextMode::Full);
        assert_eq!(ctx.format_for_prompt(), full_before);
    }

    #[test]
    fn near_limit_signal_fires_at_80_percent() {
        let mut ctx = Context::new();
        ctx.set_max_size(1000);
        let signal = ctx.add_user_message("x".repeat(850), now());
        assert!(signal.is_near_limit);
        assert!(signal.percent_used >= 0.8);
    }

    #[test]
    fn set_max_size_floors_at_minimum() {
        let mut ctx = Context::new();
        ctx.set_max_size(10);
        assert_eq!(ctx.max_context_size(), MIN_MAX_CONTEXT_SIZE);
    }
}
