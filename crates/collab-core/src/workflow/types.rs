use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The ten named workflow shapes (§8 invariant: mode is always one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    Individual,
    RoundTable,
    SequentialCritiqueChain,
    ValidatedConsensus,
    CreativeBrainstormSwarm,
    HybridGuardedBraintrust,
    CodeArchitect,
    AdversarialDebate,
    ExpertPanel,
    ScenarioAnalysis,
}

impl CollaborationMode {
    /// Rough phase-call fan-out used by the pre-flight cost estimate; not a
    /// hard cap, just a multiplier on "one call per agent" for estimation.
    pub fn estimate_fan_out(&self) -> u32 {
        match self {
            CollaborationMode::Individual => 1,
            CollaborationMode::RoundTable => 4,
            CollaborationMode::SequentialCritiqueChain => 2,
            CollaborationMode::ValidatedConsensus => 3,
            CollaborationMode::CreativeBrainstormSwarm => 4,
            CollaborationMode::HybridGuardedBraintrust => 3,
            CollaborationMode::CodeArchitect => 1,
            CollaborationMode::AdversarialDebate => 2,
            CollaborationMode::ExpertPanel => 2,
            CollaborationMode::ScenarioAnalysis => 1,
        }
    }
}

/// Rotating refinement style used by `sequential_critique_chain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequentialStyle {
    Balanced,
    Constructive,
    Challenging,
}

impl SequentialStyle {
    const ROTATION: [SequentialStyle; 3] = [
        SequentialStyle::Balanced,
        SequentialStyle::Constructive,
        SequentialStyle::Challenging,
    ];

    pub fn at_step(step: usize) -> SequentialStyle {
        Self::ROTATION[step % Self::ROTATION.len()]
    }

    pub fn directive(&self) -> &'static str {
        match self {
            SequentialStyle::Balanced => "Refine the previous answer, weighing its strengths and weaknesses evenhandedly.",
            SequentialStyle::Constructive => "Refine the previous answer by building on what works and filling its gaps.",
            SequentialStyle::Challenging => "Refine the previous answer by stress-testing its claims and correcting what doesn't hold up.",
        }
    }
}

/// Inputs to one collaboration run (§3 `CollaborationOptions`).
#[derive(Debug, Clone)]
pub struct CollaborationOptions {
    pub prompt: String,
    pub mode: CollaborationMode,
    pub requested_agents: Vec<Provider>,
    pub model_ids: HashMap<Provider, Vec<String>>,
    pub cost_cap_usd: f64,
    pub deadline_seconds: u64,
    pub ignore_failing_models: bool,
    pub sequential_style: Option<SequentialStyle>,
    pub collaboration_style: Option<crate::prompt::CollaborationStyle>,
    pub user_id: String,
    pub session_id: String,
    /// Formatted conversation history from the Context Store
    /// (`Context::format_for_prompt`), embedded into every phase's prompt.
    pub context_history: String,
    /// Per-user daily cap set via the Session Gateway's `set_budget_limit`
    /// operation; overrides the engine-wide default for this user only.
    pub daily_cap_usd_override: Option<f64>,
}

impl CollaborationOptions {
    pub fn model_for(&self, provider: Provider) -> String {
        self.model_ids
            .get(&provider)
            .and_then(|ids| ids.first())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string())
    }
}

/// One phase artifact (§3 Draft/Critique/Vote/Insight are all this shape).
/// Artifacts are append-only within a collaboration.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub phase: String,
    pub producer: Option<Provider>,
    pub content: String,
    pub error: Option<String>,
}

impl Artifact {
    pub fn ok(phase: impl Into<String>, producer: Provider, content: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            producer: Some(producer),
            content: content.into(),
            error: None,
        }
    }

    pub fn failed(phase: impl Into<String>, producer: Provider, placeholder: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            producer: Some(producer),
            content: placeholder.into(),
            error: Some(reason.into()),
        }
    }

    pub fn system(phase: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            producer: None,
            content: content.into(),
            error: None,
        }
    }
}

/// Outputs of one collaboration run (§3 `CollaborationResult`).
#[derive(Debug, Clone, Serialize)]
pub struct CollaborationResult {
    #[serde(rename = "final")]
    pub final_text: String,
    pub rationale: Option<String>,
    pub spent_usd: f64,
    pub artifacts: Vec<Artifact>,
}

/// Why a mode stopped short of its full phase sequence.
#[derive(Debug, Clone)]
pub(crate) enum AbortReason {
    NoAgents,
    OverBudget,
    Cost,
    Deadline,
    AgentFailure { provider: Provider, message: String },
    InsufficientAgents { required: usize, available: usize },
}

impl AbortReason {
    pub(crate) fn message(&self) -> String {
        match self {
            AbortReason::NoAgents => "Collaboration aborted: no AI models available.".to_string(),
            AbortReason::OverBudget => "Collaboration aborted: estimated cost exceeds budget.".to_string(),
            AbortReason::Cost => "Collaboration aborted: cost limit exceeded.".to_string(),
            AbortReason::Deadline => "Collaboration aborted: time limit exceeded.".to_string(),
            AbortReason::AgentFailure { provider, message } => {
                format!("Collaboration aborted: {provider} failed ({message}).")
            }
            AbortReason::InsufficientAgents { required, available } => format!(
                "Collaboration aborted: this mode requires at least {required} agents, only {available} available."
            ),
        }
    }
}

/// What one phase step produced: either an artifact to keep going with, or a
/// reason the whole collaboration must stop now.
pub(crate) enum StepOutcome {
    Continue(Artifact),
    Abort(AbortReason),
}

/// Placeholder text for a degraded agent response (§4.9 partial-failure
/// policy): `"[<provider> was unable to provide X: <reason>]"`.
pub(crate) fn placeholder_text(provider: Provider, purpose: &str, reason: &str) -> String {
    format!("[{provider} was unable to provide {purpose}: {reason}]")
}
