use super::agent_call::{call_agent_step, RunContext};
use super::types::{AbortReason, Artifact, CollaborationResult, StepOutcome};
use crate::events::EventType;
use crate::provider::Provider;
use futures::future::join_all;
use serde_json::json;

pub(crate) fn emit_phase_start(ctx: &RunContext<'_>, phase: &str) {
    ctx.engine.event_bus.publish(
        &ctx.options.session_id,
        EventType::PhaseStart,
        None,
        Some(phase),
        json!({}),
    );
}

/// Publishes the `agent_vote` signal (§4.5) once a voter's free-text ballot
/// has been resolved to a candidate, alongside that call's normal
/// `agent_thinking`/`agent_response_complete` events.
pub(crate) fn emit_vote(ctx: &RunContext<'_>, voter: Provider, choice: Option<Provider>) {
    ctx.engine.event_bus.publish(
        &ctx.options.session_id,
        EventType::AgentVote,
        Some(voter),
        None,
        json!({
            "votedFor": choice.map(|p| p.as_str()),
        }),
    );
}

pub(crate) fn emit_progress(ctx: &RunContext<'_>, phase: &str, current_step: u32, total_steps: u32) {
    let percentage = if total_steps == 0 {
        100.0
    } else {
        (current_step as f64 / total_steps as f64) * 100.0
    };
    ctx.engine.event_bus.publish(
        &ctx.options.session_id,
        EventType::ProgressUpdate,
        None,
        Some(phase),
        json!({
            "phase": phase,
            "currentStep": current_step,
            "totalSteps": total_steps,
            "percentage": percentage,
        }),
    );
}

/// Runs `agents` through one phase strictly in order: agent N's
/// `agent_response_complete` happens-before agent N+1's `agent_thinking`
/// (§5 ordering guarantee). `build_prompts` sees everything collected so far
/// in this phase, so each step's prompt can embed the previous one's result.
pub(crate) async fn sequential_phase(
    ctx: &RunContext<'_>,
    agents: &[Provider],
    phase: &str,
    purpose: &str,
    mut build_prompts: impl FnMut(usize, Provider, &[Artifact]) -> (String, String),
) -> (Vec<Artifact>, Option<AbortReason>) {
    emit_phase_start(ctx, phase);
    let mut artifacts = Vec::new();
    for (i, &provider) in agents.iter().enumerate() {
        let (system, user) = build_prompts(i, provider, &artifacts);
        let model = ctx.options.model_for(provider);
        match call_agent_step(ctx, provider, &model, phase, purpose, system, user).await {
            StepOutcome::Continue(artifact) => artifacts.push(artifact),
            StepOutcome::Abort(reason) => return (artifacts, Some(reason)),
        }
    }
    (artifacts, None)
}

/// Runs `agents` through one phase fanned out concurrently. Per §5, events
/// from different agents in a parallel phase may interleave arbitrarily; the
/// only ordering promise kept here is that `phase_start` precedes every
/// `agent_*` event of this phase.
pub(crate) async fn parallel_phase(
    ctx: &RunContext<'_>,
    agents: &[Provider],
    phase: &str,
    purpose: &str,
    build_prompt: impl Fn(Provider) -> (String, String),
) -> (Vec<Artifact>, Option<AbortReason>) {
    emit_phase_start(ctx, phase);
    let calls = agents.iter().map(|&provider| {
        let (system, user) = build_prompt(provider);
        let model = ctx.options.model_for(provider);
        async move { call_agent_step(ctx, provider, &model, phase, purpose, system, user).await }
    });

    let mut artifacts = Vec::new();
    let mut abort = None;
    for outcome in join_all(calls).await {
        match outcome {
            StepOutcome::Continue(artifact) => artifacts.push(artifact),
            StepOutcome::Abort(reason) => {
                abort.get_or_insert(reason);
            }
        }
    }
    (artifacts, abort)
}

/// Builds the terminal result for a mode that ran to completion.
pub(crate) fn finish_ok(
    ctx: &RunContext<'_>,
    final_text: String,
    rationale: Option<String>,
    artifacts: Vec<Artifact>,
) -> CollaborationResult {
    CollaborationResult {
        final_text,
        rationale,
        spent_usd: ctx.cost.total_cost_usd(),
        artifacts,
    }
}

/// Assigns `roles` to `agents` in order, wrapping back to earlier agents when
/// there are more roles than agents (code_architect, expert_panel,
/// scenario_analysis all "fall back to earlier agents" on repeat).
pub(crate) fn assign_roles<'a>(roles: &[&'a str], agents: &[Provider]) -> Vec<(&'a str, Provider)> {
    roles
        .iter()
        .enumerate()
        .map(|(i, &role)| (role, agents[i % agents.len()]))
        .collect()
}

/// Splits a synthesis response into its `FINAL ANSWER` and `RATIONALE`
/// sections (round_table, sequential_critique_chain, creative_brainstorm_swarm
/// synthesis/amplification phases all ask for this split). Falls back to
/// treating the whole response as the final answer with no rationale if the
/// model didn't label its sections.
pub(crate) fn split_final_and_rationale(text: &str) -> (String, Option<String>) {
    let upper = text.to_uppercase();
    let Some(rationale_idx) = upper.find("RATIONALE") else {
        return (text.trim().to_string(), None);
    };

    let mut final_part = text[..rationale_idx].to_string();
    if let Some(fa_idx) = final_part.to_uppercase().find("FINAL ANSWER") {
        final_part = final_part[fa_idx + "FINAL ANSWER".len()..].to_string();
    }
    let final_part = final_part.trim_matches(|c: char| c == ':' || c.is_whitespace()).to_string();
    let rationale_part = text[rationale_idx + "RATIONALE".len()..]
        .trim_matches(|c: char| c == ':' || c.is_whitespace())
        .to_string();
    (final_part, Some(rationale_part))
}

/// Builds the terminal result for a mode that stopped early. When at least
/// one phase produced a usable artifact, synthesizes a partial result from
/// what succeeded instead of returning the bare abort message (§4.9:
/// "if a global abort triggers mid-workflow but at least one initial draft
/// succeeded, a synthetic partial result is returned").
pub(crate) fn finish_aborted(ctx: &RunContext<'_>, artifacts: Vec<Artifact>, reason: AbortReason) -> CollaborationResult {
    let usable: Vec<&Artifact> = artifacts.iter().filter(|a| a.error.is_none() && !a.content.is_empty()).collect();
    if usable.is_empty() {
        return CollaborationResult {
            final_text: reason.message(),
            rationale: None,
            spent_usd: ctx.cost.total_cost_usd(),
            artifacts,
        };
    }

    let combined = usable
        .iter()
        .map(|a| {
            let who = a.producer.map(|p| p.as_str()).unwrap_or("system");
            format!("[{who}] {}", a.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    CollaborationResult {
        final_text: format!("{}\n\nPartial results gathered before the abort:\n\n{combined}", reason.message()),
        rationale: Some("Synthesized from whatever phases completed before the collaboration aborted.".to_string()),
        spent_usd: ctx.cost.total_cost_usd(),
        artifacts,
    }
}
