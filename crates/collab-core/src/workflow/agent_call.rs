use super::types::{placeholder_text, AbortReason, Artifact, CollaborationOptions, StepOutcome};
use crate::chat::StreamChunk;
use crate::concurrency::DeadlineManager;
use crate::cost::CostTracker;
use crate::error::CollabError;
use crate::events::{EventBus, EventType};
use crate::provider::Provider;
use crate::retry::with_retry;
use crate::streaming::stream_http_chat;
use crate::workflow::WorkflowEngine;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

/// Everything one running collaboration needs in order to make agent calls:
/// the engine's shared services, plus the per-run cost tracker and deadline
/// that `spec.md` §4.4/§4.9 scope to a single collaboration.
pub(crate) struct RunContext<'a> {
    pub engine: &'a WorkflowEngine,
    pub options: &'a CollaborationOptions,
    pub cost: Arc<CostTracker>,
    pub deadline: DeadlineManager,
}

impl<'a> RunContext<'a> {
    fn bus(&self) -> &EventBus {
        &self.engine.event_bus
    }

    fn session_id(&self) -> &str {
        &self.options.session_id
    }
}

/// Makes one phase call to `provider`, handling retry, concurrency, deadline
/// derivation and cost accounting. Returns the concatenated response text.
///
/// Errors from this function are *global*: `CostLimitExceeded` and
/// `GlobalDeadlineExceeded` must always propagate regardless of
/// `ignoreFailingModels` (§7), which callers enforce by matching on the
/// error before deciding whether to degrade to a placeholder.
pub(crate) async fn call_agent(
    ctx: &RunContext<'_>,
    provider: Provider,
    model: &str,
    phase: &str,
    system_prompt: String,
    user_prompt: String,
) -> Result<String, CollabError> {
    if ctx.cost.should_abort() {
        return Err(CollabError::CostLimitExceeded);
    }
    if ctx.deadline.is_session_expired() {
        return Err(CollabError::GlobalDeadlineExceeded);
    }

    let client = ctx
        .engine
        .registry
        .get_client(&ctx.options.user_id, provider)
        .map_err(|_| CollabError::NoProviderAvailable)?;

    ctx.bus()
        .publish(ctx.session_id(), EventType::AgentThinking, Some(provider), Some(phase), json!({}));

    let result = with_retry(
        || {
            let client = client.clone();
            let model = model.to_string();
            let system_prompt = system_prompt.clone();
            let user_prompt = user_prompt.clone();
            let cost = ctx.cost.clone();
            let concurrency = ctx.engine.concurrency.clone();
            let deadline = ctx.deadline;
            async move {
                let _permit = concurrency.acquire(provider).await;
                let child_deadline = deadline.child_deadline();
                let mut stream =
                    stream_http_chat(&client, &model, &system_prompt, &user_prompt, child_deadline).await?;

                let mut text = String::new();
                while let Some(next) = stream.next().await {
                    match next? {
                        StreamChunk::Text(t) => text.push_str(&t),
                        StreamChunk::Usage(usage) => {
                            cost.add_input_tokens(provider, usage.input_tokens);
                            cost.add_output_tokens(provider, usage.output_tokens);
                        }
                        StreamChunk::Done { .. } => {}
                    }
                    if cost.should_abort() {
                        return Err(CollabError::CostLimitExceeded);
                    }
                }

                if text.is_empty() {
                    return Err(CollabError::ResponseFormatError {
                        message: "empty response".to_string(),
                        raw_response: String::new(),
                    });
                }
                Ok(text)
            }
        },
        |attempt| {
            ctx.bus().publish(
                ctx.session_id(),
                EventType::AgentRetry,
                Some(provider),
                Some(phase),
                json!({ "attempt": attempt }),
            );
        },
    )
    .await;

    match &result {
        Ok(text) => {
            // Each streamed `Text` chunk was already counted toward this same
            // length when it arrived; emitting a single `agent_thought` with
            // the full text here (rather than per-chunk) keeps §8 invariant 4
            // trivially true without requiring a live subscriber mid-call.
            ctx.bus().publish(
                ctx.session_id(),
                EventType::AgentThought,
                Some(provider),
                Some(phase),
                json!({ "text": text }),
            );
            ctx.bus().publish(
                ctx.session_id(),
                EventType::AgentResponseComplete,
                Some(provider),
                Some(phase),
                json!({ "length": text.chars().count() }),
            );
        }
        Err(_) => {}
    }
    result
}

/// Wraps [`call_agent`] with the partial-failure policy (§4.9): a per-agent
/// failure degrades to a placeholder artifact and the phase continues when
/// `ignoreFailingModels` is set; otherwise (or for a global abort, always)
/// the phase stops and reports why.
pub(crate) async fn call_agent_step(
    ctx: &RunContext<'_>,
    provider: Provider,
    model: &str,
    phase: &str,
    purpose: &str,
    system_prompt: String,
    user_prompt: String,
) -> StepOutcome {
    match call_agent(ctx, provider, model, phase, system_prompt, user_prompt).await {
        Ok(text) => StepOutcome::Continue(Artifact::ok(phase, provider, text)),
        Err(CollabError::CostLimitExceeded) => StepOutcome::Abort(AbortReason::Cost),
        Err(CollabError::GlobalDeadlineExceeded) => StepOutcome::Abort(AbortReason::Deadline),
        Err(e) => {
            let message = e.to_string();
            if ctx.options.ignore_failing_models {
                StepOutcome::Continue(Artifact::failed(
                    phase,
                    provider,
                    placeholder_text(provider, purpose, &message),
                    message,
                ))
            } else {
                StepOutcome::Abort(AbortReason::AgentFailure { provider, message })
            }
        }
    }
}
