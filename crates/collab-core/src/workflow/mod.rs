//! Workflow Engine (C9): orchestrates multi-agent collaborations on top of
//! the Provider Client Registry, Event Bus, Concurrency Manager and Cost
//! Governor. [`WorkflowEngine::run`] implements the shared pre-flight and
//! terminal-event skeleton every collaboration mode goes through; the
//! per-mode phase sequences live in `modes`.

mod agent_call;
mod modes;
mod phase_runner;
mod types;
mod vote;

pub use types::{Artifact, CollaborationMode, CollaborationOptions, CollaborationResult, SequentialStyle};

use crate::client::ProviderClientRegistry;
use crate::concurrency::{ConcurrencyManager, DeadlineManager};
use crate::cost::{CostTracker, DailyCostAggregate};
use crate::events::{EventBus, EventType};
use agent_call::RunContext;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use types::AbortReason;

/// Shared services one running collaboration draws on. Constructed once per
/// process (or per gateway connection pool) and handed to every run.
pub struct WorkflowEngine {
    pub(crate) registry: Arc<ProviderClientRegistry>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) concurrency: Arc<ConcurrencyManager>,
    daily_cost: Arc<DailyCostAggregate>,
    daily_cap_usd: f64,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<ProviderClientRegistry>,
        event_bus: Arc<EventBus>,
        concurrency: Arc<ConcurrencyManager>,
        daily_cost: Arc<DailyCostAggregate>,
        daily_cap_usd: f64,
    ) -> Self {
        Self {
            registry,
            event_bus,
            concurrency,
            daily_cost,
            daily_cap_usd,
        }
    }

    /// Runs one collaboration to completion. Always publishes exactly one
    /// `collaboration_result` followed by one `collaboration_complete`,
    /// regardless of whether the run finished normally or aborted (§8
    /// invariant 1), then drops the session's event channel.
    pub async fn run(&self, options: CollaborationOptions) -> CollaborationResult {
        let result = self.run_inner(&options).await;

        self.daily_cost.add(&options.user_id, result.spent_usd, Utc::now());

        self.event_bus.publish(
            &options.session_id,
            EventType::CollaborationResult,
            None,
            None,
            json!({
                "final": result.final_text,
                "rationale": result.rationale,
                "spentUsd": result.spent_usd,
            }),
        );
        self.event_bus
            .publish(&options.session_id, EventType::CollaborationComplete, None, None, json!({}));
        self.event_bus.drop_channel(&options.session_id);

        result
    }

    /// The process-wide per-user daily spend aggregate, exposed so the
    /// Session Gateway can answer `get_daily_cost` without keeping a second
    /// copy of this state (§5: the daily aggregate is process-wide, shared).
    pub fn daily_cost(&self) -> &Arc<DailyCostAggregate> {
        &self.daily_cost
    }

    async fn run_inner(&self, options: &CollaborationOptions) -> CollaborationResult {
        let daily_cap = options.daily_cap_usd_override.unwrap_or(self.daily_cap_usd);
        if self.daily_cost.enforce_budget_limit(&options.user_id, daily_cap, Utc::now()) {
            return CollaborationResult {
                final_text: AbortReason::OverBudget.message(),
                rationale: None,
                spent_usd: 0.0,
                artifacts: vec![],
            };
        }

        let agents: Vec<_> = options
            .requested_agents
            .iter()
            .copied()
            .filter(|&p| self.registry.get_client(&options.user_id, p).is_ok())
            .collect();
        if agents.is_empty() {
            return CollaborationResult {
                final_text: AbortReason::NoAgents.message(),
                rationale: None,
                spent_usd: 0.0,
                artifacts: vec![],
            };
        }

        let estimate = CostTracker::estimate(&agents, options.prompt.chars().count(), options.mode.estimate_fan_out());
        if estimate > options.cost_cap_usd {
            return CollaborationResult {
                final_text: AbortReason::OverBudget.message(),
                rationale: None,
                spent_usd: 0.0,
                artifacts: vec![],
            };
        }

        let cost = Arc::new(CostTracker::new(options.cost_cap_usd));
        let deadline = DeadlineManager::new(Duration::from_secs(options.deadline_seconds));
        let ctx = RunContext {
            engine: self,
            options,
            cost,
            deadline,
        };

        modes::dispatch(&ctx, &agents).await
    }
}
