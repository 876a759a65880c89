//! Per-connection session handling: turns an inbound [`ClientMessage`] into
//! either a [`CollaborationOptions`] run against the shared engine, or a
//! synchronous delegation to the Context Store / Cost Governor (§4.10).

use crate::config::GatewayConfig;
use crate::wire::{ChatTarget, ClientMessage, ConnectionPhase, ConnectionState, ServerMessage};
use chrono::Utc;
use collab_core::{
    largest_context_agent, CollabError, CollaborationMode, CollaborationOptions, ContextStore, EventBus, Provider,
    ProviderClientRegistry, WorkflowEngine,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Services shared by every connection the gateway accepts.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<ProviderClientRegistry>,
    pub event_bus: Arc<EventBus>,
    pub context_store: Arc<ContextStore>,
    pub config: GatewayConfig,
}

/// What handling one frame produced: an immediate reply to send back, or
/// nothing (a `chat` that started successfully replies later, purely through
/// events forwarded off the session's event channel).
pub enum OpOutcome {
    Reply(ServerMessage),
    None,
}

/// Dispatches one inbound frame. `conn` is already locked by the caller for
/// the duration of the synchronous part of handling; `conn_handle` is a
/// clone of the same connection's `Arc<Mutex<_>>`, used only to let a
/// spawned collaboration update connection state (cumulative spend, running
/// task) after the engine run completes, once the frame's own lock is gone.
pub async fn handle_message(
    state: &GatewayState,
    conn: &mut ConnectionState,
    conn_handle: Arc<Mutex<ConnectionState>>,
    message: ClientMessage,
) -> Result<OpOutcome, CollabError> {
    if matches!(message, ClientMessage::Ping {} | ClientMessage::DebugPing {}) {
        return Ok(OpOutcome::Reply(ServerMessage::Pong {}));
    }
    if let ClientMessage::Authenticate { user_id } = message {
        // Clearing the registry cache here is what makes an updated key take
        // effect without waiting for its TTL (§4.10).
        state.registry.invalidate(&user_id);
        conn.user_id = Some(user_id);
        conn.phase = ConnectionPhase::Authenticated;
        return Ok(OpOutcome::Reply(ServerMessage::Ack {}));
    }

    let Some(user_id) = conn.user_id.clone() else {
        return Err(CollabError::BadRequest("must authenticate before this operation".to_string()));
    };

    match message {
        ClientMessage::Chat {
            target,
            message,
            file_paths: _,
            models,
            collaboration_mode,
            sequential_style,
            collaboration_style,
            cost_cap_usd,
            deadline_seconds,
            ignore_failing_models,
        } => {
            if conn.is_running() {
                return Err(CollabError::BadRequest(
                    "a collaboration is already running on this connection".to_string(),
                ));
            }

            let (agents, mode): (Vec<Provider>, CollaborationMode) = match target {
                ChatTarget::Collab => {
                    let agents: Vec<Provider> = if models.is_empty() {
                        Provider::all().collect()
                    } else {
                        models.keys().copied().collect()
                    };
                    (agents, collaboration_mode.unwrap_or(conn.collab_mode))
                }
                ChatTarget::Agent(provider) => (vec![provider], CollaborationMode::Individual),
            };
            if agents.is_empty() {
                return Err(CollabError::BadRequest("at least one agent must be requested".to_string()));
            }

            conn.collab_mode = mode;
            if let Some(style) = collaboration_style {
                conn.collab_style = Some(style);
            }
            if let Some(style) = sequential_style {
                conn.sequential_style = Some(style);
            }

            let session_id = conn.session_id.clone();
            let context_history = state
                .context_store
                .with_context(&user_id, &session_id, |ctx| ctx.format_for_prompt());
            state
                .context_store
                .with_context(&user_id, &session_id, |ctx| ctx.add_user_message(message.clone(), Utc::now()));

            let options = CollaborationOptions {
                prompt: message,
                mode,
                requested_agents: agents.clone(),
                model_ids: models,
                cost_cap_usd: cost_cap_usd.unwrap_or(state.config.default_cost_cap_usd),
                deadline_seconds: deadline_seconds.unwrap_or(state.config.default_deadline_seconds),
                ignore_failing_models,
                sequential_style: conn.sequential_style,
                collaboration_style: conn.collab_style,
                user_id: user_id.clone(),
                session_id: session_id.clone(),
                context_history,
                daily_cap_usd_override: conn.daily_cap_override,
            };

            let engine = state.engine.clone();
            let context_store = state.context_store.clone();
            let representative = largest_context_agent(&agents).unwrap_or(Provider::Claude);
            conn.phase = ConnectionPhase::Active;
            let task = tokio::spawn(async move {
                let result = engine.run(options).await;
                context_store.with_context(&user_id, &session_id, |ctx| {
                    ctx.add_assistant_response(representative, result.final_text, Utc::now())
                });
                let mut conn = conn_handle.lock().await;
                conn.cumulative_spent_usd += result.spent_usd;
                conn.running_task = None;
            });
            conn.running_task = Some(task);
            Ok(OpOutcome::None)
        }

        ClientMessage::Command { command, .. } => Ok(OpOutcome::Reply(ServerMessage::Error {
            message: format!(
                "command '{command}' delegates to an external CLI collaborator, which this gateway does not run"
            ),
            target: None,
        })),

        ClientMessage::SetCollabMode { mode } => {
            conn.collab_mode = mode;
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }
        ClientMessage::SetCollabStyle { style } => {
            conn.collab_style = Some(style);
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }
        ClientMessage::CancelCollaboration {} => {
            if let Some(task) = conn.running_task.take() {
                task.abort();
            }
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }

        ClientMessage::ContextStatus {} => {
            let (message_count, context_size, max_context_size, mode) =
                state.context_store.with_context(&user_id, &conn.session_id, |ctx| {
                    (ctx.message_count(), ctx.context_size(), ctx.max_context_size(), ctx.mode())
                });
            Ok(OpOutcome::Reply(ServerMessage::ContextStatus {
                message_count,
                context_size,
                max_context_size,
                mode,
            }))
        }
        ClientMessage::ResetContext {} => {
            state.context_store.with_context(&user_id, &conn.session_id, |ctx| ctx.reset());
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }
        ClientMessage::TrimContext {} => {
            state.context_store.with_context(&user_id, &conn.session_id, |ctx| ctx.trim());
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }
        ClientMessage::SetMaxContextSize { max_size } => {
            state
                .context_store
                .with_context(&user_id, &conn.session_id, |ctx| ctx.set_max_size(max_size));
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }
        ClientMessage::SetContextMode { mode } => {
            state.context_store.with_context(&user_id, &conn.session_id, |ctx| ctx.set_mode(mode));
            Ok(OpOutcome::Reply(ServerMessage::Ack {}))
        }

        ClientMessage::GetSessionCost {} => Ok(OpOutcome::Reply(ServerMessage::SessionCost {
            spent_usd: conn.cumulative_spent_usd,
        })),
        ClientMessage::GetDailyCost {} => {
            let spent_usd = state.engine.daily_cost().total_usd(&user_id, Utc::now());
            Ok(OpOutcome::Reply(ServerMessage::DailyCost { spent_usd }))
        }
        ClientMessage::SetBudgetLimit { daily_cap_usd } => {
            conn.daily_cap_override = Some(daily_cap_usd);
            Ok(OpOutcome::Reply(ServerMessage::BudgetLimitSet { daily_cap_usd }))
        }

        ClientMessage::Ping {} | ClientMessage::DebugPing {} | ClientMessage::Authenticate { .. } => {
            unreachable!("handled above before the authentication check")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::{ConcurrencyManager, ContextMode, DailyCostAggregate, EventBus, NoStoredKeys};

    fn state() -> GatewayState {
        GatewayState {
            engine: Arc::new(WorkflowEngine::new(
                Arc::new(ProviderClientRegistry::new(vec![], Arc::new(NoStoredKeys))),
                Arc::new(EventBus::new()),
                Arc::new(ConcurrencyManager::new(3)),
                Arc::new(DailyCostAggregate::new()),
                20.0,
            )),
            registry: Arc::new(ProviderClientRegistry::new(vec![], Arc::new(NoStoredKeys))),
            event_bus: Arc::new(EventBus::new()),
            context_store: Arc::new(ContextStore::new()),
            config: GatewayConfig::from_env(),
        }
    }

    fn conn() -> (ConnectionState, Arc<Mutex<ConnectionState>>) {
        let conn = ConnectionState::new("s1".to_string());
        let handle = Arc::new(Mutex::new(ConnectionState::new("s1".to_string())));
        (conn, handle)
    }

    async fn dispatch(state: &GatewayState, conn: &mut ConnectionState, msg: ClientMessage) -> Result<OpOutcome, CollabError> {
        let handle = Arc::new(Mutex::new(ConnectionState::new(conn.session_id.clone())));
        handle_message(state, conn, handle, msg).await
    }

    #[tokio::test]
    async fn ping_works_before_authentication() {
        let state = state();
        let (mut conn, _) = conn();
        let outcome = dispatch(&state, &mut conn, ClientMessage::Ping {}).await.unwrap();
        assert!(matches!(outcome, OpOutcome::Reply(ServerMessage::Pong {})));
        assert!(conn.user_id.is_none());
    }

    #[tokio::test]
    async fn debug_ping_also_bypasses_authentication() {
        let state = state();
        let (mut conn, _) = conn();
        let outcome = dispatch(&state, &mut conn, ClientMessage::DebugPing {}).await.unwrap();
        assert!(matches!(outcome, OpOutcome::Reply(ServerMessage::Pong {})));
    }

    #[tokio::test]
    async fn unauthenticated_operation_is_rejected() {
        let state = state();
        let (mut conn, _) = conn();
        let err = dispatch(&state, &mut conn, ClientMessage::ContextStatus {}).await.unwrap_err();
        assert!(matches!(err, CollabError::BadRequest(_)));
    }

    #[tokio::test]
    async fn authenticate_transitions_phase_and_sets_user() {
        let state = state();
        let (mut conn, _) = conn();
        let outcome = dispatch(
            &state,
            &mut conn,
            ClientMessage::Authenticate { user_id: "u1".to_string() },
        )
        .await
        .unwrap();
        assert!(matches!(outcome, OpOutcome::Reply(ServerMessage::Ack {})));
        assert_eq!(conn.user_id.as_deref(), Some("u1"));
        assert_eq!(conn.phase, ConnectionPhase::Authenticated);
    }

    #[tokio::test]
    async fn context_status_round_trips_through_context_store() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();

        match dispatch(&state, &mut conn, ClientMessage::ContextStatus {}).await.unwrap() {
            OpOutcome::Reply(ServerMessage::ContextStatus { message_count, mode, .. }) => {
                assert_eq!(message_count, 0);
                assert_eq!(mode, ContextMode::Full);
            }
            _ => panic!("expected a context status reply"),
        }

        dispatch(&state, &mut conn, ClientMessage::SetContextMode { mode: ContextMode::None })
            .await
            .unwrap();
        match dispatch(&state, &mut conn, ClientMessage::ContextStatus {}).await.unwrap() {
            OpOutcome::Reply(ServerMessage::ContextStatus { mode, .. }) => assert_eq!(mode, ContextMode::None),
            _ => panic!("expected context status reply"),
        }
    }

    #[tokio::test]
    async fn reset_and_trim_context_are_acknowledged() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        let reset = dispatch(&state, &mut conn, ClientMessage::ResetContext {}).await.unwrap();
        assert!(matches!(reset, OpOutcome::Reply(ServerMessage::Ack {})));
        let trim = dispatch(&state, &mut conn, ClientMessage::TrimContext {}).await.unwrap();
        assert!(matches!(trim, OpOutcome::Reply(ServerMessage::Ack {})));
        let set_size = dispatch(&state, &mut conn, ClientMessage::SetMaxContextSize { max_size: 2000 })
            .await
            .unwrap();
        assert!(matches!(set_size, OpOutcome::Reply(ServerMessage::Ack {})));
    }

    #[tokio::test]
    async fn get_session_cost_reflects_connection_accumulator() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        conn.cumulative_spent_usd = 1.25;
        match dispatch(&state, &mut conn, ClientMessage::GetSessionCost {}).await.unwrap() {
            OpOutcome::Reply(ServerMessage::SessionCost { spent_usd }) => assert_eq!(spent_usd, 1.25),
            _ => panic!("expected session cost reply"),
        }
    }

    #[tokio::test]
    async fn get_daily_cost_reads_the_process_wide_aggregate() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        state.engine.daily_cost().add("u1", 3.5, Utc::now());
        match dispatch(&state, &mut conn, ClientMessage::GetDailyCost {}).await.unwrap() {
            OpOutcome::Reply(ServerMessage::DailyCost { spent_usd }) => assert_eq!(spent_usd, 3.5),
            _ => panic!("expected daily cost reply"),
        }
    }

    #[tokio::test]
    async fn set_budget_limit_overrides_the_connections_daily_cap() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        let outcome = dispatch(&state, &mut conn, ClientMessage::SetBudgetLimit { daily_cap_usd: 5.0 })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            OpOutcome::Reply(ServerMessage::BudgetLimitSet { daily_cap_usd }) if daily_cap_usd == 5.0
        ));
        assert_eq!(conn.daily_cap_override, Some(5.0));
    }

    #[tokio::test]
    async fn cancel_collaboration_is_a_no_op_when_nothing_is_running() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        assert!(!conn.is_running());
        let outcome = dispatch(&state, &mut conn, ClientMessage::CancelCollaboration {}).await.unwrap();
        assert!(matches!(outcome, OpOutcome::Reply(ServerMessage::Ack {})));
    }

    #[tokio::test]
    async fn command_frame_replies_with_an_out_of_scope_error() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        let outcome = dispatch(
            &state,
            &mut conn,
            ClientMessage::Command { command: "whoami".to_string(), args: vec![] },
        )
        .await
        .unwrap();
        match outcome {
            OpOutcome::Reply(ServerMessage::Error { message, .. }) => {
                assert!(message.contains("whoami"));
            }
            _ => panic!("expected an error reply for an out-of-scope command"),
        }
    }

    #[tokio::test]
    async fn set_collab_mode_and_style_are_acknowledged_and_sticky() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        dispatch(
            &state,
            &mut conn,
            ClientMessage::SetCollabMode { mode: CollaborationMode::RoundTable },
        )
        .await
        .unwrap();
        assert_eq!(conn.collab_mode, CollaborationMode::RoundTable);
    }

    fn chat_message(target: ChatTarget) -> ClientMessage {
        ClientMessage::Chat {
            target,
            message: "hi".to_string(),
            file_paths: vec![],
            models: Default::default(),
            collaboration_mode: None,
            sequential_style: None,
            collaboration_style: None,
            cost_cap_usd: None,
            deadline_seconds: None,
            ignore_failing_models: false,
        }
    }

    #[tokio::test]
    async fn chat_spawns_a_running_task_and_returns_no_immediate_reply() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();

        let outcome = dispatch(&state, &mut conn, chat_message(ChatTarget::Agent(Provider::Claude)))
            .await
            .unwrap();
        assert!(matches!(outcome, OpOutcome::None));
        assert!(conn.is_running());
        assert_eq!(conn.phase, ConnectionPhase::Active);
    }

    #[tokio::test]
    async fn second_chat_is_rejected_while_one_is_already_running() {
        let state = state();
        let (mut conn, _) = conn();
        dispatch(&state, &mut conn, ClientMessage::Authenticate { user_id: "u1".to_string() })
            .await
            .unwrap();
        dispatch(&state, &mut conn, chat_message(ChatTarget::Agent(Provider::Claude)))
            .await
            .unwrap();

        let err = dispatch(&state, &mut conn, chat_message(ChatTarget::Collab)).await.unwrap_err();
        assert!(matches!(err, CollabError::BadRequest(_)));

        if let Some(task) = conn.running_task.take() {
            task.abort();
        }
    }
}
