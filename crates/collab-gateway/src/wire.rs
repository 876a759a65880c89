//! JSON wire protocol between a gateway connection and its client (§6).
//! Every inbound and outbound frame carries a `type` discriminator. One
//! connection binds to exactly one session for its lifetime (§9: sessions
//! are not re-attachable across reconnects) and may run at most one
//! collaboration at a time on that session.

use collab_core::{CollaborationMode, CollaborationStyle, ContextMode, Provider, SequentialStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `target` of a `chat` frame: either a single provider for a direct,
/// uncollaborated exchange, or the literal `"collab"` to run the full
/// Workflow Engine across the requested agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTarget {
    Collab,
    Agent(Provider),
}

impl<'de> Deserialize<'de> for ChatTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw == "collab" {
            return Ok(ChatTarget::Collab);
        }
        Provider::from_str_loose(&raw)
            .map(ChatTarget::Agent)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown chat target: {raw}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must precede every other frame except `ping` (§6).
    Authenticate {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Chat {
        target: ChatTarget,
        message: String,
        #[serde(default, rename = "filePaths")]
        file_paths: Vec<String>,
        #[serde(default)]
        models: HashMap<Provider, Vec<String>>,
        /// Falls back to the session's current mode (set by `set_collab_mode`,
        /// or `individual` by default) when omitted, so a client that called
        /// `set_collab_mode` once doesn't have to repeat it on every `chat`.
        #[serde(default, rename = "collaborationMode")]
        collaboration_mode: Option<CollaborationMode>,
        #[serde(default, rename = "sequentialStyle")]
        sequential_style: Option<SequentialStyle>,
        #[serde(default, rename = "collaborationStyle")]
        collaboration_style: Option<CollaborationStyle>,
        #[serde(default, rename = "costCapUsd")]
        cost_cap_usd: Option<f64>,
        #[serde(default, rename = "deadlineSeconds")]
        deadline_seconds: Option<u64>,
        #[serde(default, rename = "ignoreFailingModels")]
        ignore_failing_models: bool,
    },
    /// Out of scope for this engine (§4.10: "delegate to external CLI
    /// collaborator"); acknowledged with a `response` frame that says so
    /// rather than silently dropped.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    SetCollabMode {
        #[serde(rename = "collaborationMode")]
        mode: CollaborationMode,
    },
    SetCollabStyle {
        #[serde(rename = "collaborationStyle")]
        style: CollaborationStyle,
    },
    CancelCollaboration {},
    ContextStatus {},
    ResetContext {},
    TrimContext {},
    SetMaxContextSize {
        #[serde(rename = "maxSize")]
        max_size: usize,
    },
    SetContextMode {
        #[serde(rename = "contextMode")]
        mode: ContextMode,
    },
    GetSessionCost {},
    GetDailyCost {},
    SetBudgetLimit {
        #[serde(rename = "dailyCapUsd")]
        daily_cap_usd: f64,
    },
    Ping {},
    DebugPing {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        start: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<bool>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    ModelStatus {
        provider: Provider,
        status: String,
    },
    ProgressUpdate {
        phase: String,
        #[serde(rename = "currentStep")]
        current_step: u32,
        #[serde(rename = "totalSteps")]
        total_steps: u32,
        percentage: f64,
    },
    PhaseChange {
        phase: String,
    },
    CostInfo {
        #[serde(rename = "capUsd")]
        cap_usd: f64,
        #[serde(rename = "spentUsd")]
        spent_usd: f64,
    },
    BudgetExceeded {
        message: String,
    },
    SessionCost {
        #[serde(rename = "spentUsd")]
        spent_usd: f64,
    },
    DailyCost {
        #[serde(rename = "spentUsd")]
        spent_usd: f64,
    },
    BudgetLimitSet {
        #[serde(rename = "dailyCapUsd")]
        daily_cap_usd: f64,
    },
    ContextStatus {
        #[serde(rename = "messageCount")]
        message_count: usize,
        #[serde(rename = "contextSize")]
        context_size: usize,
        #[serde(rename = "maxContextSize")]
        max_context_size: usize,
        mode: ContextMode,
    },
    Pong {},
    Ack {},
}

/// Translates one internal [`collab_core::Event`] into the external frame
/// shape it corresponds to (§6). Returns `None` for event/field combinations
/// that carry no externally-meaningful payload (none exist today, but the
/// `Option` return keeps the mapping total against future event variants).
pub fn translate_event(event: &collab_core::Event) -> Option<ServerMessage> {
    use collab_core::EventType;
    match event.event_type {
        EventType::PhaseStart => Some(ServerMessage::PhaseChange {
            phase: event.phase.clone().unwrap_or_default(),
        }),
        EventType::AgentThinking => event.provider.map(|provider| ServerMessage::ModelStatus {
            provider,
            status: "thinking".to_string(),
        }),
        EventType::AgentThought => event.provider.map(|provider| ServerMessage::Response {
            target: provider.as_str().to_string(),
            content: event.payload.get("text").and_then(|v| v.as_str()).map(str::to_string),
            start: Some(true),
            end: None,
            summary: None,
        }),
        EventType::AgentResponseComplete => event.provider.map(|provider| ServerMessage::Response {
            target: provider.as_str().to_string(),
            content: None,
            start: None,
            end: Some(true),
            summary: None,
        }),
        EventType::AgentVote => event.provider.map(|provider| ServerMessage::ModelStatus {
            provider,
            status: "voted".to_string(),
        }),
        EventType::AgentRetry => event.provider.map(|provider| ServerMessage::ModelStatus {
            provider,
            status: "retrying".to_string(),
        }),
        EventType::ProgressUpdate => Some(ServerMessage::ProgressUpdate {
            phase: event.phase.clone().unwrap_or_default(),
            current_step: event.payload.get("currentStep").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_steps: event.payload.get("totalSteps").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            percentage: event.payload.get("percentage").and_then(|v| v.as_f64()).unwrap_or(0.0),
        }),
        EventType::CollaborationResult => Some(ServerMessage::Response {
            target: "collab".to_string(),
            content: event.payload.get("final").and_then(|v| v.as_str()).map(str::to_string),
            start: None,
            end: None,
            summary: Some(true),
        }),
        EventType::CollaborationComplete => Some(ServerMessage::Response {
            target: "collab".to_string(),
            content: None,
            start: None,
            end: Some(true),
            summary: None,
        }),
    }
}

/// Connection-lifecycle phase (§4.10): `Connecting -> Authenticated -> Active`,
/// with `Authenticated -> Degraded` on a persistence-layer failure and any
/// state `-> Closed` on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticated,
    Active,
    Degraded,
    Closed,
}

/// Per-connection state the Session Gateway tracks outside the wire protocol.
/// A connection is bound to one session for its whole lifetime; a
/// collaboration on that session is not re-attachable after a disconnect (§9
/// open question 3), which `Drop` enforces by aborting whatever is running.
pub struct ConnectionState {
    pub user_id: Option<String>,
    pub phase: ConnectionPhase,
    pub session_id: String,
    pub collab_mode: CollaborationMode,
    pub collab_style: Option<CollaborationStyle>,
    pub sequential_style: Option<SequentialStyle>,
    pub daily_cap_override: Option<f64>,
    pub cumulative_spent_usd: f64,
    pub missed_pings: u32,
    pub running_task: Option<tokio::task::JoinHandle<()>>,
}

impl ConnectionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            phase: ConnectionPhase::Connecting,
            session_id: session_id.into(),
            collab_mode: CollaborationMode::Individual,
            collab_style: None,
            sequential_style: None,
            daily_cap_override: None,
            cumulative_spent_usd: 0.0,
            missed_pings: 0,
            running_task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_task.is_some()
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        if let Some(task) = self.running_task.take() {
            task.abort();
        }
    }
}
