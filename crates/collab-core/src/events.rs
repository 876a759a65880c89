use crate::provider::Provider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Authoritative event-type enumeration (§4.5). Publishers: Workflow Engine
/// and Streaming Adapter. Subscriber: Session Gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhaseStart,
    AgentThinking,
    AgentThought,
    AgentResponseComplete,
    AgentVote,
    AgentRetry,
    ProgressUpdate,
    CollaborationResult,
    CollaborationComplete,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Hands out monotonically non-decreasing timestamps even if the wall clock
/// is queried twice within the same tick.
struct MonotonicClock {
    last_nanos: AtomicI64,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            last_nanos: AtomicI64::new(Utc::now().timestamp_nanos_opt().unwrap_or(0)),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let candidate = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let mut prev = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev + 1);
            match self
                .last_nanos
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return DateTime::from_timestamp_nanos(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Session-scoped publish/subscribe channel. Channel names are derived as
/// `collab:<sessionId>`; delivery is at-least-once within this process.
pub struct EventBus {
    clock: MonotonicClock,
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            clock: MonotonicClock::new(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn channel_name(session_id: &str) -> String {
        format!("collab:{session_id}")
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<Event> {
        let name = Self::channel_name(session_id);
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(name)
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    pub fn publish(
        &self,
        session_id: &str,
        event_type: EventType,
        provider: Option<Provider>,
        phase: Option<&str>,
        payload: Value,
    ) {
        let name = Self::channel_name(session_id);
        let event = Event {
            event_type,
            provider,
            phase: phase.map(|s| s.to_string()),
            payload,
            timestamp: self.clock.now(),
        };
        let sender = {
            let mut channels = self.channels.write().unwrap();
            channels.entry(name).or_insert_with(|| broadcast::channel(256).0).clone()
        };
        // No subscriber is not an error: a collaboration can run before the
        // gateway has finished attaching its forwarding task.
        let _ = sender.send(event);
    }

    pub fn drop_channel(&self, session_id: &str) {
        self.channels.write().unwrap().remove(&Self::channel_name(session_id));
    }
}
