//! Multi-provider collaboration engine.
//!
//! Wires together the streaming adapter contract, cost governor, concurrency
//! and deadline manager, retry policy, prompt assembler, context store and
//! the workflow engine that drives the named collaboration modes on top of
//! them.

pub mod chat;
pub mod client;
pub mod concurrency;
pub mod context;
pub mod cost;
pub mod error;
pub mod events;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod streaming;
pub mod workflow;

pub use chat::{ChatMessage, ChatRole, FinishReason, StreamChunk, Usage};
pub use client::{AgentClient, ClientError, HttpChatProvider, KeyStore, NoStoredKeys, ProviderClientRegistry};
pub use concurrency::{ConcurrencyManager, DeadlineManager};
pub use context::{Context, ContextMode, ContextStore, NearLimitSignal};
pub use cost::{CostTracker, DailyCostAggregate};
pub use error::CollabError;
pub use events::{Event, EventBus, EventType};
pub use prompt::{AssembledPrompt, CollaborationStyle, PromptAssembler};
pub use provider::{largest_context_agent, Provider, PROVIDER_ORDER};
pub use workflow::{CollaborationMode, CollaborationOptions, CollaborationResult, SequentialStyle, WorkflowEngine};
