//! End-to-end workflow-engine scenarios (spec §8), driven against wiremock
//! HTTP servers standing in for provider back-ends. Each `TestAdapter`
//! speaks a minimal SSE dialect of its own — one `data: ...` line per
//! `"\n\n"`-delimited block, with a `__usage__:<in>:<out>` sentinel line for
//! token accounting — rather than a real vendor wire shape, since the
//! per-vendor shapes are already covered by the `collab-providers-*` crates'
//! own tests.

use collab_core::client::HttpChatProvider;
use collab_core::{
    CollabError, CollaborationMode, CollaborationOptions, ConcurrencyManager, DailyCostAggregate, EventBus,
    EventType, KeyStore, Provider, ProviderClientRegistry, StreamChunk, Usage, WorkflowEngine,
};
use http::Request;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestAdapter {
    provider: Provider,
    base_url: Url,
}

impl HttpChatProvider for TestAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_base_url(&self) -> Url {
        self.base_url.clone()
    }

    fn build_request(
        &self,
        base_url: &Url,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Request<Vec<u8>>, CollabError> {
        let uri = base_url.join("/v1/chat").unwrap().to_string();
        let body = serde_json::json!({
            "model": model,
            "system": system_prompt,
            "prompt": user_prompt,
        })
        .to_string();
        Ok(Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", api_key)
            .body(body.into_bytes())
            .unwrap())
    }

    fn parse_stream_chunk(&self, event: &[u8]) -> Result<Vec<StreamChunk>, CollabError> {
        let text = String::from_utf8_lossy(event);
        let mut out = Vec::new();
        for line in text.lines() {
            let Some(rest) = line.trim().strip_prefix("data: ") else {
                continue;
            };
            if rest == "[DONE]" {
                continue;
            }
            if let Some(usage) = rest.strip_prefix("__usage__:") {
                let mut parts = usage.split(':');
                let input_tokens: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
                let output_tokens: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
                out.push(StreamChunk::Usage(Usage { input_tokens, output_tokens }));
            } else {
                out.push(StreamChunk::Text(rest.to_string()));
            }
        }
        Ok(out)
    }
}

/// SSE body of the form `"data: <line>\n\n"` repeated, one block per line.
fn sse_body(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("data: {l}\n\n")).collect()
}

async fn mount_agent(provider: Provider, lines: &[&str]) -> (MockServer, Arc<TestAdapter>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(lines), "text/event-stream"))
        .mount(&server)
        .await;
    let base_url = Url::parse(&server.uri()).unwrap();
    (server, Arc::new(TestAdapter { provider, base_url }))
}

struct StoredKeys(HashMap<Provider, String>);
impl KeyStore for StoredKeys {
    fn stored_key(&self, _user_id: &str, provider: Provider) -> Option<String> {
        self.0.get(&provider).cloned()
    }
}

fn base_options(mode: CollaborationMode, agents: Vec<Provider>) -> CollaborationOptions {
    CollaborationOptions {
        prompt: "What is the best approach to caching?".to_string(),
        mode,
        requested_agents: agents,
        model_ids: HashMap::new(),
        cost_cap_usd: 5.0,
        deadline_seconds: 30,
        ignore_failing_models: true,
        sequential_style: None,
        collaboration_style: None,
        user_id: "u1".to_string(),
        session_id: uuid::Uuid::new_v4().to_string(),
        context_history: String::new(),
        daily_cap_usd_override: None,
    }
}

fn engine_with(adapters: Vec<Arc<TestAdapter>>, keys: HashMap<Provider, String>) -> (WorkflowEngine, Arc<EventBus>) {
    let adapters: Vec<Arc<dyn HttpChatProvider>> = adapters.into_iter().map(|a| a as Arc<dyn HttpChatProvider>).collect();
    let registry = Arc::new(ProviderClientRegistry::new(adapters, Arc::new(StoredKeys(keys))));
    let event_bus = Arc::new(EventBus::new());
    let concurrency = Arc::new(ConcurrencyManager::new(3));
    let daily_cost = Arc::new(DailyCostAggregate::new());
    (
        WorkflowEngine::new(registry, event_bus.clone(), concurrency, daily_cost, 1000.0),
        event_bus,
    )
}

/// S1: individual mode, single agent, happy path.
#[tokio::test]
async fn individual_mode_single_agent_happy_path() {
    let (_server, adapter) = mount_agent(Provider::Claude, &["Use a write-through cache.", " It balances latency and consistency.", "__usage__:20:40"]).await;
    let mut keys = HashMap::new();
    keys.insert(Provider::Claude, "test-key".to_string());
    let (engine, event_bus) = engine_with(vec![adapter], keys);

    let mut rx = event_bus.subscribe("s-individual");
    let mut options = base_options(CollaborationMode::Individual, vec![Provider::Claude]);
    options.session_id = "s-individual".to_string();

    let result = engine.run(options).await;

    assert!(result.final_text.contains("write-through cache"));
    assert!(result.final_text.contains("balances latency"));
    assert!(result.spent_usd > 0.0, "usage chunk should have produced nonzero spend");

    // No phase events for individual mode's single "phase" fan-out beyond
    // the shared skeleton's terminal pair, but agent events must appear.
    let mut saw_thinking = false;
    let mut saw_complete = false;
    let mut saw_result = false;
    let mut saw_complete_terminal = false;
    while let Ok(event) = rx.try_recv() {
        match event.event_type {
            EventType::AgentThinking => saw_thinking = true,
            EventType::AgentResponseComplete => saw_complete = true,
            EventType::CollaborationResult => saw_result = true,
            EventType::CollaborationComplete => saw_complete_terminal = true,
            _ => {}
        }
    }
    assert!(saw_thinking && saw_complete && saw_result && saw_complete_terminal);
}

/// S2: round-table with one agent missing its key; the other two still
/// produce a synthesized result, and the unavailable agent is simply
/// excluded rather than surfaced as a failure.
#[tokio::test]
async fn round_table_runs_with_missing_agent_excluded() {
    // Claude is also the largest-context agent among the surviving
    // candidates, so its canned response has to double as a plausible
    // synthesis answer too (the mock can't distinguish draft/critique/vote/
    // synthesis calls — they all hit the same endpoint).
    let (_claude_server, claude) = mount_agent(
        Provider::Claude,
        &[
            "FINAL ANSWER: A layered cache with a short TTL works well.",
            "RATIONALE: Balances hit rate against staleness.",
            "__usage__:30:60",
        ],
    )
    .await;
    let (_chatgpt_server, chatgpt) = mount_agent(
        Provider::Chatgpt,
        &["I'd reach for an LRU cache in front of the database.", "__usage__:30:60"],
    )
    .await;

    // Gemini is requested but has no adapter registered in this registry at
    // all (no client), so it must be filtered out before the workflow engine
    // ever sees it — the same outcome `NoKey` would produce.
    let mut keys = HashMap::new();
    keys.insert(Provider::Claude, "claude-key".to_string());
    keys.insert(Provider::Chatgpt, "chatgpt-key".to_string());

    let (engine, event_bus) = engine_with(vec![claude, chatgpt], keys);
    let mut rx = event_bus.subscribe("s-round-table");
    let mut options = base_options(
        CollaborationMode::RoundTable,
        vec![Provider::Claude, Provider::Gemini, Provider::Chatgpt],
    );
    options.session_id = "s-round-table".to_string();

    let result = engine.run(options).await;

    assert!(!result.final_text.to_lowercase().contains("error"));
    assert!(result.rationale.is_some(), "round_table synthesis should split out a rationale");

    let vote_events = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| e.event_type == EventType::AgentVote)
        .count();
    assert_eq!(vote_events, 2, "each surviving agent should cast exactly one vote event");
}

/// S3: a cost cap that a per-call usage report exceeds mid-draft. The
/// pre-flight estimate (input-char heuristic, 500-token assumed output) must
/// stay under the cap so the abort happens after the call, not before it.
#[tokio::test]
async fn cost_cap_triggers_mid_call_abort() {
    let (_server, adapter) = mount_agent(
        Provider::Claude,
        &["Partial answer before the cap bites.", "__usage__:10:2000"],
    )
    .await;
    let mut keys = HashMap::new();
    keys.insert(Provider::Claude, "test-key".to_string());
    let (engine, _event_bus) = engine_with(vec![adapter], keys);

    let mut options = base_options(CollaborationMode::Individual, vec![Provider::Claude]);
    options.session_id = "s-cost-cap".to_string();
    // Claude: $0.003/1k in, $0.015/1k out. Pre-flight estimate for a short
    // prompt is a few cents at most; 2000 output tokens reported mid-stream
    // costs $0.03, comfortably above this cap.
    options.cost_cap_usd = 0.01;

    let result = engine.run(options).await;

    assert!(
        result.final_text.to_lowercase().contains("cost") || result.final_text.to_lowercase().contains("budget"),
        "expected a cost-related abort message, got: {}",
        result.final_text
    );
}

/// A cap so low even the pre-flight heuristic refuses to start: the
/// collaboration must abort before issuing any HTTP call at all.
#[tokio::test]
async fn cost_cap_rejects_before_any_call_when_estimate_exceeds_it() {
    let (server, adapter) = mount_agent(Provider::Claude, &["should never be requested"]).await;
    let mut keys = HashMap::new();
    keys.insert(Provider::Claude, "test-key".to_string());
    let (engine, _event_bus) = engine_with(vec![adapter], keys);

    let mut options = base_options(CollaborationMode::Individual, vec![Provider::Claude]);
    options.session_id = "s-preflight-cap".to_string();
    options.cost_cap_usd = 0.0000001;

    let result = engine.run(options).await;

    assert_eq!(result.spent_usd, 0.0);
    assert!(result.final_text.to_lowercase().contains("budget"));
    assert_eq!(server.received_requests().await.unwrap().len(), 0, "no HTTP call should have been made");
}

/// §8 invariant 1 + round-trip: setting the mode and reading it back is
/// idempotent, and the terminal event pair is always exactly one of each,
/// with `collaboration_complete` last.
#[tokio::test]
async fn terminal_events_are_exactly_one_pair_in_order() {
    let (_server, adapter) = mount_agent(Provider::Claude, &["answer", "__usage__:5:5"]).await;
    let mut keys = HashMap::new();
    keys.insert(Provider::Claude, "test-key".to_string());
    let (engine, event_bus) = engine_with(vec![adapter], keys);

    let mut rx = event_bus.subscribe("s-terminal");
    let mut options = base_options(CollaborationMode::Individual, vec![Provider::Claude]);
    options.session_id = "s-terminal".to_string();
    engine.run(options).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.event_type);
    }
    let result_count = events.iter().filter(|e| **e == EventType::CollaborationResult).count();
    let complete_count = events.iter().filter(|e| **e == EventType::CollaborationComplete).count();
    assert_eq!(result_count, 1);
    assert_eq!(complete_count, 1);
    assert_eq!(events.last(), Some(&EventType::CollaborationComplete));
}
