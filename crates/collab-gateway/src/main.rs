//! Session Gateway binary (C10): the WebSocket front door that turns client
//! requests into Workflow Engine runs and streams Event Bus traffic back out.

mod config;
mod session;
mod wire;
mod ws;

use collab_core::{
    ConcurrencyManager, ContextStore, DailyCostAggregate, EventBus, HttpChatProvider, NoStoredKeys,
    Provider, ProviderClientRegistry, WorkflowEngine,
};
use collab_providers_claude::ClaudeProvider;
use collab_providers_gemini::GeminiProvider;
use collab_providers_openai_compat::OpenAiCompatProvider;
use config::GatewayConfig;
use session::GatewayState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    collab_utils::telemetry::setup_telemetry("collab_gateway");

    let config = GatewayConfig::from_env();

    let adapters: Vec<Arc<dyn HttpChatProvider>> = vec![
        Arc::new(ClaudeProvider),
        Arc::new(GeminiProvider),
        Arc::new(OpenAiCompatProvider::new(Provider::Chatgpt)),
        Arc::new(OpenAiCompatProvider::new(Provider::Grok)),
        Arc::new(OpenAiCompatProvider::new(Provider::Deepseek)),
        Arc::new(OpenAiCompatProvider::new(Provider::Llama)),
    ];

    let registry = Arc::new(ProviderClientRegistry::new(adapters, Arc::new(NoStoredKeys)));
    let event_bus = Arc::new(EventBus::new());
    let concurrency = Arc::new(ConcurrencyManager::new(config.per_provider_concurrency));
    let context_store = Arc::new(ContextStore::with_default_max_size(config.default_max_context_size));
    let daily_cost = Arc::new(DailyCostAggregate::new());

    let engine = Arc::new(WorkflowEngine::new(
        registry.clone(),
        event_bus.clone(),
        concurrency.clone(),
        daily_cost,
        config.default_daily_cap_usd,
    ));

    let state = GatewayState {
        engine,
        registry,
        event_bus,
        context_store,
        config: config.clone(),
    };

    let app = ws::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "collaboration gateway listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
