use hitl_trading_agent::{
    api::start_server,
    checkpoint::build_checkpoint_store,
    config::AgentConfig,
    gateway::{GeminiGateway, KeywordGateway, ModelGateway},
    graph::ExecutionGraph,
    tools::{create_default_registry, trading::TradeLedger},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;

    info!("🚀 HITL Trading Agent - API Server");
    info!("📍 Port: {}", config.api_port);

    let gateway: Box<dyn ModelGateway> = match &config.gemini_api_key {
        Some(key) => Box::new(GeminiGateway::new(key.clone(), config.gemini_model.clone())?),
        None => {
            warn!("⚠️  GEMINI_API_KEY not set; using the offline keyword model");
            Box::new(KeywordGateway::new())
        }
    };

    let registry = create_default_registry(&config, TradeLedger::new())?;
    let store = build_checkpoint_store(&config);

    let graph = Arc::new(
        ExecutionGraph::new(gateway, registry, store)
            .with_max_model_turns(config.max_model_turns),
    );

    info!("✅ Execution graph initialized");
    info!("📡 Starting API server...");

    start_server(graph, config.api_port).await?;

    Ok(())
}
