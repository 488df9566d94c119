use hitl_trading_agent::{
    checkpoint::build_checkpoint_store,
    config::AgentConfig,
    gateway::{GeminiGateway, KeywordGateway, ModelGateway},
    graph::ExecutionGraph,
    shell::run_shell,
    tools::{create_default_registry, trading::TradeLedger},
};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::from_env()?;
    info!(thread_id = %config.thread_id, "Trading agent shell starting");

    let gateway: Box<dyn ModelGateway> = match &config.gemini_api_key {
        Some(key) => {
            info!(model = %config.gemini_model, "Model backend: gemini");
            Box::new(GeminiGateway::new(key.clone(), config.gemini_model.clone())?)
        }
        None => {
            warn!("GEMINI_API_KEY not set; using the offline keyword model");
            Box::new(KeywordGateway::new())
        }
    };

    let registry = create_default_registry(&config, TradeLedger::new())?;
    let store = build_checkpoint_store(&config);
    let graph = ExecutionGraph::new(gateway, registry, store)
        .with_max_model_turns(config.max_model_turns);

    run_shell(
        &graph,
        &config.thread_id,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    Ok(())
}
