//! LLM Orchestrator - Entry Point

use llm_orchestrator::{
    BackendClient, Config, InMemoryVectorStore, QdrantStore, RequestGateway, Server, VectorStore,
};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    if std::env::args().any(|a| a == "--help" || a == "-h") {
        println!("LLM Orchestrator v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: llm-orchestrator");
        println!();
        println!("Environment variables:");
        println!("  FAST_BACKEND_URL     Fast chat backend (default: http://localhost:8002)");
        println!("  HEAVY_BACKEND_URL    Heavy chat backend (default: http://localhost:8000)");
        println!("  EMBEDDING_URL        Embedding backend (default: http://localhost:8001)");
        println!("  VECTOR_DB_URL        Qdrant REST endpoint, or memory:// (default: http://localhost:6333)");
        println!("  ORCHESTRATOR_PORT    HTTP port (default: 8080)");
        println!("  LOG_FORMAT           json or pretty (default: pretty)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("LLM Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Backends: fast={} heavy={} embedding={} vector_db={}",
        config.fast_backend_url, config.heavy_backend_url, config.embedding_url, config.vector_db_url
    );

    // One pooled client for every backend, shared with the vector store
    let backend = BackendClient::new(&config)?;
    let vectors: Arc<dyn VectorStore> = if config.uses_in_memory_vectors() {
        warn!("Using in-memory vector store; memory and knowledge are lost on restart");
        Arc::new(InMemoryVectorStore::new())
    } else {
        Arc::new(QdrantStore::new(
            backend.http(),
            &config.vector_db_url,
            config.embedding_timeout,
        ))
    };

    let gateway = Arc::new(RequestGateway::new(&config, Arc::new(backend), vectors));

    Server::new(config.socket_addr(), gateway, config.log_requests)
        .run()
        .await
}
