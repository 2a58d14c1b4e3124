//! Configuration management

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Vector database URL that selects the in-memory store
pub const IN_MEMORY_VECTOR_DB: &str = "memory://";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Fast chat backend (routing, reasoning, simple answers)
    pub fast_backend_url: String,
    pub fast_backend_model: String,

    /// Heavy chat backend (complex and factual answers)
    pub heavy_backend_url: String,
    pub heavy_backend_model: String,

    /// Embedding backend (`/v1/embeddings`)
    pub embedding_url: String,
    pub embedding_model: String,

    /// Fixed output dimension of the embedding backend
    pub embedding_dimension: usize,

    /// Vector database REST endpoint
    pub vector_db_url: String,
    pub memory_collection: String,
    pub knowledge_collection: String,

    /// Per-call-class timeouts
    pub router_timeout: Duration,
    pub embedding_timeout: Duration,
    pub llm_timeout: Duration,

    /// Budget for the optional reasoning step
    pub reasoning_timeout: Duration,

    /// Idle connections kept per backend host
    pub pool_max_idle_per_host: usize,

    /// Agent id stamped on memory records
    pub agent_id: String,

    /// Snippets pulled from memory per request
    pub memory_search_limit: usize,

    /// Knowledge chunks injected on the chat path
    pub knowledge_top_k: usize,

    /// Token budget for the reasoning step
    pub reasoning_max_tokens: u32,

    /// Retrieve knowledge for Complex routes as well as Factual
    pub rag_on_complex: bool,

    /// Allow one fallback to the other generation backend
    pub generation_fallback: bool,

    /// HTTP listener
    pub bind_addr: IpAddr,
    pub port: u16,

    /// Enable request logging
    pub log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fast_backend_url: "http://localhost:8002".to_string(),
            fast_backend_model: "qwen-2.5-1.5b".to_string(),
            heavy_backend_url: "http://localhost:8000".to_string(),
            heavy_backend_model: "gpt-oss-120b".to_string(),
            embedding_url: "http://localhost:8001".to_string(),
            embedding_model: "bge-m3".to_string(),
            embedding_dimension: 1024,
            vector_db_url: "http://localhost:6333".to_string(),
            memory_collection: "agent_memories".to_string(),
            knowledge_collection: "documents".to_string(),
            router_timeout: Duration::from_secs(10),
            embedding_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(120),
            reasoning_timeout: Duration::from_secs(20),
            pool_max_idle_per_host: 20,
            agent_id: "orchestrator".to_string(),
            memory_search_limit: 3,
            knowledge_top_k: 5,
            reasoning_max_tokens: 256,
            rag_on_complex: true,
            generation_fallback: false,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            log_requests: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = match std::env::var("ORCHESTRATOR_BIND_ADDR") {
            Ok(addr) => addr
                .parse()
                .with_context(|| format!("Invalid ORCHESTRATOR_BIND_ADDR: {}", addr))?,
            Err(_) => defaults.bind_addr,
        };

        Ok(Self {
            fast_backend_url: env_string("FAST_BACKEND_URL", defaults.fast_backend_url),
            fast_backend_model: env_string("FAST_BACKEND_MODEL", defaults.fast_backend_model),
            heavy_backend_url: env_string("HEAVY_BACKEND_URL", defaults.heavy_backend_url),
            heavy_backend_model: env_string("HEAVY_BACKEND_MODEL", defaults.heavy_backend_model),
            embedding_url: env_string("EMBEDDING_URL", defaults.embedding_url),
            embedding_model: env_string("EMBEDDING_MODEL", defaults.embedding_model),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension),
            vector_db_url: env_string("VECTOR_DB_URL", defaults.vector_db_url),
            memory_collection: env_string("MEMORY_COLLECTION", defaults.memory_collection),
            knowledge_collection: env_string("KNOWLEDGE_COLLECTION", defaults.knowledge_collection),
            router_timeout: env_secs("ROUTER_TIMEOUT_SECS", defaults.router_timeout),
            embedding_timeout: env_secs("EMBEDDING_TIMEOUT_SECS", defaults.embedding_timeout),
            llm_timeout: env_secs("LLM_TIMEOUT_SECS", defaults.llm_timeout),
            reasoning_timeout: env_secs("REASONING_TIMEOUT_SECS", defaults.reasoning_timeout),
            pool_max_idle_per_host: env_parse(
                "POOL_MAX_IDLE_PER_HOST",
                defaults.pool_max_idle_per_host,
            ),
            agent_id: env_string("ORCHESTRATOR_AGENT_ID", defaults.agent_id),
            memory_search_limit: env_parse("MEMORY_SEARCH_LIMIT", defaults.memory_search_limit),
            knowledge_top_k: env_parse("KNOWLEDGE_TOP_K", defaults.knowledge_top_k),
            reasoning_max_tokens: env_parse("REASONING_MAX_TOKENS", defaults.reasoning_max_tokens),
            rag_on_complex: env_flag("RAG_ON_COMPLEX", defaults.rag_on_complex),
            generation_fallback: env_flag("GENERATION_FALLBACK", defaults.generation_fallback),
            bind_addr,
            port: env_parse("ORCHESTRATOR_PORT", defaults.port),
            log_requests: env_flag("ORCHESTRATOR_LOG_REQUESTS", defaults.log_requests),
        })
    }

    /// `VECTOR_DB_URL=memory://` selects the process-local vector store
    pub fn uses_in_memory_vectors(&self) -> bool {
        self.vector_db_url.trim().eq_ignore_ascii_case(IN_MEMORY_VECTOR_DB)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
