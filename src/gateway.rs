//! Request Gateway
//!
//! Validates inbound requests and runs the chat pipeline in strict order:
//!
//! ```text
//! memory-retrieve → reason → route → [retrieve-knowledge] → generate → memory-store
//! ```
//!
//! Routing and generation are required; everything else degrades to a
//! skipped outcome and the pipeline carries on. The gateway owns no durable
//! state: collaborators are built once and injected.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{Backend, BackendKind, ChatMessage, ServiceHealth};
use crate::config::Config;
use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::generator::{GenerationError, GenerationInput, Generator};
use crate::knowledge::{KnowledgeError, KnowledgeRetriever};
use crate::memory::MemoryStore;
use crate::pipeline::{
    PipelineRequest, PipelineResponse, PipelineState, SkipReason, StageOutcome,
};
use crate::reasoner::{Reasoner, Reasoning};
use crate::router::{RouteDecision, Router};
use crate::tokenizer::TokenCounter;
use crate::vector::{Payload, VectorStore};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 100;

/// Reasoning kept in memory metadata
const THINKING_SUMMARY_CHARS: usize = 200;

const ALLOWED_ROLES: [&str; 5] = ["system", "developer", "user", "assistant", "tool"];

/// Gateway failure, split by who is at fault
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed request; nothing ran
    #[error("{0}")]
    Validation(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Indexing failed: {0}")]
    Indexing(KnowledgeError),
}

impl GatewayError {
    /// Caller error (4xx) rather than a downstream fault (5xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::Validation(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::Generation(_) => "generation_error",
            GatewayError::Embedding(_) => "embedding_error",
            GatewayError::Indexing(_) => "indexing_error",
        }
    }
}

impl From<KnowledgeError> for GatewayError {
    fn from(err: KnowledgeError) -> Self {
        if err.is_invalid_input() {
            GatewayError::Validation(err.to_string())
        } else {
            GatewayError::Indexing(err)
        }
    }
}

// ── Operation inputs / outputs ───────────────────────────────────────────────

/// Chat request as sent by OpenAI-compatible clients
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatInput {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryInput {
    pub query: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub use_rag: Option<bool>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Exact-match metadata filter on knowledge chunks
    #[serde(default)]
    pub filter: Option<HashMap<String, Value>>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub response: String,
    pub model_used: String,
    pub rag_used: bool,
    pub context_chunks: usize,
    /// Retrieved chunk texts, in rank order
    pub contexts: Vec<String>,
    pub latency_ms: f64,
    pub route_decision: RouteDecision,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedInput {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexInput {
    pub documents: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Vec<Payload>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexOutput {
    pub indexed_count: usize,
    pub collection: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub url: String,
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` when every service answers, else `degraded`
    pub status: &'static str,
    pub services: BTreeMap<String, ServiceStatus>,
}

impl HealthReport {
    fn from_probes(probes: Vec<ServiceHealth>) -> Self {
        let healthy = probes.iter().all(|p| p.reachable);
        Self {
            status: if healthy { "healthy" } else { "degraded" },
            services: probes
                .into_iter()
                .map(|p| {
                    (
                        p.name,
                        ServiceStatus {
                            url: p.url,
                            reachable: p.reachable,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Pipeline knobs taken from configuration
#[derive(Debug, Clone)]
struct GatewayOptions {
    agent_id: String,
    memory_search_limit: usize,
    knowledge_top_k: usize,
    rag_on_complex: bool,
}

/// Orchestrates the per-request pipeline
pub struct RequestGateway {
    backend: Arc<dyn Backend>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingService>,
    memory: MemoryStore,
    knowledge: KnowledgeRetriever,
    reasoner: Reasoner,
    router: Router,
    generator: Generator,
    tokens: TokenCounter,
    options: GatewayOptions,
}

impl RequestGateway {
    /// Wire every stage over the shared backend client and vector store
    pub fn new(config: &Config, backend: Arc<dyn Backend>, vectors: Arc<dyn VectorStore>) -> Self {
        let embeddings = Arc::new(EmbeddingService::new(
            backend.clone(),
            config.embedding_dimension,
        ));

        Self {
            memory: MemoryStore::new(
                embeddings.clone(),
                vectors.clone(),
                config.memory_collection.clone(),
            ),
            knowledge: KnowledgeRetriever::new(
                embeddings.clone(),
                vectors.clone(),
                config.knowledge_collection.clone(),
            ),
            reasoner: Reasoner::new(
                backend.clone(),
                config.reasoning_max_tokens,
                config.reasoning_timeout,
            ),
            router: Router::new(backend.clone()),
            generator: Generator::new(backend.clone(), config.generation_fallback),
            tokens: TokenCounter::new(),
            options: GatewayOptions {
                agent_id: config.agent_id.clone(),
                memory_search_limit: config.memory_search_limit,
                knowledge_top_k: config.knowledge_top_k,
                rag_on_complex: config.rag_on_complex,
            },
            backend,
            vectors,
            embeddings,
        }
    }

    /// Check a chat request and normalize it; nothing runs before this passes
    pub fn validate(&self, input: ChatInput) -> Result<PipelineRequest, GatewayError> {
        if input.messages.is_empty() {
            return Err(GatewayError::Validation("messages field is required".into()));
        }
        if input.stream == Some(true) {
            return Err(GatewayError::Validation("stream=true is not supported".into()));
        }

        if let Some(bad) = input
            .messages
            .iter()
            .find(|m| !ALLOWED_ROLES.contains(&m.role.as_str()))
        {
            return Err(GatewayError::Validation(format!(
                "Unsupported message role: {}",
                bad.role
            )));
        }

        let latest_user = input
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| {
                GatewayError::Validation("At least one user message required".into())
            })?;
        if latest_user.content.trim().is_empty() {
            return Err(GatewayError::Validation(
                "Last user message must not be empty".into(),
            ));
        }

        let temperature = input.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(GatewayError::Validation(format!(
                "temperature must be between 0 and 2, got {}",
                temperature
            )));
        }

        let max_tokens = input.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(GatewayError::Validation("max_tokens must be positive".into()));
        }

        let requested_model = input
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.backend.model_name(BackendKind::Heavy).to_string());

        let isolation_key = input
            .user
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("session-{}", short_id()));

        Ok(PipelineRequest {
            messages: input.messages,
            requested_model,
            temperature,
            max_tokens,
            isolation_key,
        })
    }

    /// Validate and run the chat pipeline
    pub async fn chat(&self, input: ChatInput) -> Result<PipelineResponse, GatewayError> {
        let request = self.validate(input)?;
        self.run(request).await
    }

    /// Run the pipeline for a validated request
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResponse, GatewayError> {
        let request_id = short_id();
        let span = info_span!("chat", request_id = %request_id, user = %request.isolation_key);

        self.run_stages(request_id, request).instrument(span).await
    }

    async fn run_stages(
        &self,
        request_id: String,
        request: PipelineRequest,
    ) -> Result<PipelineResponse, GatewayError> {
        let started = Instant::now();
        let mut state = PipelineState::New;
        let mut skipped: Vec<(PipelineState, SkipReason)> = Vec::new();

        info!(
            "Chat request: {} messages, model={}, temperature={}, max_tokens={}",
            request.messages.len(),
            request.requested_model,
            request.temperature,
            request.max_tokens
        );

        let query = request.latest_user_message().unwrap_or_default().to_string();
        let key = request.isolation_key.as_str();

        // Memory
        let memories = self
            .memory
            .recall(
                &query,
                key,
                Some(&self.options.agent_id),
                self.options.memory_search_limit,
            )
            .await;
        stage_done(&mut state, PipelineState::MemoryRetrieved, &memories, &mut skipped);
        let snippets = memories.value().cloned().unwrap_or_default();

        // Reasoning
        let reasoning = self.reasoner.enrich(&query, &snippets).await;
        stage_done(&mut state, PipelineState::Reasoned, &reasoning, &mut skipped);
        let enriched_query = reasoning
            .value()
            .map(|r| r.enriched_query.clone())
            .unwrap_or_else(|| query.clone());

        // Routing
        let route = self.router.classify(&enriched_query).await;
        advance(&mut state, PipelineState::Routed);

        // Knowledge
        let knowledge = if self.wants_knowledge(route) {
            self.knowledge
                .retrieve(&enriched_query, self.options.knowledge_top_k, None)
                .await
        } else {
            StageOutcome::not_required(format!("{} route", route))
        };
        stage_done(&mut state, PipelineState::ContextRetrieved, &knowledge, &mut skipped);

        // Generation
        let input = GenerationInput {
            enriched_query,
            conversation: request.conversation().cloned().collect(),
            memory_context: memories.value().map(|m| m.join("\n")),
            thoughts: reasoning.value().map(|r: &Reasoning| r.thoughts.clone()),
            knowledge_context: knowledge
                .value()
                .and_then(|chunks| KnowledgeRetriever::context_block(chunks)),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let generation = match self.generator.generate(route, &input).await {
            Ok(generation) => generation,
            Err(e) => {
                advance(&mut state, PipelineState::Failed);
                warn!(
                    "Request failed after {}ms: {}",
                    started.elapsed().as_millis(),
                    e
                );
                return Err(e.into());
            }
        };
        advance(&mut state, PipelineState::Generated);

        // Memory write, awaited before responding
        let thinking_summary: String = input
            .thoughts
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(THINKING_SUMMARY_CHARS)
            .collect();
        let mut metadata = Payload::new();
        metadata.insert("route_decision".into(), json!(route.as_str()));
        metadata.insert("model_used".into(), json!(generation.model));
        metadata.insert("thinking".into(), Value::String(thinking_summary));

        let stored = StageOutcome::from_result(
            self.memory
                .add(
                    key,
                    Some(&self.options.agent_id),
                    &format!("{} {}", query, generation.text),
                    metadata,
                )
                .await,
        );
        if let Some(reason) = stored.skip_reason() {
            warn!("Memory write skipped: {}", reason);
        }
        stage_done(&mut state, PipelineState::Stored, &stored, &mut skipped);

        advance(&mut state, PipelineState::Responded);

        let latency_ms = started.elapsed().as_millis() as u64;
        let usage = self
            .tokens
            .usage(generation.usage, &request.messages, &generation.text);

        info!(
            "Request complete: route={}, model={}, fallback={}, memory={}, rag={}, thinking={}, latency={}ms",
            route,
            generation.model,
            generation.fell_back,
            memories.is_succeeded(),
            knowledge.is_succeeded(),
            reasoning.is_succeeded(),
            latency_ms
        );

        Ok(PipelineResponse {
            request_id,
            text: generation.text,
            route,
            backend: generation.backend,
            model_used: generation.model,
            requested_model: request.requested_model,
            memory_used: memories.is_succeeded(),
            rag_used: knowledge.is_succeeded(),
            thinking_used: reasoning.is_succeeded(),
            fell_back: generation.fell_back,
            latency_ms,
            usage,
            memory_id: stored.into_value(),
            skipped,
        })
    }

    /// Factual always retrieves; Complex retrieves when configured to
    fn wants_knowledge(&self, route: RouteDecision) -> bool {
        match route {
            RouteDecision::Simple => false,
            RouteDecision::Complex => self.options.rag_on_complex,
            RouteDecision::Factual => true,
        }
    }

    /// Single-turn query without memory or reasoning
    pub async fn query(&self, input: QueryInput) -> Result<QueryOutput, GatewayError> {
        let started = Instant::now();

        if input.query.trim().is_empty() {
            return Err(GatewayError::Validation("query must not be empty".into()));
        }
        if input.max_tokens == 0 {
            return Err(GatewayError::Validation("max_tokens must be positive".into()));
        }
        if input.top_k > MAX_TOP_K {
            return Err(GatewayError::Validation(format!(
                "top_k must be at most {}",
                MAX_TOP_K
            )));
        }

        let route = self.router.classify(&input.query).await;

        let contexts = if input.use_rag == Some(false) || route == RouteDecision::Simple {
            debug!("Query answered without retrieval (route {})", route);
            Vec::new()
        } else {
            self.knowledge
                .retrieve(&input.query, input.top_k, input.filter.as_ref())
                .await
                .into_value()
                .unwrap_or_default()
        };

        // Retrieval switched off sends everything to the fast backend
        let answer_route = if input.use_rag == Some(false) {
            RouteDecision::Simple
        } else {
            route
        };

        let generation = self
            .generator
            .generate(
                answer_route,
                &GenerationInput {
                    enriched_query: input.query.clone(),
                    conversation: vec![ChatMessage::user(input.query.clone())],
                    knowledge_context: KnowledgeRetriever::context_block(&contexts),
                    max_tokens: input.max_tokens,
                    temperature: DEFAULT_TEMPERATURE,
                    ..Default::default()
                },
            )
            .await?;

        Ok(QueryOutput {
            response: generation.text,
            model_used: generation.model,
            rag_used: !contexts.is_empty(),
            context_chunks: contexts.len(),
            contexts,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            route_decision: route,
        })
    }

    /// Embed texts with the configured embedding backend
    pub async fn embed(&self, input: EmbedInput) -> Result<EmbedOutput, GatewayError> {
        if input.texts.is_empty() {
            return Err(GatewayError::Validation("texts must not be empty".into()));
        }

        let embeddings = self.embeddings.embed_batch(&input.texts).await?;
        let dimension = embeddings
            .first()
            .map(Vec::len)
            .unwrap_or_else(|| self.embeddings.dimension());

        Ok(EmbedOutput {
            count: embeddings.len(),
            dimension,
            embeddings,
        })
    }

    /// Index documents into the knowledge collection
    pub async fn index(&self, input: IndexInput) -> Result<IndexOutput, GatewayError> {
        let started = Instant::now();
        let indexed_count = self.knowledge.index(&input.documents, input.metadata).await?;

        Ok(IndexOutput {
            indexed_count,
            collection: self.knowledge.collection().to_string(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Probe every backend and the vector database concurrently
    pub async fn health(&self) -> HealthReport {
        let (mut probes, vector_db) = tokio::join!(self.backend.probe(), self.vectors.probe());
        probes.push(vector_db);
        HealthReport::from_probes(probes)
    }
}

/// Record an optional stage: advance on success, remember the skip otherwise
fn stage_done<T>(
    state: &mut PipelineState,
    next: PipelineState,
    outcome: &StageOutcome<T>,
    skipped: &mut Vec<(PipelineState, SkipReason)>,
) {
    match outcome.skip_reason() {
        None => advance(state, next),
        Some(reason) => {
            debug!("Stage {} skipped: {}", next, reason);
            skipped.push((next, reason.clone()));
        }
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    if let Err(e) = state.advance(next) {
        warn!("{}", e);
    } else {
        debug!("Pipeline state: {}", next);
    }
}

/// Eight hex characters from a fresh UUID
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ChatCompletion, ChatRequest};
    use crate::vector::InMemoryVectorStore;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Backend for Offline {
        async fn classify(&self, _request: ChatRequest) -> Result<String, BackendError> {
            Err(BackendError::Connection("offline".into()))
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            Err(BackendError::Connection("offline".into()))
        }

        async fn generate(
            &self,
            _kind: BackendKind,
            _request: ChatRequest,
        ) -> Result<ChatCompletion, BackendError> {
            Err(BackendError::Connection("offline".into()))
        }

        fn model_name(&self, kind: BackendKind) -> &str {
            kind.as_str()
        }

        async fn probe(&self) -> Vec<ServiceHealth> {
            vec![ServiceHealth {
                name: "fast".into(),
                url: "http://localhost:8002".into(),
                reachable: false,
            }]
        }
    }

    fn gateway() -> RequestGateway {
        RequestGateway::new(
            &Config::default(),
            Arc::new(Offline),
            Arc::new(InMemoryVectorStore::new()),
        )
    }

    fn chat(messages: Vec<ChatMessage>) -> ChatInput {
        ChatInput {
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_defaults() {
        let request = gateway()
            .validate(chat(vec![ChatMessage::user("Hi")]))
            .unwrap();
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(request.requested_model, "heavy");
        assert!(request.isolation_key.starts_with("session-"));
        assert_eq!(request.isolation_key.len(), "session-".len() + 8);
    }

    #[test]
    fn test_validate_keeps_caller_fields() {
        let request = gateway()
            .validate(ChatInput {
                model: Some("gpt-4".into()),
                messages: vec![ChatMessage::user("Hi")],
                temperature: Some(0.2),
                max_tokens: Some(64),
                user: Some("u1".into()),
                stream: Some(false),
            })
            .unwrap();
        assert_eq!(request.requested_model, "gpt-4");
        assert_eq!(request.isolation_key, "u1");
        assert_eq!(request.max_tokens, 64);
    }

    #[test]
    fn test_validation_errors() {
        let gateway = gateway();

        let cases = vec![
            chat(vec![]),
            chat(vec![ChatMessage::system("only system")]),
            chat(vec![ChatMessage::user("   ")]),
            chat(vec![ChatMessage::new("wizard", "hi")]),
            ChatInput {
                temperature: Some(3.5),
                ..chat(vec![ChatMessage::user("Hi")])
            },
            ChatInput {
                max_tokens: Some(0),
                ..chat(vec![ChatMessage::user("Hi")])
            },
            ChatInput {
                stream: Some(true),
                ..chat(vec![ChatMessage::user("Hi")])
            },
        ];

        for input in cases {
            let err = gateway.validate(input).unwrap_err();
            assert!(err.is_client_error(), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_client_error() {
        let err = gateway()
            .chat(chat(vec![ChatMessage::user("Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Generation(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_health_reports_degraded() {
        let report = gateway().health().await;
        assert!(!report.is_healthy());
        assert!(report.services["vector_db"].reachable);
        assert!(!report.services["fast"].reachable);
    }

    #[tokio::test]
    async fn test_index_validation_maps_to_client_error() {
        let err = gateway()
            .index(IndexInput {
                documents: vec![],
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
