//! Backend Client
//!
//! One pooled HTTP client shared by every outbound call to the chat and
//! embedding backends. Each call is bound to its own timeout class so a slow
//! generation call cannot starve a routing call:
//!
//! - Classification: ~10s (router)
//! - Embedding: ~30s (memory, knowledge, vector database)
//! - Generation: ~120s (fast/heavy answers)
//!
//! The client is built once at process start and dropped at process stop.
//! The [`Backend`] trait is the seam the pipeline depends on, so tests can
//! substitute fakes.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Timeout used by reachability probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Typed failure of a single backend call
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{class} call timed out after {timeout_ms}ms")]
    Timeout { class: CallClass, timeout_ms: u64 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Classify a transport error from reqwest
    pub fn from_reqwest(err: reqwest::Error, class: CallClass, timeout: Duration) -> Self {
        if err.is_timeout() {
            BackendError::Timeout {
                class,
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

/// Timeout classes for outbound calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    Classification,
    Embedding,
    Generation,
}

impl CallClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallClass::Classification => "classification",
            CallClass::Embedding => "embedding",
            CallClass::Generation => "generation",
        }
    }
}

impl std::fmt::Display for CallClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Small, cheap model: routing, reasoning, simple answers
    Fast,
    /// Large model: complex and factual answers
    Heavy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Fast => "fast",
            BackendKind::Heavy => "heavy",
        }
    }

    /// The other generation backend (used for an explicit fallback)
    pub fn other(&self) -> Self {
        match self {
            BackendKind::Fast => BackendKind::Heavy,
            BackendKind::Heavy => BackendKind::Fast,
        }
    }
}

/// Message in an OpenAI-style conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// One chat-completion call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            messages,
            max_tokens,
            temperature,
        }
    }
}

/// Token usage reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Parsed chat-completion result
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Reachability of one external service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub url: String,
    pub reachable: bool,
}

/// Backend operations used by the pipeline
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deterministic single-shot classification on the fast backend
    async fn classify(&self, request: ChatRequest) -> Result<String, BackendError>;

    /// Embed a batch of texts; one vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Chat completion on the selected generation backend
    async fn generate(
        &self,
        kind: BackendKind,
        request: ChatRequest,
    ) -> Result<ChatCompletion, BackendError>;

    /// Model name reported for a generation backend
    fn model_name(&self, kind: BackendKind) -> &str;

    /// Reachability of every backend behind this client
    async fn probe(&self) -> Vec<ServiceHealth>;

    async fn generate_fast(&self, request: ChatRequest) -> Result<ChatCompletion, BackendError> {
        self.generate(BackendKind::Fast, request).await
    }

    async fn generate_heavy(&self, request: ChatRequest) -> Result<ChatCompletion, BackendError> {
        self.generate(BackendKind::Heavy, request).await
    }
}

/// Per-class timeouts
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub classification: Duration,
    pub embedding: Duration,
    pub generation: Duration,
}

impl Timeouts {
    pub fn for_class(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Classification => self.classification,
            CallClass::Embedding => self.embedding,
            CallClass::Generation => self.generation,
        }
    }
}

/// HTTP implementation of [`Backend`] for OpenAI-compatible servers
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    fast_url: String,
    fast_model: String,
    heavy_url: String,
    heavy_model: String,
    embedding_url: String,
    embedding_model: String,
    timeouts: Timeouts,
}

// ── Private wire types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingBody<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl BackendClient {
    /// Build the shared pooled client from configuration
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Backend client initialized (pool: {} idle/host, timeouts: {}s/{}s/{}s)",
            config.pool_max_idle_per_host,
            config.router_timeout.as_secs(),
            config.embedding_timeout.as_secs(),
            config.llm_timeout.as_secs()
        );

        Ok(Self {
            http,
            fast_url: trim_url(&config.fast_backend_url),
            fast_model: config.fast_backend_model.clone(),
            heavy_url: trim_url(&config.heavy_backend_url),
            heavy_model: config.heavy_backend_model.clone(),
            embedding_url: trim_url(&config.embedding_url),
            embedding_model: config.embedding_model.clone(),
            timeouts: Timeouts {
                classification: config.router_timeout,
                embedding: config.embedding_timeout,
                generation: config.llm_timeout,
            },
        })
    }

    /// Shared connection pool (cheap clone, `reqwest::Client` is an `Arc`)
    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn endpoint(&self, kind: BackendKind) -> (&str, &str) {
        match kind {
            BackendKind::Fast => (&self.fast_url, &self.fast_model),
            BackendKind::Heavy => (&self.heavy_url, &self.heavy_model),
        }
    }

    /// POST `/v1/chat/completions` with the class timeout
    async fn chat(
        &self,
        base_url: &str,
        model: &str,
        request: &ChatRequest,
        class: CallClass,
    ) -> Result<ChatCompletion, BackendError> {
        let timeout = self.timeouts.for_class(class);
        let url = format!("{}/v1/chat/completions", base_url);

        debug!(
            url = %url,
            class = %class,
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "Calling chat backend"
        );

        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&CompletionBody {
                model,
                messages: &request.messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            })
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, class, timeout))?;

        let response = check_status(response).await?;

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, class, timeout))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Malformed("missing choices[0].message.content".into()))?;

        debug!(
            url = %url,
            latency_ms = start.elapsed().as_millis() as u64,
            response_len = text.len(),
            "Chat backend call succeeded"
        );

        Ok(ChatCompletion {
            text,
            usage: parsed.usage,
        })
    }

    async fn ping(&self, name: &str, url: &str) -> ServiceHealth {
        let reachable = self
            .http
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok();

        if !reachable {
            warn!("{} backend unreachable at {}", name, url);
        }

        ServiceHealth {
            name: name.to_string(),
            url: url.to_string(),
            reachable,
        }
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn classify(&self, request: ChatRequest) -> Result<String, BackendError> {
        let (url, model) = self.endpoint(BackendKind::Fast);
        let completion = self
            .chat(url, model, &request, CallClass::Classification)
            .await?;
        Ok(completion.text)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.timeouts.embedding;
        let url = format!("{}/v1/embeddings", self.embedding_url);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&EmbeddingBody {
                input: texts,
                model: &self.embedding_model,
            })
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, CallClass::Embedding, timeout))?;

        let response = check_status(response).await?;

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, CallClass::Embedding, timeout))?;

        if parsed.data.len() != texts.len() {
            return Err(BackendError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn generate(
        &self,
        kind: BackendKind,
        request: ChatRequest,
    ) -> Result<ChatCompletion, BackendError> {
        let (url, model) = self.endpoint(kind);
        self.chat(url, model, &request, CallClass::Generation).await
    }

    fn model_name(&self, kind: BackendKind) -> &str {
        self.endpoint(kind).1
    }

    async fn probe(&self) -> Vec<ServiceHealth> {
        let targets = [
            ("fast", &self.fast_url),
            ("heavy", &self.heavy_url),
            ("embedding", &self.embedding_url),
        ];
        join_all(targets.into_iter().map(|(name, url)| self.ping(name, url))).await
    }
}

/// Return the response if successful, or a `Status` error with a body excerpt
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();

    warn!("Backend returned HTTP {}: {}", status, body);
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_other() {
        assert_eq!(BackendKind::Fast.other(), BackendKind::Heavy);
        assert_eq!(BackendKind::Heavy.other(), BackendKind::Fast);
    }

    #[test]
    fn test_timeouts_per_class() {
        let client = BackendClient::new(&Config::default()).unwrap();
        let timeouts = client.timeouts();
        assert_eq!(timeouts.for_class(CallClass::Classification), Duration::from_secs(10));
        assert_eq!(timeouts.for_class(CallClass::Embedding), Duration::from_secs(30));
        assert_eq!(timeouts.for_class(CallClass::Generation), Duration::from_secs(120));
    }

    #[test]
    fn test_model_names() {
        let client = BackendClient::new(&Config::default()).unwrap();
        assert_eq!(client.model_name(BackendKind::Fast), "qwen-2.5-1.5b");
        assert_eq!(client.model_name(BackendKind::Heavy), "gpt-oss-120b");
    }

    #[test]
    fn test_trim_url() {
        assert_eq!(trim_url("http://localhost:8000/"), "http://localhost:8000");
        assert_eq!(trim_url("http://localhost:8000"), "http://localhost:8000");
    }

    #[test]
    fn test_completion_response_parsing() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "simple"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        }"#;

        let parsed: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("simple"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_embedding_response_parsing() {
        let json = r#"{"data": [{"index": 1, "embedding": [0.5]}, {"index": 0, "embedding": [0.1]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        assert_eq!(parsed.data[0].embedding, vec![0.1]);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        let config = Config {
            fast_backend_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let client = BackendClient::new(&config).unwrap();

        let err = client
            .classify(ChatRequest::new(vec![ChatMessage::user("hi")], 10, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Connection(_) | BackendError::Timeout { .. }));
    }
}
