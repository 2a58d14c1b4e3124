//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use llm_orchestrator::backend::{
    Backend, BackendError, BackendKind, ChatCompletion, ChatRequest, ServiceHealth,
};
use llm_orchestrator::{server, Config, InMemoryVectorStore, RequestGateway};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const DIMENSION: usize = 32;
pub const FAST_MODEL: &str = "qwen-2.5-1.5b";
pub const HEAVY_MODEL: &str = "gpt-oss-120b";

/// Scriptable stand-in for every backend
pub struct FakeBackend {
    route: Mutex<Result<String, BackendError>>,
    pub embed_fails: AtomicBool,
    pub reasoning_fails: AtomicBool,
    failing: Mutex<Vec<BackendKind>>,
    pub classify_calls: AtomicUsize,
    pub generations: Mutex<Vec<(BackendKind, ChatRequest)>>,
    pub reasoning_requests: Mutex<Vec<ChatRequest>>,
}

impl FakeBackend {
    pub fn new(route: &str) -> Arc<Self> {
        Arc::new(Self {
            route: Mutex::new(Ok(route.to_string())),
            embed_fails: AtomicBool::new(false),
            reasoning_fails: AtomicBool::new(false),
            failing: Mutex::new(Vec::new()),
            classify_calls: AtomicUsize::new(0),
            generations: Mutex::new(Vec::new()),
            reasoning_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_route(&self, route: &str) {
        *self.route.lock().unwrap() = Ok(route.to_string());
    }

    pub fn router_unreachable(&self) {
        *self.route.lock().unwrap() = Err(BackendError::Connection(
            "connection refused: http://localhost:8002".into(),
        ));
    }

    pub fn fail_generation(&self, kind: BackendKind) {
        self.failing.lock().unwrap().push(kind);
    }

    pub fn last_generation(&self) -> (BackendKind, ChatRequest) {
        self.generations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no generation call recorded")
    }
}

/// Word-hash embedding: texts sharing words land close together
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMENSION];
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let slot = word
            .bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
            % DIMENSION;
        v[slot] += 1.0;
    }
    v
}

#[async_trait]
impl Backend for FakeBackend {
    async fn classify(&self, _request: ChatRequest) -> Result<String, BackendError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.route.lock().unwrap().clone()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if self.embed_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout {
                class: llm_orchestrator::backend::CallClass::Embedding,
                timeout_ms: 30_000,
            });
        }
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }

    async fn generate(
        &self,
        kind: BackendKind,
        request: ChatRequest,
    ) -> Result<ChatCompletion, BackendError> {
        let is_reasoning = request
            .messages
            .first()
            .map(|m| m.content.starts_with("You are a reasoning assistant"))
            .unwrap_or(false);

        if is_reasoning {
            self.reasoning_requests.lock().unwrap().push(request);
            if self.reasoning_fails.load(Ordering::SeqCst) {
                return Err(BackendError::Connection("reasoner down".into()));
            }
            return Ok(ChatCompletion {
                text: "1. Understand the question\n2. Answer it".into(),
                usage: None,
            });
        }

        self.generations.lock().unwrap().push((kind, request));
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(BackendError::Status {
                status: 503,
                body: "model overloaded".into(),
            });
        }
        Ok(ChatCompletion {
            text: format!("{} answer", kind.as_str()),
            usage: None,
        })
    }

    fn model_name(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::Fast => FAST_MODEL,
            BackendKind::Heavy => HEAVY_MODEL,
        }
    }

    async fn probe(&self) -> Vec<ServiceHealth> {
        ["fast", "heavy", "embedding"]
            .iter()
            .map(|name| ServiceHealth {
                name: name.to_string(),
                url: format!("http://{}.test", name),
                reachable: true,
            })
            .collect()
    }
}

pub fn test_config() -> Config {
    Config {
        embedding_dimension: DIMENSION,
        ..Config::default()
    }
}

/// Router over a fresh in-memory vector store
pub fn test_app(backend: Arc<FakeBackend>) -> Router {
    test_app_with(backend, test_config())
}

pub fn test_app_with(backend: Arc<FakeBackend>, config: Config) -> Router {
    let gateway = Arc::new(RequestGateway::new(
        &config,
        backend,
        Arc::new(InMemoryVectorStore::new()),
    ));
    server::app(gateway, false)
}

pub async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}
