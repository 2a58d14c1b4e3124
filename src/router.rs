//! Query Router
//!
//! Classifies the enriched query into one of three routes with a single
//! zero-temperature call to the fast backend. Any failure or unparseable
//! answer maps to `Complex`, which sends the request to the heavy backend.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ChatMessage, ChatRequest};

/// Route categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteDecision {
    /// Greetings, general knowledge: fast backend, no retrieval
    Simple,
    /// Reasoning, math, code, analysis: heavy backend
    #[default]
    Complex,
    /// Specific facts, dates, entities: retrieval + heavy backend
    Factual,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::Simple => "simple",
            RouteDecision::Complex => "complex",
            RouteDecision::Factual => "factual",
        }
    }

    /// Parse classifier output; `None` when it is not exactly one category
    pub fn parse(output: &str) -> Option<Self> {
        let word = WORD_PATTERN.captures(output.trim())?.get(1)?.as_str();
        match word.to_lowercase().as_str() {
            "simple" => Some(RouteDecision::Simple),
            "complex" => Some(RouteDecision::Complex),
            "factual" => Some(RouteDecision::Factual),
            _ => None,
        }
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single word, optionally wrapped in quotes and followed by punctuation
static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^["'`*]*([A-Za-z]+)["'`*]*[.!]?$"#).expect("valid route pattern")
});

const ROUTER_SYSTEM_PROMPT: &str = "You are a query classifier. Classify each query into exactly ONE category:\n\n\
- \"simple\": General knowledge, greetings, simple questions (can be answered by a small model)\n\
- \"complex\": Reasoning, math, code, analysis (needs the large model)\n\
- \"factual\": Specific facts, dates, entities (needs retrieval + the large model)\n\n\
Respond with ONLY the category word. No explanation.";

/// Completion budget for the category word
const ROUTER_MAX_TOKENS: u32 = 10;

/// Single-call query classifier
pub struct Router {
    backend: Arc<dyn Backend>,
}

impl Router {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn request(query: &str) -> ChatRequest {
        ChatRequest::new(
            vec![
                ChatMessage::system(ROUTER_SYSTEM_PROMPT),
                ChatMessage::user(query),
            ],
            ROUTER_MAX_TOKENS,
            0.0,
        )
    }

    /// Classify once; never fails
    pub async fn classify(&self, enriched_query: &str) -> RouteDecision {
        debug!("Classifying query ({} chars)", enriched_query.len());

        match self.backend.classify(Self::request(enriched_query)).await {
            Ok(output) => match RouteDecision::parse(&output) {
                Some(route) => {
                    info!("Route decision: {}", route);
                    route
                }
                None => {
                    warn!(
                        "Unparseable classification {:?}, defaulting to {}",
                        output,
                        RouteDecision::default()
                    );
                    RouteDecision::default()
                }
            },
            Err(e) => {
                warn!(
                    "Classification failed: {}, defaulting to {}",
                    e,
                    RouteDecision::default()
                );
                RouteDecision::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendKind, ChatCompletion, ServiceHealth};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClassifier {
        reply: Result<String, BackendError>,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(reply: Result<&str, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend for ScriptedClassifier {
        async fn classify(&self, request: ChatRequest) -> Result<String, BackendError> {
            assert_eq!(request.temperature, 0.0);
            assert_eq!(request.max_tokens, ROUTER_MAX_TOKENS);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            Ok(Vec::new())
        }

        async fn generate(
            &self,
            _kind: BackendKind,
            _request: ChatRequest,
        ) -> Result<ChatCompletion, BackendError> {
            Err(BackendError::Connection("unused".into()))
        }

        fn model_name(&self, _kind: BackendKind) -> &str {
            "none"
        }

        async fn probe(&self) -> Vec<ServiceHealth> {
            Vec::new()
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(RouteDecision::parse("simple"), Some(RouteDecision::Simple));
        assert_eq!(RouteDecision::parse("  Factual.\n"), Some(RouteDecision::Factual));
        assert_eq!(RouteDecision::parse("\"COMPLEX\""), Some(RouteDecision::Complex));
        assert_eq!(RouteDecision::parse("**simple**"), Some(RouteDecision::Simple));
        assert_eq!(RouteDecision::parse("moderate"), None);
        assert_eq!(RouteDecision::parse("simple, I think"), None);
        assert_eq!(RouteDecision::parse(""), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&RouteDecision::Factual).unwrap(), "\"factual\"");
        assert_eq!(RouteDecision::default(), RouteDecision::Complex);
    }

    #[tokio::test]
    async fn test_classify_single_call() {
        let backend = ScriptedClassifier::new(Ok("factual"));
        let router = Router::new(backend.clone());

        assert_eq!(router.classify("When was Rust 1.0 released?").await, RouteDecision::Factual);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_defaults_to_complex() {
        let router = Router::new(ScriptedClassifier::new(Err(BackendError::Connection(
            "refused".into(),
        ))));
        assert_eq!(router.classify("Hi").await, RouteDecision::Complex);

        let router = Router::new(ScriptedClassifier::new(Ok("I cannot decide")));
        assert_eq!(router.classify("Hi").await, RouteDecision::Complex);
    }

    #[tokio::test]
    async fn test_deterministic_for_same_input() {
        let router = Router::new(ScriptedClassifier::new(Ok("simple")));
        let first = router.classify("Hello there").await;
        let second = router.classify("Hello there").await;
        assert_eq!(first, second);
    }
}
