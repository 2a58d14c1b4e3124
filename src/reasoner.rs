//! Query Reasoner
//!
//! Short chain-of-thought on the fast backend that enriches the query before
//! routing. Bounded by a token budget and an overall time budget; any failure
//! skips the stage and the original query flows on unchanged.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendKind, ChatMessage, ChatRequest};
use crate::pipeline::{SkipReason, StageOutcome};

const THINKING_SYSTEM_PROMPT: &str = "You are a reasoning assistant. For each query, break down your thinking into clear steps.\n\
Analyze what the user is asking and structure your thoughts to help with:\n\
1. Understanding the query intent\n\
2. Identifying key concepts\n\
3. Planning the approach to answer\n\n\
Keep your reasoning concise and focused. Output your thoughts as numbered steps.";

const THINKING_TEMPERATURE: f32 = 0.3;

/// Memory snippets fed into the prompt
pub const MAX_MEMORY_SNIPPETS: usize = 3;

/// Enrichment produced by a successful reasoning step
#[derive(Debug, Clone, PartialEq)]
pub struct Reasoning {
    pub thoughts: String,
    pub enriched_query: String,
}

impl Reasoning {
    /// Wrap a query with its reasoning
    pub fn enrich(query: &str, thoughts: &str) -> Self {
        Self {
            thoughts: thoughts.to_string(),
            enriched_query: format!("[Reasoning: {}]\n\nQuery: {}", thoughts, query),
        }
    }
}

/// Fast-backend reasoning step
pub struct Reasoner {
    backend: Arc<dyn Backend>,
    max_tokens: u32,
    timeout: Duration,
}

impl Reasoner {
    pub fn new(backend: Arc<dyn Backend>, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            backend,
            max_tokens,
            timeout,
        }
    }

    fn prompt(query: &str, memories: &[String]) -> String {
        let memories = &memories[..memories.len().min(MAX_MEMORY_SNIPPETS)];
        if memories.is_empty() {
            query.to_string()
        } else {
            format!(
                "Context from memory:\n{}\n\nUser query: {}",
                memories.join("\n"),
                query
            )
        }
    }

    /// Reason about the query, with memory snippets as context
    pub async fn enrich(&self, query: &str, memories: &[String]) -> StageOutcome<Reasoning> {
        debug!("Reasoning over query with {} memory snippets", memories.len());

        let request = ChatRequest::new(
            vec![
                ChatMessage::system(THINKING_SYSTEM_PROMPT),
                ChatMessage::user(Self::prompt(query, memories)),
            ],
            self.max_tokens,
            THINKING_TEMPERATURE,
        );

        let call = self.backend.generate(BackendKind::Fast, request);
        let completion = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!("Reasoning failed: {}, using original query", e);
                return StageOutcome::Skipped(SkipReason::Failed(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Reasoning timed out after {}ms, using original query",
                    self.timeout.as_millis()
                );
                return StageOutcome::Skipped(SkipReason::TimedOut(self.timeout));
            }
        };

        let thoughts = completion.text.trim();
        if thoughts.is_empty() {
            return StageOutcome::Skipped(SkipReason::NothingFound);
        }

        info!("Reasoning complete ({} chars)", thoughts.len());
        StageOutcome::Succeeded(Reasoning::enrich(query, thoughts))
    }
}
