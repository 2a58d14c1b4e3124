//! Response Generation
//!
//! Picks the generation backend from the route and assembles the prompt:
//!
//! - Simple → fast backend, enriched query as a single user message
//! - Complex / Factual → heavy backend, one system message carrying memory,
//!   reasoning and knowledge sections, then the caller's conversation
//!
//! Failure here fails the request. One fallback to the other backend can be
//! enabled; it is logged and never repeated.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, BackendError, BackendKind, ChatCompletion, ChatMessage, ChatRequest, TokenUsage,
};
use crate::router::RouteDecision;

/// Generation failed on the backend that was tried last
#[derive(Debug, Clone, Error)]
#[error("{} backend failed: {source}", .backend.as_str())]
pub struct GenerationError {
    pub backend: BackendKind,
    #[source]
    pub source: BackendError,
}

/// Everything the prompt is built from
#[derive(Debug, Clone, Default)]
pub struct GenerationInput {
    pub enriched_query: String,
    /// Caller's user/assistant turns, in order
    pub conversation: Vec<ChatMessage>,
    pub memory_context: Option<String>,
    pub thoughts: Option<String>,
    pub knowledge_context: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generated answer and where it came from
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub backend: BackendKind,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub fell_back: bool,
}

pub struct Generator {
    backend: Arc<dyn Backend>,
    fallback: bool,
}

impl Generator {
    pub fn new(backend: Arc<dyn Backend>, fallback: bool) -> Self {
        Self { backend, fallback }
    }

    /// Backend serving a route
    pub fn backend_for(route: RouteDecision) -> BackendKind {
        match route {
            RouteDecision::Simple => BackendKind::Fast,
            RouteDecision::Complex | RouteDecision::Factual => BackendKind::Heavy,
        }
    }

    /// Context sections joined into the system message
    fn system_context(input: &GenerationInput) -> Option<String> {
        let sections: Vec<String> = [
            ("Previous conversation context", &input.memory_context),
            ("Reasoning", &input.thoughts),
            ("Knowledge base", &input.knowledge_context),
        ]
        .into_iter()
        .filter_map(|(title, body)| {
            body.as_deref()
                .filter(|b| !b.trim().is_empty())
                .map(|b| format!("{}:\n{}", title, b))
        })
        .collect();

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Messages sent to the backend for a route
    pub fn messages_for(route: RouteDecision, input: &GenerationInput) -> Vec<ChatMessage> {
        match route {
            RouteDecision::Simple => {
                let mut messages = Vec::with_capacity(2);
                if let Some(knowledge) = input.knowledge_context.as_deref() {
                    messages.push(ChatMessage::system(format!("Knowledge base:\n{}", knowledge)));
                }
                messages.push(ChatMessage::user(input.enriched_query.clone()));
                messages
            }
            RouteDecision::Complex | RouteDecision::Factual => {
                let mut messages = Vec::with_capacity(input.conversation.len() + 1);
                if let Some(context) = Self::system_context(input) {
                    messages.push(ChatMessage::system(context));
                }
                messages.extend(input.conversation.iter().cloned());
                if input.conversation.is_empty() {
                    messages.push(ChatMessage::user(input.enriched_query.clone()));
                }
                messages
            }
        }
    }

    /// Generate the answer for a route
    pub async fn generate(
        &self,
        route: RouteDecision,
        input: &GenerationInput,
    ) -> Result<Generation, GenerationError> {
        let primary = Self::backend_for(route);
        let request = ChatRequest::new(
            Self::messages_for(route, input),
            input.max_tokens,
            input.temperature,
        );

        debug!(
            "Generating on {} backend ({} messages)",
            primary.as_str(),
            request.messages.len()
        );

        match self.backend.generate(primary, request.clone()).await {
            Ok(completion) => Ok(self.finish(primary, completion, false)),
            Err(source) if !self.fallback => Err(GenerationError {
                backend: primary,
                source,
            }),
            Err(e) => {
                let other = primary.other();
                warn!(
                    "Generation on {} backend failed: {}, falling back to {}",
                    primary.as_str(),
                    e,
                    other.as_str()
                );
                let completion = self
                    .backend
                    .generate(other, request)
                    .await
                    .map_err(|source| GenerationError {
                        backend: other,
                        source,
                    })?;
                Ok(self.finish(other, completion, true))
            }
        }
    }

    fn finish(
        &self,
        backend: BackendKind,
        completion: ChatCompletion,
        fell_back: bool,
    ) -> Generation {
        let model = self.backend.model_name(backend).to_string();
        info!(
            "Generated {} chars on {} ({})",
            completion.text.len(),
            backend.as_str(),
            model
        );
        Generation {
            text: completion.text,
            backend,
            model,
            usage: completion.usage,
            fell_back,
        }
    }
}
