//! Request Pipeline Types
//!
//! Per-request values that flow through the gateway, plus the stage outcome
//! and state machine used to track which optional stages actually ran.
//!
//! ```text
//! New → MemoryRetrieved → Reasoned → Routed → [ContextRetrieved] → Generated → Stored → Responded
//!                                       │                              │
//!                                       └──────────► Failed ◄──────────┘
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::backend::{BackendKind, ChatMessage, TokenUsage};
use crate::router::RouteDecision;

/// Why an optional stage produced nothing
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The stage ran and found nothing
    NothingFound,
    /// The route or request options did not call for the stage
    NotRequired(String),
    /// Backend or vector database failure
    Failed(String),
    /// The stage's time budget ran out
    TimedOut(Duration),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NothingFound => write!(f, "nothing found"),
            SkipReason::NotRequired(why) => write!(f, "not required: {}", why),
            SkipReason::Failed(err) => write!(f, "failed: {}", err),
            SkipReason::TimedOut(budget) => write!(f, "timed out after {}ms", budget.as_millis()),
        }
    }
}

/// Result of an optional stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Succeeded(T),
    Skipped(SkipReason),
}

impl<T> StageOutcome<T> {
    /// Wrap a fallible call, turning the error into a skip
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => StageOutcome::Succeeded(value),
            Err(e) => StageOutcome::Skipped(SkipReason::Failed(e.to_string())),
        }
    }

    pub fn not_required(why: impl Into<String>) -> Self {
        StageOutcome::Skipped(SkipReason::NotRequired(why.into()))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageOutcome::Succeeded(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StageOutcome::Succeeded(value) => Some(value),
            StageOutcome::Skipped(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StageOutcome::Succeeded(value) => Some(value),
            StageOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            StageOutcome::Succeeded(_) => None,
            StageOutcome::Skipped(reason) => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            StageOutcome::Succeeded(value) => StageOutcome::Succeeded(f(value)),
            StageOutcome::Skipped(reason) => StageOutcome::Skipped(reason),
        }
    }
}

impl<T> StageOutcome<Vec<T>> {
    /// Empty lists count as `NothingFound`
    pub fn from_list(items: Vec<T>) -> Self {
        if items.is_empty() {
            StageOutcome::Skipped(SkipReason::NothingFound)
        } else {
            StageOutcome::Succeeded(items)
        }
    }
}

/// Pipeline position of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    New,
    MemoryRetrieved,
    Reasoned,
    Routed,
    ContextRetrieved,
    Generated,
    Stored,
    Responded,
    Failed,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid pipeline transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl PipelineState {
    /// Forward order, without `Failed`
    const ORDER: [PipelineState; 8] = [
        PipelineState::New,
        PipelineState::MemoryRetrieved,
        PipelineState::Reasoned,
        PipelineState::Routed,
        PipelineState::ContextRetrieved,
        PipelineState::Generated,
        PipelineState::Stored,
        PipelineState::Responded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::New => "new",
            PipelineState::MemoryRetrieved => "memory_retrieved",
            PipelineState::Reasoned => "reasoned",
            PipelineState::Routed => "routed",
            PipelineState::ContextRetrieved => "context_retrieved",
            PipelineState::Generated => "generated",
            PipelineState::Stored => "stored",
            PipelineState::Responded => "responded",
            PipelineState::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PipelineState::New => 0,
            PipelineState::MemoryRetrieved => 1,
            PipelineState::Reasoned => 2,
            PipelineState::Routed => 3,
            PipelineState::ContextRetrieved => 4,
            PipelineState::Generated => 5,
            PipelineState::Stored => 6,
            PipelineState::Responded => 7,
            PipelineState::Failed => u8::MAX,
        }
    }

    /// States that must be passed through on the way to `Responded`
    pub fn is_required(&self) -> bool {
        matches!(self, PipelineState::Routed | PipelineState::Generated)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Responded | PipelineState::Failed)
    }

    /// Move forward; optional states may be skipped, required ones may not
    pub fn advance(&mut self, next: PipelineState) -> Result<(), TransitionError> {
        let err = TransitionError {
            from: *self,
            to: next,
        };

        if self.is_terminal() {
            return Err(err);
        }
        if next == PipelineState::Failed {
            *self = next;
            return Ok(());
        }
        if next.rank() <= self.rank() {
            return Err(err);
        }

        let skips_required = Self::ORDER
            .iter()
            .any(|s| s.is_required() && s.rank() > self.rank() && s.rank() < next.rank());
        if skips_required {
            return Err(err);
        }

        *self = next;
        Ok(())
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated chat request
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub messages: Vec<ChatMessage>,
    /// Caller-declared model; echoed back, never used for backend selection
    pub requested_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub isolation_key: String,
}

impl PipelineRequest {
    /// Content of the most recent user message
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }

    /// User and assistant turns, in order
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
    }
}

/// Assembled result of one chat request
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub request_id: String,
    pub text: String,
    pub route: RouteDecision,
    pub backend: BackendKind,
    pub model_used: String,
    pub requested_model: String,
    pub memory_used: bool,
    pub rag_used: bool,
    pub thinking_used: bool,
    /// Answered by the other backend after the routed one failed
    pub fell_back: bool,
    pub latency_ms: u64,
    pub usage: TokenUsage,
    /// Stored memory id, when the write went through
    pub memory_id: Option<String>,
    /// Optional stages that degraded, with why
    pub skipped: Vec<(PipelineState, SkipReason)>,
}
