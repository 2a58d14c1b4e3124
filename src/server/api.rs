//! Orchestration API
//!
//! OpenAI-compatible chat completions plus the query, embed and index
//! endpoints. The `x_*` response fields are extensions standard clients
//! ignore.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::health::AppState;
use crate::backend::ChatMessage;
use crate::gateway::{
    ChatInput, EmbedInput, EmbedOutput, GatewayError, IndexInput, IndexOutput, QueryInput,
    QueryOutput,
};
use crate::pipeline::PipelineResponse;
use crate::router::RouteDecision;

/// OpenAI-style error envelope
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: Option<&'static str>,
}

/// HTTP-facing error
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: &'static str,
    code: Option<&'static str>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: "invalid_request_error",
            code: None,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        if err.is_client_error() {
            return Self::validation(err.to_string());
        }

        warn!("Request failed downstream: {}", err);
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: err.to_string(),
            kind: "upstream_error",
            code: Some(err.kind()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: ErrorDetail {
                message: self.message,
                kind: self.kind,
                code: self.code,
            },
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    /// Model that actually answered
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
    pub x_route_decision: RouteDecision,
    pub x_rag_used: bool,
    pub x_memory_used: bool,
    pub x_thinking_used: bool,
    /// The routed backend failed and the other one answered
    pub x_fallback_used: bool,
    pub x_latency_ms: u64,
    /// Model the caller asked for, echoed back
    pub x_requested_model: String,
    pub x_request_id: String,
}

impl From<PipelineResponse> for ChatCompletionResponse {
    fn from(response: PipelineResponse) -> Self {
        let id = format!("chatcmpl-{}", &Uuid::new_v4().simple().to_string()[..24]);
        Self {
            id,
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: response.model_used,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(response.text),
                finish_reason: "stop",
            }],
            usage: Usage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.prompt_tokens + response.usage.completion_tokens,
            },
            x_route_decision: response.route,
            x_rag_used: response.rag_used,
            x_memory_used: response.memory_used,
            x_thinking_used: response.thinking_used,
            x_fallback_used: response.fell_back,
            x_latency_ms: response.latency_ms,
            x_requested_model: response.requested_model,
            x_request_id: response.request_id,
        }
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatInput>, JsonRejection>,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    let Json(input) = payload?;
    let response = state.gateway.chat(input).await?;
    Ok(Json(response.into()))
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryInput>, JsonRejection>,
) -> Result<Json<QueryOutput>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.gateway.query(input).await?))
}

pub async fn embed(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmbedInput>, JsonRejection>,
) -> Result<Json<EmbedOutput>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.gateway.embed(input).await?))
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IndexInput>, JsonRejection>,
) -> Result<Json<IndexOutput>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.gateway.index(input).await?))
}

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/query", post(query))
        .route("/embed", post(embed))
        .route("/index", post(index))
        .with_state(state)
}
