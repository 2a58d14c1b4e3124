//! LLM Orchestrator
//!
//! Request orchestration in front of a fast model, a heavy model, an
//! embedding model and a vector database.
//!
//! # Features
//!
//! - **OpenAI-compatible API**: `/v1/chat/completions` with `x_*` diagnostics
//! - **Conversational Memory**: per-user recall and storage in the vector database
//! - **Reasoning**: short chain-of-thought that enriches the query
//! - **Routing**: simple / complex / factual classification picks the backend
//! - **Retrieval**: knowledge chunks injected for complex and factual queries
//! - **Graceful Degradation**: optional stages skip instead of failing
//!
//! # Architecture
//!
//! ```text
//! Client ──► Server (axum) ──► RequestGateway
//!                                   │
//!                                   ├── MemoryStore ──────┐
//!                                   ├── Reasoner          │
//!                                   ├── Router            ├──► VectorStore (Qdrant)
//!                                   ├── KnowledgeRetriever┘
//!                                   └── Generator
//!                                          │
//!                                  BackendClient (pooled reqwest)
//!                                   ├── fast / heavy chat backends
//!                                   └── embedding backend
//! ```

pub mod backend;
pub mod config;
pub mod embeddings;
pub mod gateway;
pub mod generator;
pub mod knowledge;
pub mod memory;
pub mod pipeline;
pub mod reasoner;
pub mod router;
pub mod server;
pub mod tokenizer;
pub mod vector;

pub use backend::{Backend, BackendClient, BackendError, BackendKind, ChatMessage};
pub use config::Config;
pub use gateway::{GatewayError, RequestGateway};
pub use pipeline::{PipelineResponse, PipelineState, SkipReason, StageOutcome};
pub use router::RouteDecision;
pub use server::Server;
pub use vector::{InMemoryVectorStore, QdrantStore, VectorStore};
