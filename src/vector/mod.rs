//! Vector Database Access
//!
//! Collection create / upsert / nearest-neighbor search with cosine distance
//! and exact-match payload filtering.
//!
//! ```text
//! MemoryStore ─────┐
//!                  ├──► VectorStore ──► QdrantStore (REST, shared pool)
//! KnowledgeRetriever┘                └─► InMemoryVectorStore (tests, local runs)
//! ```

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backend::{BackendError, ServiceHealth};

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;

/// JSON payload stored alongside each vector
pub type Payload = Map<String, Value>;

/// Vector database failure
#[derive(Debug, Clone, Error)]
pub enum VectorStoreError {
    #[error("Vector database call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Vector dimension mismatch in {collection}: expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },
}

/// A point to upsert
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl VectorPoint {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }
}

/// A search hit
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

impl ScoredPoint {
    /// String field from the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// One payload condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value
    Match { key: String, value: Value },
    /// Field equals value, or the field is missing/null
    MatchOrAbsent { key: String, value: Value },
}

impl Condition {
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Condition::Match { key, value } => payload.get(key) == Some(value),
            Condition::MatchOrAbsent { key, value } => match payload.get(key) {
                None | Some(Value::Null) => true,
                Some(found) => found == value,
            },
        }
    }
}

/// Conjunction of payload conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<Condition>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_match(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push(Condition::Match {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn must_match_or_absent(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push(Condition::MatchOrAbsent {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Check a payload against every condition
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.matches(payload))
    }
}

/// Vector database operations used by the memory and knowledge stores
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection (cosine distance) if it does not exist
    async fn ensure_collection(&self, name: &str, dimension: usize)
        -> Result<(), VectorStoreError>;

    /// Insert or replace points; returns the number written
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError>;

    /// Nearest neighbors ordered by descending similarity
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    /// Reachability of the database
    async fn probe(&self) -> ServiceHealth;
}
