//! Conversational Memory
//!
//! Append-only per-user memory in the vector database. Each record carries
//! the isolation key (`user_id`), an optional owning agent, the content and
//! a creation timestamp. Retrieval is a degradable stage: failures come back
//! as a skipped outcome, never an error.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::pipeline::{SkipReason, StageOutcome};
use crate::vector::{Payload, PayloadFilter, VectorPoint, VectorStore, VectorStoreError};

/// Payload keys owned by the store; metadata cannot override them
const RESERVED_KEYS: [&str; 4] = ["content", "user_id", "agent_id", "timestamp"];

/// Memory write failure
#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Isolation key must not be empty")]
    EmptyIsolationKey,

    #[error("Memory embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Memory write failed: {0}")]
    VectorStore(#[from] VectorStoreError),
}

/// One stored memory
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub user_id: String,
    /// `None` means visible to every agent
    pub agent_id: Option<String>,
    pub content: String,
    /// Unix seconds
    pub created_at: f64,
    pub metadata: Payload,
}

impl MemoryRecord {
    pub fn new(
        user_id: &str,
        agent_id: Option<&str>,
        content: impl Into<String>,
        metadata: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            agent_id: agent_id.map(str::to_string),
            content: content.into(),
            created_at: Utc::now().timestamp_millis() as f64 / 1000.0,
            metadata,
        }
    }

    /// Short id handed back to callers
    pub fn short_id(&self) -> String {
        format!("mem_{}", &self.id.simple().to_string()[..8])
    }

    /// Flat payload: metadata first, store-owned keys on top
    pub fn to_payload(&self) -> Payload {
        let mut payload: Payload = self
            .metadata
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        payload.insert("content".into(), json!(self.content));
        payload.insert("user_id".into(), json!(self.user_id));
        if let Some(agent) = &self.agent_id {
            payload.insert("agent_id".into(), json!(agent));
        }
        payload.insert("timestamp".into(), json!(self.created_at));
        payload
    }
}

/// A retrieved memory snippet
#[derive(Debug, Clone)]
pub struct MemorySnippet {
    pub content: String,
    pub score: f32,
    pub created_at: Option<f64>,
}

/// Memory collection owner
pub struct MemoryStore {
    embeddings: Arc<EmbeddingService>,
    vectors: Arc<dyn VectorStore>,
    collection: String,
}

impl MemoryStore {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        vectors: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed and upsert one record, returning its short id
    pub async fn add(
        &self,
        isolation_key: &str,
        agent_id: Option<&str>,
        content: &str,
        metadata: Payload,
    ) -> Result<String, MemoryError> {
        if isolation_key.trim().is_empty() {
            return Err(MemoryError::EmptyIsolationKey);
        }

        let record = MemoryRecord::new(isolation_key, agent_id, content, metadata);
        let vector = self.embeddings.embed_one(&record.content).await?;

        self.vectors
            .ensure_collection(&self.collection, self.embeddings.dimension())
            .await?;
        self.vectors
            .upsert(
                &self.collection,
                vec![VectorPoint::new(record.id.to_string(), vector, record.to_payload())],
            )
            .await?;

        let short_id = record.short_id();
        info!("Stored memory {} for {}", short_id, isolation_key);
        Ok(short_id)
    }

    /// Nearest memories for one isolation key
    ///
    /// With an agent id, records owned by other agents are excluded; records
    /// without an owner stay visible. Without one, every record for the key
    /// is searched.
    pub async fn try_search(
        &self,
        query: &str,
        isolation_key: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed_query(query).await?;
        self.vectors
            .ensure_collection(&self.collection, self.embeddings.dimension())
            .await?;

        let mut filter = PayloadFilter::new().must_match("user_id", isolation_key);
        if let Some(agent) = agent_id {
            filter = filter.must_match_or_absent("agent_id", agent);
        }

        let hits = self
            .vectors
            .search(&self.collection, &vector, Some(&filter), limit)
            .await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let content = hit.payload_str("content")?.to_string();
                Some(MemorySnippet {
                    content,
                    score: hit.score,
                    created_at: hit.payload.get("timestamp").and_then(Value::as_f64),
                })
            })
            .collect())
    }

    /// Degradable retrieval: empty or failed searches become a skip
    pub async fn recall(
        &self,
        query: &str,
        isolation_key: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StageOutcome<Vec<String>> {
        debug!("Searching memory for {} (limit {})", isolation_key, limit);

        match self.try_search(query, isolation_key, agent_id, limit).await {
            Ok(snippets) => {
                StageOutcome::from_list(snippets.into_iter().map(|s| s.content).collect())
            }
            Err(e) => {
                warn!("Memory search failed for {}: {}", isolation_key, e);
                StageOutcome::Skipped(SkipReason::Failed(e.to_string()))
            }
        }
    }

    /// Content snippets, most similar first; empty on failure
    pub async fn search(
        &self,
        query: &str,
        isolation_key: &str,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Vec<String> {
        self.recall(query, isolation_key, agent_id, limit)
            .await
            .into_value()
            .unwrap_or_default()
    }
}
