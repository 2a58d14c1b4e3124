//! Knowledge Retrieval
//!
//! Project-wide document corpus in its own collection. Documents are indexed
//! explicitly and never mutated; retrieval embeds the (enriched) query with
//! the same embedding backend and returns the nearest chunks.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::pipeline::{SkipReason, StageOutcome};
use crate::vector::{Payload, PayloadFilter, VectorPoint, VectorStore, VectorStoreError};

/// Payload key holding the document text
pub const TEXT_KEY: &str = "text";

/// Separator between chunks in the injected context block
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Knowledge indexing or retrieval failure
#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("No documents to index")]
    NoDocuments,

    #[error("Metadata list has {metadata} entries for {documents} documents")]
    MetadataMismatch { documents: usize, metadata: usize },

    #[error("Knowledge embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Knowledge store failed: {0}")]
    VectorStore(#[from] VectorStoreError),
}

impl KnowledgeError {
    /// Caller error rather than a downstream fault
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            KnowledgeError::NoDocuments | KnowledgeError::MetadataMismatch { .. }
        )
    }
}

/// A retrieved chunk
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub text: String,
    pub score: f32,
    pub metadata: Payload,
}

/// Knowledge collection owner
pub struct KnowledgeRetriever {
    embeddings: Arc<EmbeddingService>,
    vectors: Arc<dyn VectorStore>,
    collection: String,
}

impl KnowledgeRetriever {
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

    /// Embed and store documents; metadata, when given, aligns with documents
    pub async fn index(
        &self,
        documents: &[String],
        metadata: Option<Vec<Payload>>,
    ) -> Result<usize, KnowledgeError> {
        if documents.is_empty() {
            return Err(KnowledgeError::NoDocuments);
        }
        if let Some(meta) = &metadata {
            if meta.len() != documents.len() {
                return Err(KnowledgeError::MetadataMismatch {
                    documents: documents.len(),
                    metadata: meta.len(),
                });
            }
        }

        let vectors = self.embeddings.embed_batch(documents).await?;
        self.vectors
            .ensure_collection(&self.collection, self.embeddings.dimension())
            .await?;

        let mut metadata = metadata.map(Vec::into_iter);
        let points: Vec<VectorPoint> = documents
            .iter()
            .zip(vectors)
            .map(|(text, vector)| {
                let mut payload = metadata
                    .as_mut()
                    .and_then(Iterator::next)
                    .unwrap_or_default();
                payload.insert(TEXT_KEY.into(), json!(text));
                VectorPoint::new(Uuid::new_v4().to_string(), vector, payload)
            })
            .collect();

        let count = self.vectors.upsert(&self.collection, points).await?;
        info!("Indexed {} documents into {}", count, self.collection);
        Ok(count)
    }

    /// Nearest chunks for a query, with an optional exact-match metadata filter
    pub async fn try_retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed_query(query).await?;
        self.vectors
            .ensure_collection(&self.collection, self.embeddings.dimension())
            .await?;

        let filter = filter.map(|fields| {
            fields
                .iter()
                .fold(PayloadFilter::new(), |f, (key, value)| {
                    f.must_match(key.clone(), value.clone())
                })
        });

        let hits = self
            .vectors
            .search(&self.collection, &vector, filter.as_ref(), top_k)
            .await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let text = hit.payload_str(TEXT_KEY)?.to_string();
                let mut metadata = hit.payload;
                metadata.remove(TEXT_KEY);
                Some(KnowledgeChunk {
                    text,
                    score: hit.score,
                    metadata,
                })
            })
            .collect())
    }

    /// Ordered chunk texts; zero results or failure become a skip
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> StageOutcome<Vec<String>> {
        debug!("Retrieving knowledge (top_k {})", top_k);

        match self.try_retrieve(query, top_k, filter).await {
            Ok(chunks) => StageOutcome::from_list(chunks.into_iter().map(|c| c.text).collect()),
            Err(e) => {
                warn!("Knowledge retrieval failed: {}", e);
                StageOutcome::Skipped(SkipReason::Failed(e.to_string()))
            }
        }
    }

    /// Single context block injected ahead of the user's message
    pub fn context_block(chunks: &[String]) -> Option<String> {
        if chunks.is_empty() {
            None
        } else {
            Some(chunks.join(CHUNK_SEPARATOR))
        }
    }
}
