//! In-memory vector index
//!
//! Brute-force cosine search over per-collection point lists. Used by tests,
//! and by local runs when `VECTOR_DB_URL` is `memory://` (nothing persists).

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{PayloadFilter, ScoredPoint, VectorPoint, VectorStore, VectorStoreError};
use crate::backend::ServiceHealth;
use crate::embeddings::EmbeddingService;

struct Collection {
    dimension: usize,
    points: Vec<VectorPoint>,
}

/// In-memory vector store
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection (0 when absent)
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_insert_with(|| {
            debug!("Created in-memory collection {} (dim {})", name, dimension);
            Collection {
                dimension,
                points: Vec::new(),
            }
        });
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::UnknownCollection(collection.to_string()))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: target.dimension,
                actual: bad.vector.len(),
            });
        }

        let count = points.len();
        for point in points {
            target.points.retain(|p| p.id != point.id);
            target.points.push(point);
        }
        Ok(count)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::UnknownCollection(collection.to_string()))?;

        let mut results: Vec<ScoredPoint> = target
            .points
            .iter()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: EmbeddingService::cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn probe(&self) -> ServiceHealth {
        ServiceHealth {
            name: "vector_db".to_string(),
            url: "memory://".to_string(),
            reachable: true,
        }
    }
}
