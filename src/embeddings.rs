//! Embeddings for Semantic Search
//!
//! Wraps the embedding backend with a fixed-dimension guard and an in-process
//! cache for query embeddings. Content written to the vector database is
//! always embedded fresh; only queries are cached.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::backend::{Backend, BackendError};

/// Embedding failure
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Embedding generator with query caching
pub struct EmbeddingService {
    backend: Arc<dyn Backend>,
    dimension: usize,
    /// LRU cache for query embeddings (max 1000 entries, 1 hour TTL)
    cache: Cache<String, Vec<f32>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn Backend>, dimension: usize) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Self {
            backend,
            dimension,
            cache,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Fixed output dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get cache statistics (hits, misses)
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Embed a search query (cached)
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let cache_key = text.trim().to_string();

        if let Some(cached) = self.cache.get(&cache_key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let embedding = self.embed_one(text).await?;
        self.cache.insert(cache_key, embedding.clone()).await;

        Ok(embedding)
    }

    /// Embed a single text without caching (for storage)
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| BackendError::Malformed("empty embedding batch".into()).into())
    }

    /// Embed many texts in one backend call, checking every vector's dimension
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.backend.embed(texts).await?;

        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        debug!("Embedded {} texts (dim {})", vectors.len(), self.dimension);
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Calculate cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, ChatCompletion, ChatRequest, ServiceHealth};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        dimension: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for CountingEmbedder {
        async fn classify(&self, _request: ChatRequest) -> Result<String, BackendError> {
            Err(BackendError::Connection("unused".into()))
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
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
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((EmbeddingService::cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(EmbeddingService::cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((EmbeddingService::cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(EmbeddingService::cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_cache() {
        let backend = Arc::new(CountingEmbedder {
            dimension: 4,
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), 4);

        service.embed_query("what color is the sky").await.unwrap();
        service.embed_query("  what color is the sky ").await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache_stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_storage_embeddings_not_cached() {
        let backend = Arc::new(CountingEmbedder {
            dimension: 4,
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend.clone(), 4);

        service.embed_one("same text").await.unwrap();
        service.embed_one("same text").await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let backend = Arc::new(CountingEmbedder {
            dimension: 3,
            calls: AtomicUsize::new(0),
        });
        let service = EmbeddingService::new(backend, 4);

        let err = service.embed_one("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: 4, actual: 3 }
        ));
    }
}
