//! Qdrant REST client
//!
//! Talks to Qdrant's HTTP API over the shared backend connection pool.
//! Collections are created lazily (cosine distance) and remembered per process.
//! Creation is serialized within the process; a 409 from another process that
//! won the race counts as success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{Condition, Payload, PayloadFilter, ScoredPoint, VectorPoint, VectorStore, VectorStoreError};
use crate::backend::{check_status, BackendError, CallClass, ServiceHealth};

/// Qdrant-backed vector store
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    known_collections: RwLock<HashSet<String>>,
    create_lock: Mutex<()>,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    points: Vec<PointBody<'a>>,
}

#[derive(Debug, Serialize)]
struct PointBody<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a Payload,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

impl QdrantStore {
    /// Create a store sharing the backend client's connection pool
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            known_collections: RwLock::new(HashSet::new()),
            create_lock: Mutex::new(()),
        }
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    fn map_err(&self, err: reqwest::Error) -> VectorStoreError {
        BackendError::from_reqwest(err, CallClass::Embedding, self.timeout).into()
    }

    /// Qdrant filter JSON
    fn filter_json(filter: &PayloadFilter) -> Value {
        let must: Vec<Value> = filter
            .must
            .iter()
            .map(|condition| match condition {
                Condition::Match { key, value } => {
                    json!({ "key": key, "match": { "value": value } })
                }
                Condition::MatchOrAbsent { key, value } => json!({
                    "should": [
                        { "key": key, "match": { "value": value } },
                        { "is_empty": { "key": key } }
                    ]
                }),
            })
            .collect();
        json!({ "must": must })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        if self.known_collections.read().await.contains(name) {
            return Ok(());
        }

        let _guard = self.create_lock.lock().await;
        if self.known_collections.read().await.contains(name) {
            return Ok(());
        }

        let url = self.collection_url(name);
        let existing = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if existing.status() == reqwest::StatusCode::NOT_FOUND {
            let response = self
                .http
                .put(&url)
                .timeout(self.timeout)
                .json(&json!({ "vectors": { "size": dimension, "distance": "Cosine" } }))
                .send()
                .await
                .map_err(|e| self.map_err(e))?;

            if response.status() == reqwest::StatusCode::CONFLICT {
                debug!("Qdrant collection {} created concurrently elsewhere", name);
            } else {
                check_status(response).await?;
                info!("Created Qdrant collection {} (dim {}, cosine)", name, dimension);
            }
        } else {
            check_status(existing).await?;
        }

        self.known_collections.write().await.insert(name.to_string());
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        if points.is_empty() {
            return Ok(0);
        }

        let body = UpsertBody {
            points: points
                .iter()
                .map(|p| PointBody {
                    id: &p.id,
                    vector: &p.vector,
                    payload: &p.payload,
                })
                .collect(),
        };

        let response = self
            .http
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        check_status(response).await?;

        debug!("Upserted {} points into {}", points.len(), collection);
        Ok(points.len())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Self::filter_json(filter);
        }

        let response = self
            .http
            .post(format!("{}/points/search", self.collection_url(collection)))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;
        let response = check_status(response).await?;

        let parsed: SearchResponse = response.json().await.map_err(|e| self.map_err(e))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match hit.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: hit.score,
                payload: hit.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn probe(&self) -> ServiceHealth {
        let reachable = self
            .http
            .get(&self.base_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok();

        if !reachable {
            warn!("Vector database unreachable at {}", self.base_url);
        }

        ServiceHealth {
            name: "vector_db".to_string(),
            url: self.base_url.clone(),
            reachable,
        }
    }
}
