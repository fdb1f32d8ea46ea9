//! Vector index abstraction and the Qdrant implementation.
//!
//! Search is the runtime path; upsert/delete exist for the ingestion job
//! and operate on validated [`KnowledgeChunk`]s.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::chunk::KnowledgeChunk;
use crate::core::errors::RetrievalError;
use crate::core::settings::Settings;

/// A metadata filter value: a scalar means equality, a list means
/// membership. All filter entries are combined with logical AND.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

pub type MetadataFilter = BTreeMap<String, FilterValue>;

/// Chunk metadata stored alongside the vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub chapter: String,
    #[serde(default)]
    pub subsection: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_origin: String,
    #[serde(default)]
    pub page_reference: String,
}

/// A nearest-neighbor hit: chunk id, cosine similarity, payload.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, RetrievalError>;

    /// Create the collection if missing (cosine distance, configured dim).
    async fn ensure_collection(&self) -> Result<(), RetrievalError>;

    /// Ingestion: store chunks with their embeddings.
    async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<(), RetrievalError>;

    /// Ingestion: remove every chunk cut from the given source document,
    /// ahead of a re-upsert.
    async fn delete_by_origin(&self, source_origin: &str) -> Result<(), RetrievalError>;

    async fn health_check(&self) -> bool;
}

/// Qdrant over its REST API.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_dim: usize,
}

impl QdrantIndex {
    pub fn new(settings: &Settings) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.qdrant_url.trim_end_matches('/').to_string(),
            api_key: settings.qdrant_api_key.clone(),
            collection: settings.qdrant_collection.clone(),
            vector_dim: settings.vector_dim,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Value, RetrievalError> {
        let res = builder
            .send()
            .await
            .map_err(|e| RetrievalError::Index(format!("{}: {}", context, e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RetrievalError::Index(format!(
                "{} failed with {}: {}",
                context, status, text
            )));
        }

        res.json()
            .await
            .map_err(|e| RetrievalError::Index(format!("{}: {}", context, e)))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredPoint>, RetrievalError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        if let Some(conditions) = filter.and_then(build_filter) {
            body["filter"] = conditions;
        }

        let path = format!("/collections/{}/points/search", self.collection);
        let payload = self
            .send(self.request(reqwest::Method::POST, &path).json(&body), "search")
            .await?;

        parse_search_response(&payload)
    }

    async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let path = format!("/collections/{}", self.collection);
        let exists = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map(|res| res.status().is_success())
            .unwrap_or(false);

        if exists {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": self.vector_dim, "distance": "Cosine" }
        });
        self.send(
            self.request(reqwest::Method::PUT, &path).json(&body),
            "create collection",
        )
        .await?;
        tracing::info!("created collection '{}'", self.collection);
        Ok(())
    }

    async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<(), RetrievalError> {
        if chunks.is_empty() {
            return Ok(());
        }

        for chunk in chunks {
            chunk
                .validate(self.vector_dim)
                .map_err(RetrievalError::Validation)?;
        }

        let points: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.chunk_id,
                    "vector": chunk.embedding,
                    "payload": {
                        "content": chunk.content,
                        "module": chunk.module,
                        "chapter": chunk.chapter,
                        "subsection": chunk.subsection,
                        "source_type": chunk.source_type.as_str(),
                        "source_origin": chunk.source_origin,
                        "page_reference": chunk.page_reference,
                    }
                })
            })
            .collect();

        let path = format!("/collections/{}/points", self.collection);
        self.send(
            self.request(reqwest::Method::PUT, &path)
                .json(&json!({ "points": points })),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn delete_by_origin(&self, source_origin: &str) -> Result<(), RetrievalError> {
        let body = json!({
            "filter": {
                "must": [{ "key": "source_origin", "match": { "value": source_origin } }]
            }
        });
        let path = format!("/collections/{}/points/delete", self.collection);
        self.send(
            self.request(reqwest::Method::POST, &path).json(&body),
            "delete by origin",
        )
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let path = format!("/collections/{}", self.collection);
        self.request(reqwest::Method::GET, &path)
            .send()
            .await
            .map(|res| res.status().is_success())
            .unwrap_or(false)
    }
}

/// Build a Qdrant `filter` clause: scalar values become equality matches,
/// lists become membership matches, combined under `must`.
fn build_filter(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }

    let conditions: Vec<Value> = filter
        .iter()
        .map(|(key, value)| match value {
            FilterValue::One(v) => json!({ "key": key, "match": { "value": v } }),
            FilterValue::Many(vs) => json!({ "key": key, "match": { "any": vs } }),
        })
        .collect();

    Some(json!({ "must": conditions }))
}

fn parse_search_response(payload: &Value) -> Result<Vec<ScoredPoint>, RetrievalError> {
    let hits = payload
        .get("result")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RetrievalError::Index("search response missing result".to_string()))?;

    let mut points = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = match hit.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(RetrievalError::Index(
                    "search hit missing id".to_string(),
                ))
            }
        };
        let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        let payload = hit
            .get("payload")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        points.push(ScoredPoint { id, score, payload });
    }

    Ok(points)
}
