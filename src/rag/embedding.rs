//! Embedding provider abstraction and the Cohere implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::core::errors::RetrievalError;
use crate::core::settings::Settings;

/// Cohere caps embed calls at 96 texts; larger inputs are chunked.
const MAX_BATCH_SIZE: usize = 96;

/// Role hint for the embedding model: queries and documents are embedded
/// into the same space but with different preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    SearchQuery,
    SearchDocument,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::SearchQuery => "search_query",
            InputType::SearchDocument => "search_document",
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for health reporting.
    fn name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// Cohere embeddings over the v1 REST API.
#[derive(Clone)]
pub struct CohereEmbeddings {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl CohereEmbeddings {
    pub fn new(settings: &Settings) -> Result<Self, RetrievalError> {
        Self::with_base_url(settings, "https://api.cohere.ai")
    }

    pub fn with_base_url(settings: &Settings, base_url: &str) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.embed_timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            api_key: settings.cohere_api_key.clone(),
            model: settings.embedding_model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = format!("{}/v1/embed", self.base_url);
        let body = json!({
            "texts": texts,
            "model": self.model,
            "input_type": input_type.as_str(),
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "embed request failed with {}: {}",
                status, text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        parse_embeddings(&payload, texts.len())
    }
}

#[async_trait]
impl EmbeddingProvider for CohereEmbeddings {
    fn name(&self) -> &str {
        "cohere"
    }

    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            embeddings.extend(self.embed_batch(batch, input_type).await?);
        }

        Ok(embeddings)
    }
}

fn parse_embeddings(payload: &Value, expected: usize) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let data = payload
        .get("embeddings")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            RetrievalError::Embedding("embed response missing embeddings array".to_string())
        })?;

    if data.len() != expected {
        return Err(RetrievalError::Embedding(format!(
            "embed response has {} vectors, expected {}",
            data.len(),
            expected
        )));
    }

    let mut result = Vec::with_capacity(data.len());
    for item in data {
        let vector = item
            .as_array()
            .ok_or_else(|| RetrievalError::Embedding("embedding is not an array".to_string()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vector);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_type_matches_wire_format() {
        assert_eq!(InputType::SearchQuery.as_str(), "search_query");
        assert_eq!(InputType::SearchDocument.as_str(), "search_document");
    }

    #[test]
    fn parse_embeddings_extracts_vectors_in_order() {
        let payload = json!({
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        });
        let vectors = parse_embeddings(&payload, 2).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[0][0] - 0.1).abs() < 1e-6);
        assert!((vectors[1][1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn parse_embeddings_rejects_count_mismatch() {
        let payload = json!({ "embeddings": [[0.1]] });
        assert!(parse_embeddings(&payload, 2).is_err());
    }

    #[test]
    fn parse_embeddings_rejects_missing_field() {
        let payload = json!({ "message": "invalid request" });
        assert!(parse_embeddings(&payload, 1).is_err());
    }
}
