//! Dual-mode vector retrieval with relevance-threshold filtering.
//!
//! Nearest-neighbor search always returns *something*, even when nothing in
//! the corpus is relevant; the threshold floor keeps misleading context away
//! from the generator. Full-book mode searches the whole corpus with
//! optional metadata filters; per-page mode runs a second search seeded by
//! the user's selected text and gives its hits priority when both searches
//! find the same chunk.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::embedding::{EmbeddingProvider, InputType};
use super::index::{MetadataFilter, ScoredPoint, VectorIndex};
use crate::core::errors::{RetrievalError, ValidationError};
use crate::core::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetrievalMode {
    #[default]
    #[serde(rename = "full-book")]
    FullBook,
    #[serde(rename = "per-page")]
    PerPage,
}

/// A knowledge chunk annotated with its similarity score. Ephemeral,
/// produced per query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub content: String,
    pub module: String,
    pub chapter: String,
    pub subsection: String,
    pub source_type: String,
    pub page_reference: String,
    pub score: f32,
}

impl From<ScoredPoint> for RetrievedChunk {
    fn from(point: ScoredPoint) -> Self {
        RetrievedChunk {
            chunk_id: point.id,
            content: point.payload.content,
            module: point.payload.module,
            chapter: point.payload.chapter,
            subsection: point.payload.subsection,
            source_type: point.payload.source_type,
            page_reference: point.payload.page_reference,
            score: point.score,
        }
    }
}

pub struct RetrievalEngine {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    relevance_threshold: f32,
    limit: usize,
    max_query_chars: usize,
}

impl RetrievalEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        settings: &Settings,
    ) -> Self {
        Self {
            embeddings,
            index,
            relevance_threshold: settings.relevance_threshold,
            limit: settings.result_limit,
            max_query_chars: settings.max_message_length,
        }
    }

    /// Retrieve context chunks for a query. An empty result list is a valid
    /// outcome meaning "no sufficiently relevant content", not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        selected_text: Option<&str>,
        filters: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.validate(query, mode, selected_text)?;

        match mode {
            RetrievalMode::FullBook => self.retrieve_full_book(query, filters).await,
            RetrievalMode::PerPage => {
                // Validation guarantees the selected text is present.
                let selected = selected_text.unwrap_or_default();
                self.retrieve_per_page(query, selected).await
            }
        }
    }

    fn validate(
        &self,
        query: &str,
        mode: RetrievalMode,
        selected_text: Option<&str>,
    ) -> Result<(), ValidationError> {
        let len = query.trim().chars().count();
        if len == 0 || len > self.max_query_chars {
            return Err(ValidationError::QueryLength {
                max: self.max_query_chars,
            });
        }

        if mode == RetrievalMode::PerPage
            && selected_text.map(|s| s.trim().is_empty()).unwrap_or(true)
        {
            return Err(ValidationError::MissingSelectedText);
        }

        Ok(())
    }

    async fn retrieve_full_book(
        &self,
        query: &str,
        filters: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let vectors = self
            .embeddings
            .embed(&[query.to_string()], InputType::SearchQuery)
            .await?;
        let query_vector = take_single(vectors)?;

        // Over-fetch: the threshold filter runs after retrieval, so extra
        // candidates compensate for post-filter attrition without a second
        // round-trip.
        let hits = self
            .index
            .search(&query_vector, self.limit * 2, filters)
            .await?;

        let results = self.apply_threshold(hits);
        tracing::info!(
            "full-book search returned {} chunks above threshold {}",
            results.len(),
            self.relevance_threshold
        );
        Ok(results)
    }

    async fn retrieve_per_page(
        &self,
        query: &str,
        selected_text: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        // Both texts are search vectors, not corpus documents.
        let vectors = self
            .embeddings
            .embed(
                &[query.to_string(), selected_text.to_string()],
                InputType::SearchQuery,
            )
            .await?;
        let mut iter = vectors.into_iter();
        let (query_vector, selected_vector) = match (iter.next(), iter.next()) {
            (Some(q), Some(s)) => (q, s),
            _ => {
                return Err(RetrievalError::Embedding(
                    "embedding response was incomplete".to_string(),
                ))
            }
        };

        let selected_hits = self.index.search(&selected_vector, self.limit, None).await?;
        let query_hits = self.index.search(&query_vector, self.limit, None).await?;

        // Selected-text hits are inserted first so they win on collision.
        let mut merged: HashMap<String, ScoredPoint> = HashMap::new();
        for hit in selected_hits {
            merged.insert(hit.id.clone(), hit);
        }
        for hit in query_hits {
            merged.entry(hit.id.clone()).or_insert(hit);
        }

        let mut hits: Vec<ScoredPoint> = merged.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let results = self.apply_threshold(hits);
        tracing::info!(
            "per-page search returned {} chunks above threshold {}",
            results.len(),
            self.relevance_threshold
        );
        Ok(results)
    }

    fn apply_threshold(&self, hits: Vec<ScoredPoint>) -> Vec<RetrievedChunk> {
        let mut results: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.relevance_threshold)
            .map(RetrievedChunk::from)
            .collect();
        results.truncate(self.limit);
        results
    }
}

fn take_single(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, RetrievalError> {
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
}
