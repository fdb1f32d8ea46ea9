//! Indexed textbook content units.
//!
//! A [`KnowledgeChunk`] is what the offline ingestion job produces and the
//! vector index stores: a bounded span of textbook text, its embedding, and
//! the taxonomy labels used for metadata filtering and citations.

use serde::{Deserialize, Serialize};

use crate::core::errors::ValidationError;

pub const MIN_CONTENT_CHARS: usize = 50;
pub const MAX_CONTENT_CHARS: usize = 2000;
const MAX_LABEL_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Textbook,
    Diagram,
    Exercise,
    Example,
    Definition,
    Theorem,
    Code,
    Figure,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Textbook => "textbook",
            SourceType::Diagram => "diagram",
            SourceType::Exercise => "exercise",
            SourceType::Example => "example",
            SourceType::Definition => "definition",
            SourceType::Theorem => "theorem",
            SourceType::Code => "code",
            SourceType::Figure => "figure",
        }
    }
}

/// A unit of indexed textbook content. Immutable once stored; re-ingestion
/// deletes by source origin and re-upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub chunk_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub module: String,
    pub chapter: String,
    pub subsection: String,
    pub source_type: SourceType,
    /// Path of the source document the chunk was cut from; used as the
    /// delete key on re-ingestion.
    pub source_origin: String,
    /// Citation anchor shown to the user.
    pub page_reference: String,
}

impl KnowledgeChunk {
    /// Validate the chunk against the corpus invariants: bounded content
    /// length, embedding dimensionality matching the index, and bounded
    /// taxonomy labels.
    pub fn validate(&self, expected_dim: usize) -> Result<(), ValidationError> {
        if self.chunk_id.trim().is_empty() {
            return Err(ValidationError::Invalid("chunk_id is required".to_string()));
        }

        let content_len = self.content.chars().count();
        if content_len < MIN_CONTENT_CHARS {
            return Err(ValidationError::Invalid(format!(
                "content must be at least {} characters",
                MIN_CONTENT_CHARS
            )));
        }
        if content_len > MAX_CONTENT_CHARS {
            return Err(ValidationError::Invalid(format!(
                "content must not exceed {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        if self.embedding.len() != expected_dim {
            return Err(ValidationError::Invalid(format!(
                "embedding has {} dimensions, index expects {}",
                self.embedding.len(),
                expected_dim
            )));
        }

        for (name, value) in [
            ("module", &self.module),
            ("chapter", &self.chapter),
            ("subsection", &self.subsection),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Invalid(format!("{} is required", name)));
            }
            if value.chars().count() > MAX_LABEL_CHARS {
                return Err(ValidationError::Invalid(format!(
                    "{} must not exceed {} characters",
                    name, MAX_LABEL_CHARS
                )));
            }
        }

        Ok(())
    }
}
