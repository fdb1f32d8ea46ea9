use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::rag::chunk::{KnowledgeChunk, SourceType};
use crate::rag::embedding::InputType;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestChunk {
    pub chunk_id: String,
    pub content: String,
    pub module: String,
    pub chapter: String,
    pub subsection: String,
    pub source_type: SourceType,
    pub source_origin: String,
    pub page_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub chunks: Vec<IngestChunk>,
}

/// Embed and index a batch of textbook chunks. Chunk validation runs
/// inside the upsert; a bad chunk rejects the whole batch.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.chunks.is_empty() {
        return Err(ApiError::BadRequest("chunks must not be empty".to_string()));
    }

    let texts: Vec<String> = req.chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = state
        .embeddings
        .embed(&texts, InputType::SearchDocument)
        .await?;

    let chunks: Vec<KnowledgeChunk> = req
        .chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| KnowledgeChunk {
            chunk_id: chunk.chunk_id,
            content: chunk.content,
            embedding,
            module: chunk.module,
            chapter: chunk.chapter,
            subsection: chunk.subsection,
            source_type: chunk.source_type,
            source_origin: chunk.source_origin,
            page_reference: chunk.page_reference,
        })
        .collect();

    state.index.ensure_collection().await?;
    state.index.upsert(&chunks).await?;
    tracing::info!("indexed {} chunks", chunks.len());

    Ok(Json(json!({ "indexed": chunks.len() })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteSourceRequest {
    pub source_origin: String,
}

/// Drop every chunk cut from one source document, ahead of a re-ingest.
pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteSourceRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.source_origin.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "source_origin is required".to_string(),
        ));
    }

    state.index.delete_by_origin(&req.source_origin).await?;
    tracing::info!("deleted chunks from '{}'", req.source_origin);

    Ok(Json(json!({ "deleted_source": req.source_origin })))
}
