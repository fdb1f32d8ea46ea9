use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::state::AppState;

const DEFAULT_MESSAGE_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let conversation = state
        .store
        .get_conversation(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session '{}' not found", session_id)))?;

    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
    let messages = state.store.get_messages(&session_id, limit).await?;

    Ok(Json(json!({
        "session_id": conversation.id,
        "created_at": conversation.created_at,
        "updated_at": conversation.updated_at,
        "messages": messages,
    })))
}
