use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat::orchestrator::ChatOutcome;
use crate::core::errors::ApiError;
use crate::rag::engine::RetrievalMode;
use crate::rag::index::MetadataFilter;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default)]
    pub filters: Option<MetadataFilter>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatOutcome>, ApiError> {
    let outcome = state
        .orchestrator
        .answer(
            &req.message,
            req.mode,
            req.selected_text.as_deref(),
            req.filters.as_ref(),
            req.session_id,
        )
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub target_language: String,
}

pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }
    if req.target_language.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "target_language is required".to_string(),
        ));
    }

    let translated = state
        .orchestrator
        .translate(&req.text, &req.target_language)
        .await;

    Ok(Json(json!({
        "translated_text": translated,
        "target_language": req.target_language,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PersonalizeRequest {
    pub text: String,
    pub learner_profile: String,
}

pub async fn personalize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PersonalizeRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }
    if req.learner_profile.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "learner_profile is required".to_string(),
        ));
    }

    let personalized = state
        .orchestrator
        .personalize(&req.text, &req.learner_profile)
        .await;

    Ok(Json(json!({ "personalized_text": personalized })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults_to_full_book_mode() {
        let req: ChatRequest = serde_json::from_value(json!({ "message": "What is ROS?" })).unwrap();
        assert_eq!(req.mode, RetrievalMode::FullBook);
        assert!(req.selected_text.is_none());
        assert!(req.session_id.is_none());
        assert!(req.filters.is_none());
    }

    #[test]
    fn chat_request_accepts_per_page_with_filters() {
        let req: ChatRequest = serde_json::from_value(json!({
            "message": "Explain this",
            "mode": "per-page",
            "selected_text": "a passage",
            "filters": { "module": "Module 1", "chapter": ["Ch 1", "Ch 2"] }
        }))
        .unwrap();
        assert_eq!(req.mode, RetrievalMode::PerPage);
        assert_eq!(req.filters.unwrap().len(), 2);
    }
}
