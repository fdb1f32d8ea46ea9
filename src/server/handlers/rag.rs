use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::chat::orchestrator::GroundedOutcome;
use crate::core::errors::ApiError;
use crate::server::handlers::chat::ChatRequest;
use crate::state::AppState;

/// Chat with an explicit confidence score and structured citations. Low
/// confidence answers with a flagged fallback instead of guessing.
pub async fn grounded_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<GroundedOutcome>, ApiError> {
    let outcome = state
        .orchestrator
        .answer_grounded(
            &req.message,
            req.mode,
            req.selected_text.as_deref(),
            req.filters.as_ref(),
            req.session_id,
        )
        .await?;

    Ok(Json(outcome))
}
