//! Global request throttle for the generation endpoints.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.limiter.check().is_err() {
        tracing::warn!("rate limit exceeded on {}", request.uri().path());
        return Err(ApiError::TooManyRequests);
    }
    Ok(next.run(request).await)
}
