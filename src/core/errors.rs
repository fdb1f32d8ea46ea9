use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            ),
            // Internal details go to the log, not the client.
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Malformed caller input. Always surfaces as a 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("query text must be between 1 and {max} characters")]
    QueryLength { max: usize },
    #[error("selected text is required for per-page retrieval mode")]
    MissingSelectedText,
    #[error("{0}")]
    Invalid(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Embedding or vector-index provider failure.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("embedding provider error: {0}")]
    Embedding(String),
    #[error("vector index error: {0}")]
    Index(String),
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Validation(inner) => inner.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// LLM provider failure. Configuration problems (bad API key) are kept
/// distinct from transient provider errors so the orchestrator can report
/// them differently.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation provider configuration error: {0}")]
    Config(String),
    #[error("generation provider error: {0}")]
    Provider(String),
}

impl GenerationError {
    pub fn is_config(&self) -> bool {
        matches!(self, GenerationError::Config(_))
    }
}

/// Database unavailable or query failure. Absorbed by the orchestrator;
/// never reaches the HTTP boundary.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("conversation store is degraded")]
    Unavailable,
    #[error("database error: {0}")]
    Query(String),
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Unavailable => ApiError::ServiceUnavailable,
            PersistenceError::Query(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err: ApiError = ValidationError::MissingSelectedText.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn retrieval_provider_errors_map_to_internal() {
        let err: ApiError = RetrievalError::Index("index unreachable".to_string()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn nested_validation_still_maps_to_bad_request() {
        let err: ApiError =
            RetrievalError::Validation(ValidationError::QueryLength { max: 1000 }).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn degraded_store_maps_to_service_unavailable() {
        let err: ApiError = PersistenceError::Unavailable.into();
        assert!(matches!(err, ApiError::ServiceUnavailable));
    }

    #[test]
    fn config_errors_are_distinguished() {
        assert!(GenerationError::Config("invalid api key".to_string()).is_config());
        assert!(!GenerationError::Provider("timeout".to_string()).is_config());
    }
}
