use async_trait::async_trait;

use crate::core::errors::GenerationError;

/// An LLM backend that turns a fully-built prompt into an answer.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name for health reporting.
    fn name(&self) -> &str;

    /// Cheap reachability probe used by the health endpoint.
    async fn health_check(&self) -> bool;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
