//! Shared application state: every service the handlers need, wired once
//! at startup.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::chat::orchestrator::ChatOrchestrator;
use crate::core::settings::Settings;
use crate::history::ConversationStore;
use crate::llm::gemini::GeminiProvider;
use crate::llm::provider::GenerationProvider;
use crate::rag::embedding::{CohereEmbeddings, EmbeddingProvider};
use crate::rag::engine::RetrievalEngine;
use crate::rag::index::{QdrantIndex, VectorIndex};

pub type ApiLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AppState {
    pub settings: Settings,
    pub orchestrator: ChatOrchestrator,
    pub store: Arc<ConversationStore>,
    pub generator: Arc<dyn GenerationProvider>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub limiter: ApiLimiter,
}

impl AppState {
    /// Wire up every service. A missing LLM or embedding key fails startup;
    /// an unreachable database does not.
    pub async fn initialize(settings: Settings) -> anyhow::Result<Arc<Self>> {
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(CohereEmbeddings::new(&settings)?);
        let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&settings)?);
        let generator: Arc<dyn GenerationProvider> = Arc::new(GeminiProvider::new(&settings)?);
        let store = Arc::new(ConversationStore::connect(&settings).await);

        let engine = Arc::new(RetrievalEngine::new(
            embeddings.clone(),
            index.clone(),
            &settings,
        ));
        let orchestrator = ChatOrchestrator::new(
            engine,
            generator.clone(),
            store.clone(),
            settings.confidence_floor,
        );

        let per_minute =
            NonZeroU32::new(settings.rate_limit_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Arc::new(Self {
            settings,
            orchestrator,
            store,
            generator,
            embeddings,
            index,
            limiter,
        }))
    }
}
