//! Chat orchestration: retrieve context, generate an answer, persist the
//! exchange.
//!
//! Persistence failures never fail a chat turn; the store degrades and the
//! answer still goes out. Generation failures degrade to a fixed fallback
//! answer so the endpoint keeps its contract.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::errors::RetrievalError;
use crate::history::{ConversationStore, Role};
use crate::llm::provider::GenerationProvider;
use crate::rag::engine::{RetrievalEngine, RetrievalMode, RetrievedChunk};
use crate::rag::index::MetadataFilter;
use crate::rag::scoring::{confidence_score, format_citation};

const FALLBACK_ANSWER: &str = "I could not find an answer in the book content.";
const CONFIG_ERROR_ANSWER: &str =
    "The assistant is not configured correctly. Please contact the administrator.";
const GATED_FALLBACK: &str = "I couldn't find relevant information in the textbook to answer \
     your question. Please try rephrasing your question or check other sections of the textbook.";

/// Confidence below this is treated as no usable evidence; the grounded
/// endpoint answers with the fallback instead of calling the generator.
const MIN_CONFIDENCE: f32 = 0.2;

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub session_id: String,
    pub citations: Vec<String>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A citation with enough metadata for the client to render provenance.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub chunk_id: String,
    pub citation: String,
    pub score: f32,
    pub source_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundedOutcome {
    pub response: String,
    pub session_id: String,
    pub confidence_score: f32,
    pub is_fallback: bool,
    pub sources: Vec<SourceCitation>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct ChatOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<dyn GenerationProvider>,
    store: Arc<ConversationStore>,
    confidence_floor: f32,
}

impl ChatOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<dyn GenerationProvider>,
        store: Arc<ConversationStore>,
        confidence_floor: f32,
    ) -> Self {
        Self {
            retrieval,
            generator,
            store,
            confidence_floor,
        }
    }

    /// Answer a chat message. Retrieval errors propagate; generation and
    /// persistence failures are absorbed.
    pub async fn answer(
        &self,
        query: &str,
        mode: RetrievalMode,
        selected_text: Option<&str>,
        filters: Option<&MetadataFilter>,
        session_id: Option<String>,
    ) -> Result<ChatOutcome, RetrievalError> {
        let started = Instant::now();

        let chunks = self
            .retrieval
            .retrieve(query, mode, selected_text, filters)
            .await?;

        let session_id = self.resolve_session(session_id).await;

        let context = build_context(&chunks, selected_text);
        let prompt = build_prompt(&context, query);
        let response = self.generate_with_fallback(&prompt).await;

        // Citations are the ids of every chunk that passed the threshold.
        let citations: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        self.persist_exchange(&session_id, query, &response, &chunks, selected_text)
            .await;

        Ok(ChatOutcome {
            response,
            session_id,
            citations,
            response_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    /// Answer with an explicit confidence score. When retrieval produces no
    /// usable evidence the generator is never called and the response is a
    /// flagged fallback.
    pub async fn answer_grounded(
        &self,
        query: &str,
        mode: RetrievalMode,
        selected_text: Option<&str>,
        filters: Option<&MetadataFilter>,
        session_id: Option<String>,
    ) -> Result<GroundedOutcome, RetrievalError> {
        let started = Instant::now();

        let chunks = self
            .retrieval
            .retrieve(query, mode, selected_text, filters)
            .await?;

        let session_id = self.resolve_session(session_id).await;

        let scores: Vec<f32> = chunks.iter().map(|c| c.score).collect();
        let confidence = confidence_score(&scores, self.confidence_floor);

        let (response, is_fallback, sources) = if chunks.is_empty() || confidence < MIN_CONFIDENCE
        {
            tracing::info!(
                "answering with fallback: {} chunks, confidence {:.3}",
                chunks.len(),
                confidence
            );
            (GATED_FALLBACK.to_string(), true, Vec::new())
        } else {
            let context = build_context(&chunks, selected_text);
            let prompt = build_prompt(&context, query);
            let response = self.generate_with_fallback(&prompt).await;
            let sources = chunks
                .iter()
                .map(|chunk| SourceCitation {
                    chunk_id: chunk.chunk_id.clone(),
                    citation: format_citation(chunk),
                    score: chunk.score,
                    source_type: chunk.source_type.clone(),
                })
                .collect();
            (response, false, sources)
        };

        self.persist_exchange(&session_id, query, &response, &chunks, selected_text)
            .await;

        Ok(GroundedOutcome {
            response,
            session_id,
            confidence_score: confidence,
            is_fallback,
            sources,
            response_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    pub async fn translate(&self, text: &str, target_language: &str) -> String {
        let prompt = format!(
            "Translate the following textbook passage into {}. Preserve technical \
             terminology and formatting. Reply with the translation only.\n\n{}",
            target_language, text
        );
        self.generate_with_fallback(&prompt).await
    }

    pub async fn personalize(&self, text: &str, learner_profile: &str) -> String {
        let prompt = format!(
            "Rewrite the following textbook passage for this learner: {}. Keep the \
             technical content accurate. Reply with the rewritten passage only.\n\n{}",
            learner_profile, text
        );
        self.generate_with_fallback(&prompt).await
    }

    /// Use the caller's session id if given, otherwise mint one. The create
    /// is idempotent, so an existing id is simply reused.
    async fn resolve_session(&self, session_id: Option<String>) -> String {
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Err(e) = self
            .store
            .create_conversation(&session_id, serde_json::json!({}))
            .await
        {
            tracing::warn!("could not persist conversation {}: {}", session_id, e);
        }

        session_id
    }

    async fn generate_with_fallback(&self, prompt: &str) -> String {
        match self.generator.generate(prompt).await {
            Ok(text) => text,
            Err(e) if e.is_config() => {
                tracing::error!("generation provider misconfigured: {}", e);
                CONFIG_ERROR_ANSWER.to_string()
            }
            Err(e) => {
                tracing::warn!("generation failed, using fallback answer: {}", e);
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    async fn persist_exchange(
        &self,
        session_id: &str,
        query: &str,
        response: &str,
        chunks: &[RetrievedChunk],
        selected_text: Option<&str>,
    ) {
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

        // Each turn is persisted independently; a failed user insert does
        // not skip the assistant insert.
        if let Err(e) = self
            .store
            .add_message(
                session_id,
                Role::User,
                query,
                &chunk_ids,
                selected_text.unwrap_or_default(),
            )
            .await
        {
            tracing::warn!("could not persist user message: {}", e);
        }

        if let Err(e) = self
            .store
            .add_message(session_id, Role::Assistant, response, &chunk_ids, "")
            .await
        {
            tracing::warn!("could not persist assistant message: {}", e);
        }
    }
}

fn build_context(chunks: &[RetrievedChunk], selected_text: Option<&str>) -> String {
    let mut sections = Vec::new();

    if let Some(selected) = selected_text.filter(|s| !s.trim().is_empty()) {
        sections.push(format!("Selected text context:\n{}", selected));
    }

    if chunks.is_empty() {
        sections.push("No relevant textbook content found.".to_string());
    } else {
        let body = chunks
            .iter()
            .map(|chunk| format!("[{}]\n{}", format_citation(chunk), chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!("Relevant textbook content:\n{}", body));
    }

    sections.join("\n\n")
}

fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "You are a teaching assistant for a robotics textbook. Answer using only the \
         provided textbook content. If the content does not answer the question, say \
         that you could not find the answer in the book.\n\n{}\n\nQuestion: {}\n\nAnswer:",
        context, query
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::errors::GenerationError;
    use crate::core::settings::Settings;
    use crate::rag::chunk::KnowledgeChunk;
    use crate::rag::embedding::{EmbeddingProvider, InputType};
    use crate::rag::index::{ChunkPayload, ScoredPoint, VectorIndex};

    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn name(&self) -> &str {
            "fake"
        }

        async fn embed(
            &self,
            texts: &[String],
            _input_type: InputType,
        ) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct FakeIndex {
        hits: Vec<ScoredPoint>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        fn name(&self) -> &str {
            "fake"
        }

        async fn search(
            &self,
            _vector: &[f32],
            _limit: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<ScoredPoint>, RetrievalError> {
            Ok(self.hits.clone())
        }

        async fn ensure_collection(&self) -> Result<(), RetrievalError> {
            Ok(())
        }

        async fn upsert(&self, _chunks: &[KnowledgeChunk]) -> Result<(), RetrievalError> {
            Ok(())
        }

        async fn delete_by_origin(&self, _source_origin: &str) -> Result<(), RetrievalError> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct FakeGenerator {
        response: String,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeGenerator {
        fn answering(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                response: String::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for FakeGenerator {
        fn name(&self) -> &str {
            "fake"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GenerationError::Provider("upstream timeout".to_string()))
            } else {
                Ok(self.response.clone())
            }
        }
    }

    fn hit(id: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score,
            payload: ChunkPayload {
                content: format!("content of {}", id),
                module: "Module 1".to_string(),
                chapter: "Chapter 1".to_string(),
                subsection: "Intro".to_string(),
                source_type: "textbook".to_string(),
                page_reference: "module-1/intro".to_string(),
                ..Default::default()
            },
        }
    }

    fn orchestrator(
        hits: Vec<ScoredPoint>,
        generator: Arc<FakeGenerator>,
        threshold: f32,
    ) -> ChatOrchestrator {
        let mut settings = Settings::from_env();
        settings.relevance_threshold = threshold;
        settings.confidence_floor = 0.3;
        settings.result_limit = 5;
        settings.max_message_length = 1000;

        let engine = RetrievalEngine::new(
            Arc::new(FakeEmbedder),
            Arc::new(FakeIndex { hits }),
            &settings,
        );
        ChatOrchestrator::new(
            Arc::new(engine),
            generator,
            Arc::new(ConversationStore::disabled()),
            settings.confidence_floor,
        )
    }

    #[tokio::test]
    async fn relevant_chunk_is_cited_in_the_answer() {
        let generator = Arc::new(FakeGenerator::answering("ROS is a middleware."));
        let orch = orchestrator(vec![hit("c1", 0.9)], generator.clone(), 0.25);

        let outcome = orch
            .answer("What is ROS?", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert_eq!(outcome.response, "ROS is a middleware.");
        assert_eq!(outcome.citations, vec!["c1"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_page_without_selection_makes_no_provider_calls() {
        let generator = Arc::new(FakeGenerator::answering("unused"));
        let orch = orchestrator(vec![hit("c1", 0.9)], generator.clone(), 0.25);

        let err = orch
            .answer(
                "Explain this",
                RetrievalMode::PerPage,
                Some("   "),
                None,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetrievalError::Validation(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_evidence_yields_flagged_fallback_without_generation() {
        let generator = Arc::new(FakeGenerator::answering("unused"));
        // All hits are below the threshold.
        let orch = orchestrator(vec![hit("c1", 0.05)], generator.clone(), 0.25);

        let outcome = orch
            .answer_grounded("Unrelated question", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert!(outcome.is_fallback);
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.confidence_score, 0.0);
        assert_eq!(outcome.response, GATED_FALLBACK);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_confidence_evidence_is_gated_even_when_present() {
        let generator = Arc::new(FakeGenerator::answering("unused"));
        // Threshold 0.0 lets the weak hit through; confidence gating still
        // rejects it (0.5 * 0.1 / 0.3 < 0.2).
        let orch = orchestrator(vec![hit("c1", 0.1)], generator.clone(), 0.0);

        let outcome = orch
            .answer_grounded("Question", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert!(outcome.is_fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confident_evidence_produces_scored_sources() {
        let generator = Arc::new(FakeGenerator::answering("Nodes exchange messages."));
        let orch = orchestrator(vec![hit("c1", 0.9), hit("c2", 0.8)], generator, 0.25);

        let outcome = orch
            .answer_grounded("How do nodes talk?", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert!(!outcome.is_fallback);
        assert!(outcome.confidence_score > 0.5);
        assert_eq!(outcome.sources.len(), 2);
        assert_eq!(outcome.sources[0].chunk_id, "c1");
        assert!(outcome.sources[0].citation.contains("module-1/intro"));
    }

    #[tokio::test]
    async fn degraded_store_does_not_fail_the_chat_turn() {
        let generator = Arc::new(FakeGenerator::answering("Still works."));
        let orch = orchestrator(vec![hit("c1", 0.9)], generator, 0.25);

        let outcome = orch
            .answer("What is ROS?", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert_eq!(outcome.response, "Still works.");
        assert!(Uuid::parse_str(&outcome.session_id).is_ok());
    }

    #[tokio::test]
    async fn both_turns_are_attempted_when_persistence_fails() {
        let store = Arc::new(ConversationStore::disabled());
        let mut settings = Settings::from_env();
        settings.relevance_threshold = 0.25;
        settings.confidence_floor = 0.3;
        settings.result_limit = 5;
        settings.max_message_length = 1000;

        let engine = RetrievalEngine::new(
            Arc::new(FakeEmbedder),
            Arc::new(FakeIndex {
                hits: vec![hit("c1", 0.9)],
            }),
            &settings,
        );
        let orch = ChatOrchestrator::new(
            Arc::new(engine),
            Arc::new(FakeGenerator::answering("ok")),
            store.clone(),
            settings.confidence_floor,
        );

        orch.answer("What is ROS?", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        // The failed user insert must not skip the assistant insert.
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn caller_session_id_is_kept() {
        let generator = Arc::new(FakeGenerator::answering("ok"));
        let orch = orchestrator(vec![hit("c1", 0.9)], generator, 0.25);

        let outcome = orch
            .answer(
                "What is ROS?",
                RetrievalMode::FullBook,
                None,
                None,
                Some("session-42".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.session_id, "session-42");
    }

    #[tokio::test]
    async fn generation_failure_degrades_to_fallback_answer() {
        let generator = Arc::new(FakeGenerator::failing());
        let orch = orchestrator(vec![hit("c1", 0.9)], generator, 0.25);

        let outcome = orch
            .answer("What is ROS?", RetrievalMode::FullBook, None, None, None)
            .await
            .unwrap();

        assert_eq!(outcome.response, FALLBACK_ANSWER);
        // Retrieval still worked, so the citation is kept.
        assert_eq!(outcome.citations.len(), 1);
    }

    #[test]
    fn context_labels_selected_text_and_chunks() {
        let chunks = vec![RetrievedChunk {
            chunk_id: "c1".to_string(),
            content: "Nodes publish to topics.".to_string(),
            module: "Module 1".to_string(),
            chapter: "Chapter 1".to_string(),
            subsection: "Topics".to_string(),
            source_type: "textbook".to_string(),
            page_reference: "module-1/topics".to_string(),
            score: 0.9,
        }];

        let context = build_context(&chunks, Some("a highlighted passage"));
        assert!(context.starts_with("Selected text context:\na highlighted passage"));
        assert!(context.contains("Relevant textbook content:"));
        assert!(context.contains("Nodes publish to topics."));

        let empty = build_context(&[], None);
        assert_eq!(empty, "No relevant textbook content found.");
    }
}
