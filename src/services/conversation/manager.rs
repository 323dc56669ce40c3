use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::cache::ConversationCache;
use super::types::ConversationState;
use crate::database::models::{MessageRole, SessionContextSnapshot};
use crate::database::vector_store::ScoredChunk;
use crate::database::Repository;
use crate::models::chat::{ChatResponse, QuestionAnalysis, SessionId};
use crate::services::embedding_service::EmbeddingService;
use crate::services::generator::{GenerationRequest, Generator};
use crate::services::memory_policy::{is_clarifying_question, MemoryDecisionInput, MemoryPolicy, MemoryStrategy};
use crate::services::retrieval_engine::{RetrievalEngine, RetrievalRequest};
use crate::services::source_filter::SourceFilter;
use crate::utils::error::ApiError;

const RECENT_MESSAGE_LIMIT: i64 = 5;

pub struct ChatTurnRequest<'a> {
    pub user_id: i64,
    pub access_level: &'a str,
    pub session_id: Option<SessionId>,
    pub message: &'a str,
    pub requested_section: Option<&'a str>,
    pub allowed_sections: &'a [String],
    pub strict_section_search: bool,
    pub limit: usize,
    pub score_threshold: f32,
}

/// Orchestrates one chat turn: memory-policy decision, retrieval (if any),
/// source filtering, and generation (§4.6, §4.7).
pub struct ConversationManager {
    repository: Arc<Repository>,
    cache: ConversationCache,
    retrieval_engine: Arc<RetrievalEngine>,
    generator: Arc<Generator>,
    embedder: Arc<EmbeddingService>,
    max_context_size: usize,
    max_sessions_per_user: usize,
}

impl ConversationManager {
    pub fn new(
        repository: Arc<Repository>,
        retrieval_engine: Arc<RetrievalEngine>,
        generator: Arc<Generator>,
        embedder: Arc<EmbeddingService>,
        max_context_size: usize,
        max_sessions_per_user: usize,
    ) -> Self {
        Self {
            repository,
            cache: ConversationCache::new(),
            retrieval_engine,
            generator,
            embedder,
            max_context_size,
            max_sessions_per_user,
        }
    }

    pub async fn handle_message(&self, req: ChatTurnRequest<'_>) -> Result<ChatResponse, ApiError> {
        let session_id = req.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let lock = self.cache.session_lock(&session_id);
        let _guard = lock.try_lock().map_err(|_| ApiError::SessionBusy)?;

        let conversation = self.repository.get_or_create_conversation(&session_id, req.user_id).await?;

        if req.session_id.is_none() {
            if let Err(e) = self
                .repository
                .prune_oldest_conversations(req.user_id, self.max_sessions_per_user.max(1))
                .await
            {
                warn!(user_id = req.user_id, error = %e, "session cap enforcement failed, continuing");
            }
        }
        let recent_messages = self.repository.recent_messages(conversation.id, RECENT_MESSAGE_LIMIT).await?;
        let previous_user_message = recent_messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone());

        let mut cache_state = self
            .cache
            .get(&session_id)
            .unwrap_or_else(|| ConversationState::new(session_id.clone(), req.user_id));

        let decision_input = MemoryDecisionInput {
            new_query: req.message,
            previous_user_message: previous_user_message.as_deref(),
            message_count: recent_messages.len(),
            document_context: &conversation.document_context,
            requested_section: req.requested_section,
            current_section: conversation.current_section.as_deref(),
        };

        let is_clarifying = previous_user_message
            .as_deref()
            .map(|prev| is_clarifying_question(req.message, prev))
            .unwrap_or(false);

        // Only embed the new query when the decision actually needs a similarity
        // score or a fresh retrieval — honors the one-embedding-call budget (§5).
        let needs_query_embedding = !is_clarifying
            && !conversation.document_context.is_empty()
            && recent_messages.len() >= 2
            && req
                .requested_section
                .map(|s| conversation.current_section.as_deref() == Some(s))
                .unwrap_or(true);

        let mut query_embedding = None;
        let mut similarity = None;
        if needs_query_embedding {
            match self.embedder.embed(req.message).await {
                Ok(embedding) => {
                    if let Some(previous_embedding) = &cache_state.last_query_embedding {
                        similarity = cosine_similarity(&embedding, previous_embedding).ok();
                    }
                    query_embedding = Some(embedding);
                }
                Err(e) => warn!(error = %e, "query embedding failed, falling back to new_search"),
            }
        }

        let strategy = MemoryPolicy::decide(&decision_input, similarity);

        let target_section = req.requested_section.or(conversation.current_section.as_deref());

        let (chunks, document_context) = match strategy {
            MemoryStrategy::ContextReuse => (Vec::new(), conversation.document_context.clone()),
            MemoryStrategy::HybridContext | MemoryStrategy::NewSearch => {
                let retrieved = self
                    .retrieval_engine
                    .retrieve(RetrievalRequest {
                        query: req.message,
                        allowed_sections: req.allowed_sections,
                        target_section,
                        strict_section_search: req.strict_section_search,
                        access_level: req.access_level,
                        limit: req.limit,
                        score_threshold: req.score_threshold,
                    })
                    .await;

                let fresh_snapshots = snapshots_from_chunks(&retrieved, req.message);
                let merged = match strategy {
                    MemoryStrategy::HybridContext => {
                        MemoryPolicy::merge(conversation.document_context.clone(), fresh_snapshots)
                    }
                    _ => MemoryPolicy::merge(Vec::new(), fresh_snapshots),
                };
                (retrieved, merged)
            }
        };

        let retained = SourceFilter::filter(&chunks);
        let documents = self.load_documents(&retained).await?;
        let sources = SourceFilter::citations(&retained, &documents);

        let generation = self
            .generator
            .generate(GenerationRequest {
                query: req.message,
                chunks: &chunks,
                recent_messages: &recent_messages,
                document_context: &document_context,
                current_section: target_section,
                is_clarifying,
            })
            .await;

        let document_context = super::types::evict_to_capacity(document_context, self.max_context_size);

        self.repository
            .update_conversation_context(conversation.id, target_section, &document_context, &conversation.search_context)
            .await?;

        self.repository
            .append_message(conversation.id, MessageRole::User, req.message, None, None, None, &[], &[])
            .await?;

        let source_documents: Vec<i64> = sources.iter().map(|s| s.document_id).collect();
        let source_chunks: Vec<i64> = sources.iter().map(|s| s.chunk_id).collect();
        let used_sections = target_section.map(|s| vec![s.to_string()]);
        self.repository
            .append_message(
                conversation.id,
                MessageRole::Assistant,
                &generation.response,
                Some(req.message),
                used_sections.as_deref(),
                similarity,
                &source_chunks,
                &source_documents,
            )
            .await?;

        if let Some(embedding) = query_embedding {
            cache_state.last_query_embedding = Some(embedding);
        }
        cache_state.touch();
        self.cache.set(session_id.clone(), cache_state);

        info!(session_id, strategy = ?strategy_label(strategy), chunks = chunks.len(), "chat turn complete");

        Ok(ChatResponse {
            response: generation.response,
            session_id,
            sources,
            context_chunks_used: chunks.len(),
            timestamp: Utc::now(),
            follow_up_questions: generation.follow_up_questions,
            image_analysis: None,
            response_strategy: generation.response_strategy,
            question_analysis: QuestionAnalysis {
                is_clarifying,
                memory_strategy: strategy_label(strategy).to_string(),
                similarity_to_previous: similarity,
            },
        })
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.cache.remove(session_id);
        self.repository.delete_conversation(session_id).await?;
        Ok(())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Evicts cache entries idle past `timeout_minutes` (§4 `session_timeout_minutes`).
    pub fn cleanup_expired_sessions(&self, timeout_minutes: i64) -> usize {
        self.cache.cleanup_expired(timeout_minutes)
    }

    async fn load_documents(
        &self,
        chunks: &[&ScoredChunk],
    ) -> Result<std::collections::HashMap<i64, crate::database::models::Document>, ApiError> {
        let mut documents = std::collections::HashMap::new();
        let mut seen = std::collections::HashSet::new();
        for chunk in chunks {
            if !seen.insert(chunk.document_id) {
                continue;
            }
            if let Some(document) = self.repository.get_document(chunk.document_id).await? {
                documents.insert(chunk.document_id, document);
            }
        }
        Ok(documents)
    }
}

fn snapshots_from_chunks(chunks: &[ScoredChunk], query: &str) -> Vec<SessionContextSnapshot> {
    chunks
        .iter()
        .map(|c| SessionContextSnapshot {
            document_id: c.document_id,
            section: c.section.clone(),
            content_preview: c.content.chars().take(200).collect(),
            query: query.to_string(),
            score: c.score,
            timestamp: Utc::now(),
        })
        .collect()
}

fn strategy_label(strategy: MemoryStrategy) -> &'static str {
    match strategy {
        MemoryStrategy::ContextReuse => "context_reuse",
        MemoryStrategy::HybridContext => "hybrid_context",
        MemoryStrategy::NewSearch => "new_search",
    }
}

/// How close the current query's embedding is to the previous one, used to
/// decide whether the turn can reuse the last retrieval instead of searching
/// again. Returns an error on mismatched dimensions rather than panicking,
/// since both vectors come from the same embedding model and a mismatch
/// means something upstream is misconfigured.
fn cosine_similarity(a: &[f32], b: &[f32]) -> anyhow::Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!("embedding dimensions must match: {} != {}", a.len(), b.len());
    }
    if a.is_empty() {
        anyhow::bail!("embeddings cannot be empty");
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod similarity_tests {
    use super::cosine_similarity;

    #[test]
    fn identical_embeddings_score_one() {
        let v = vec![0.1, 0.4, 0.2, 0.9];
        let score = cosine_similarity(&v, &v).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn perpendicular_embeddings_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let score = cosine_similarity(&a, &b).unwrap();
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn opposite_embeddings_score_minus_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        let score = cosine_similarity(&a, &b).unwrap();
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn all_zero_embedding_scores_zero_instead_of_nan() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        let score = cosine_similarity(&a, &b).unwrap();
        assert_eq!(score, 0.0);
    }
}

