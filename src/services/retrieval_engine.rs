use crate::database::vector_store::{ScoredChunk, SearchFilter, VectorStore};
use crate::services::embedding_service::EmbeddingService;
use crate::utils::limiters::Limiters;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Turns a query into a ranked, access-constrained chunk list (§4.5).
pub struct RetrievalEngine {
    vector_store: Arc<VectorStore>,
    embedder: Arc<EmbeddingService>,
    limiters: Arc<Limiters>,
}

pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub allowed_sections: &'a [String],
    pub target_section: Option<&'a str>,
    pub strict_section_search: bool,
    pub access_level: &'a str,
    pub limit: usize,
    pub score_threshold: f32,
}

impl RetrievalEngine {
    pub fn new(vector_store: Arc<VectorStore>, embedder: Arc<EmbeddingService>, limiters: Arc<Limiters>) -> Self {
        Self {
            vector_store,
            embedder,
            limiters,
        }
    }

    async fn search_and_rank(
        &self,
        query_vector: &[f32],
        filter: &SearchFilter,
        threshold: f32,
        limit: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        let (_permit, wait) =
            Limiters::acquire_timed(self.limiters.db_search.clone(), self.limiters.acquire_timeout, "db_search")
                .await?;
        tracing::debug!(wait_ms = wait.as_millis() as u64, op = "db_search", "wait_queue");
        self.vector_store.search_and_rank(query_vector, filter, threshold, limit).await
    }

    pub async fn retrieve(&self, req: RetrievalRequest<'_>) -> Vec<ScoredChunk> {
        let target_allowed = req
            .target_section
            .filter(|s| req.allowed_sections.iter().any(|a| a == s));

        // 1. Access check.
        if req.target_section.is_some() && target_allowed.is_none() && req.strict_section_search {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(req.query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, returning empty result set");
                return Vec::new();
            }
        };

        let raised_threshold = req.score_threshold.max(0.6);
        let mut section_pass_results = Vec::new();

        // 2. Section-specific pass.
        if let Some(section) = target_allowed {
            let filter = SearchFilter {
                section: Some(section.to_string()),
                access_level: Some(req.access_level.to_string()),
                ..Default::default()
            };
            section_pass_results = self
                .search_and_rank(&query_vector, &filter, raised_threshold, req.limit * 2)
                .await
                .unwrap_or_else(|e| {
                    warn!(section, error = %e, "section pass failed, treating as empty");
                    Vec::new()
                });

            // 3. Quality gate.
            let quality_bar_met = section_pass_results
                .iter()
                .any(|c| c.score > 0.8 * raised_threshold);
            if quality_bar_met {
                section_pass_results.truncate(req.limit);
                return section_pass_results;
            }

            if req.strict_section_search {
                section_pass_results.truncate(req.limit);
                return section_pass_results;
            }
        } else if req.strict_section_search {
            return Vec::new();
        }

        if req.allowed_sections.is_empty() {
            return section_pass_results;
        }

        // 4. Fallback pass across every allowed section.
        let per_section_limit = (req.limit / req.allowed_sections.len()).max(1);
        let lowered_threshold = req.score_threshold * 0.6;
        let mut merged: HashMap<(i64, i64), ScoredChunk> = HashMap::new();

        for chunk in section_pass_results {
            merged.insert((chunk.document_id, chunk.chunk_id), chunk);
        }

        for section in req.allowed_sections {
            let filter = SearchFilter {
                section: Some(section.clone()),
                access_level: Some(req.access_level.to_string()),
                ..Default::default()
            };
            match self
                .search_and_rank(&query_vector, &filter, lowered_threshold, per_section_limit)
                .await
            {
                Ok(chunks) => {
                    for chunk in chunks {
                        let key = (chunk.document_id, chunk.chunk_id);
                        merged
                            .entry(key)
                            .and_modify(|existing| {
                                if chunk.score > existing.score {
                                    *existing = chunk.clone();
                                }
                            })
                            .or_insert(chunk);
                    }
                }
                Err(e) => warn!(section, error = %e, "fallback pass failed, skipping section"),
            }
        }

        // 5. Merge.
        let mut out: Vec<ScoredChunk> = merged.into_values().collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(req.limit);
        out
    }
}
