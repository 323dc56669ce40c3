use crate::database::models::{IngestState, VectorPayload};
use crate::database::vector_store::{VectorPoint, VectorStore, MAX_CHUNKS_FOR_VECTOR_STORE};
use crate::database::Repository;
use crate::document::{DocumentParser, TextChunker};
use crate::services::embedding_service::EmbeddingService;
use crate::utils::error::ApiError;
use std::sync::Arc;
use tracing::{info, warn};

/// Ties §4.1-§4.4 into the per-document pipeline described in §4.8: fetch
/// blob, parse, chunk, embed (per-chunk tolerant), index, persist, mark
/// processed, clean up.
pub struct IngestionOrchestrator {
    repository: Arc<Repository>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<EmbeddingService>,
    chunker: TextChunker,
}

impl IngestionOrchestrator {
    pub fn new(
        repository: Arc<Repository>,
        vector_store: Arc<VectorStore>,
        embedder: Arc<EmbeddingService>,
        chunk_target_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            repository,
            vector_store,
            embedder,
            chunker: TextChunker::new(chunk_target_size, chunk_overlap),
        }
    }

    /// Runs the full pipeline for an already-uploaded document. Any fatal
    /// failure sets `processing_error` and leaves the document unprocessed
    /// rather than propagating — reprocessing always restarts from `parsing`.
    pub async fn ingest(&self, document_id: i64) -> Result<(), ApiError> {
        let document = self
            .repository
            .get_document(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document {document_id} not found")))?;

        self.repository
            .set_ingest_state(document_id, IngestState::Parsing, None)
            .await?;

        let data = match tokio::fs::read(&document.blob_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("failed to read blob: {e}");
                self.repository
                    .set_ingest_state(document_id, IngestState::Failed, Some(&message))
                    .await?;
                return Err(ApiError::Internal(anyhow::anyhow!(message)));
            }
        };

        let parsed = DocumentParser::parse(&data, &document.declared_content_kind, &document.original_filename);

        let chunks = self.chunker.chunk_blocks(&parsed.blocks);
        if chunks.is_empty() {
            let message = "no extractable content after parsing and chunking";
            self.repository
                .set_ingest_state(document_id, IngestState::Failed, Some(message))
                .await?;
            return Err(ApiError::BadRequest(message.to_string()));
        }

        self.repository
            .set_ingest_state(document_id, IngestState::Embedding, None)
            .await?;

        let mut points = Vec::with_capacity(chunks.len().min(MAX_CHUNKS_FOR_VECTOR_STORE));
        for chunk in &chunks {
            let chunk_id = self
                .repository
                .insert_chunk(
                    document_id,
                    chunk.chunk_index,
                    &chunk.content,
                    chunk.kind,
                    chunk.page,
                    chunk.section_name.as_deref(),
                )
                .await?;

            if points.len() >= MAX_CHUNKS_FOR_VECTOR_STORE {
                continue;
            }

            match self.embedder.embed(&chunk.content).await {
                Ok(vector) => points.push(VectorPoint {
                    chunk_id,
                    vector,
                    payload: VectorPayload {
                        document_id,
                        chunk_id,
                        content: chunk.content.clone(),
                        section: document.section.clone(),
                        access_level: document.access_level.clone(),
                        chunk_type: chunk.kind,
                        page_number: chunk.page,
                        section_name: chunk.section_name.clone(),
                        sheet_name: chunk.sheet_name.clone(),
                        document_name: document.original_filename.clone(),
                        file_kind: document.declared_content_kind.clone(),
                        chunk_index: chunk.chunk_index,
                        content_length: chunk.content.len() as i32,
                        has_images: parsed.has_images,
                        uploaded_at: document.uploaded_at,
                        processed_at: None,
                    },
                }),
                Err(e) => {
                    warn!(document_id, chunk_index = chunk.chunk_index, error = %e, "embedding failed for chunk, skipping");
                }
            }
        }

        if points.is_empty() {
            let message = "embedding failed for every chunk";
            self.repository
                .set_ingest_state(document_id, IngestState::Failed, Some(message))
                .await?;
            return Err(ApiError::LlmError(message.to_string()));
        }

        self.repository
            .set_ingest_state(document_id, IngestState::Indexing, None)
            .await?;

        let point_ids: Vec<(i64, String)> = points
            .iter()
            .map(|p| (p.chunk_id, p.chunk_id.to_string()))
            .collect();

        if let Err(e) = self.vector_store.upsert_points(points).await {
            let message = format!("vector indexing failed: {e}");
            self.repository
                .set_ingest_state(document_id, IngestState::Failed, Some(&message))
                .await?;
            return Err(ApiError::Internal(anyhow::anyhow!(message)));
        }

        for (chunk_id, embedding_id) in point_ids {
            self.repository.set_chunk_embedding_id(chunk_id, &embedding_id).await?;
        }

        self.repository
            .set_ingest_state(document_id, IngestState::Processed, None)
            .await?;

        info!(document_id, chunk_count = chunks.len(), "document ingestion complete");
        Ok(())
    }

    /// Removes blob (best-effort), vectors, chunk rows, and the document row
    /// in that order; a partial blob-delete failure never blocks the rest.
    pub async fn delete(&self, document_id: i64) -> Result<(), ApiError> {
        if let Some(document) = self.repository.get_document(document_id).await? {
            if let Err(e) = tokio::fs::remove_file(&document.blob_path).await {
                warn!(document_id, error = %e, "blob delete failed, continuing with row cleanup");
            }
        }

        self.vector_store.delete_by_document(document_id).await;
        self.repository.delete_chunks(document_id).await?;
        self.repository.delete_document(document_id).await?;
        Ok(())
    }
}
