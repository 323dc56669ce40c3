use crate::database::models::{
    ChunkType, Conversation, ConversationMessage, Document, IngestState, MessageRole,
    SearchContextDescriptor, SessionContextSnapshot,
};
use crate::database::pool::DbPool;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value as Json;
use sqlx::Row;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ---- Documents -----------------------------------------------------

    pub async fn create_document(
        &self,
        owner_user_id: i64,
        original_filename: &str,
        blob_path: &str,
        size_bytes: i64,
        declared_content_kind: &str,
        title: Option<String>,
        description: Option<String>,
        section: &str,
        access_level: &str,
    ) -> Result<Document> {
        let row = sqlx::query(
            r#"INSERT INTO documents
                (owner_user_id, original_filename, blob_path, size_bytes, declared_content_kind,
                 title, description, section, access_level, ingest_state, extracted_metadata, uploaded_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,'uploaded','{}',$10)
               RETURNING id, owner_user_id, original_filename, blob_path, size_bytes,
                         declared_content_kind, detected_content_kind, title, description,
                         section, access_level, ingest_state, processing_error, has_images,
                         extracted_text_summary, extracted_metadata, uploaded_at, processed_at"#,
        )
        .bind(owner_user_id)
        .bind(original_filename)
        .bind(blob_path)
        .bind(size_bytes)
        .bind(declared_content_kind)
        .bind(title)
        .bind(description)
        .bind(section)
        .bind(access_level)
        .bind(Utc::now())
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row_to_document(row))
    }

    pub async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"SELECT id, owner_user_id, original_filename, blob_path, size_bytes,
                      declared_content_kind, detected_content_kind, title, description,
                      section, access_level, ingest_state, processing_error, has_images,
                      extracted_text_summary, extracted_metadata, uploaded_at, processed_at
               FROM documents WHERE id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(row_to_document))
    }

    /// Documents visible to a principal via its allowed sections (§6 GET /api/documents),
    /// independent of who uploaded them -- documents are a shared tenant resource.
    pub async fn list_documents_for_sections(&self, sections: &[String]) -> Result<Vec<Document>> {
        if sections.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"SELECT id, owner_user_id, original_filename, blob_path, size_bytes,
                      declared_content_kind, detected_content_kind, title, description,
                      section, access_level, ingest_state, processing_error, has_images,
                      extracted_text_summary, extracted_metadata, uploaded_at, processed_at
               FROM documents WHERE section = ANY($1) ORDER BY uploaded_at DESC"#,
        )
        .bind(sections)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    pub async fn set_ingest_state(
        &self,
        document_id: i64,
        state: IngestState,
        error: Option<&str>,
    ) -> Result<()> {
        let processed_at = if state == IngestState::Processed {
            Some(Utc::now())
        } else {
            None
        };
        sqlx::query(
            "UPDATE documents SET ingest_state = $1, processing_error = $2, processed_at = COALESCE($3, processed_at) WHERE id = $4",
        )
        .bind(state)
        .bind(error)
        .bind(processed_at)
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Deletes the document row; caller is responsible for chunk/vector/blob
    /// cleanup ordering (§4.8 ingestion orchestrator delete path).
    pub async fn delete_document(&self, document_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    // ---- Chunks ---------------------------------------------------------

    pub async fn insert_chunk(
        &self,
        document_id: i64,
        chunk_index: i32,
        content: &str,
        chunk_type: ChunkType,
        page_number: Option<i32>,
        section_name: Option<&str>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO chunks
                (document_id, chunk_index, content, content_length, chunk_type, page_number, section_name, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
               RETURNING id"#,
        )
        .bind(document_id)
        .bind(chunk_index)
        .bind(content)
        .bind(content.len() as i32)
        .bind(chunk_type)
        .bind(page_number)
        .bind(section_name)
        .bind(Utc::now())
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(id)
    }

    pub async fn set_chunk_embedding_id(&self, chunk_id: i64, embedding_id: &str) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding_id = $1 WHERE id = $2")
            .bind(embedding_id)
            .bind(chunk_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn delete_chunks(&self, document_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    // ---- Conversations & messages ---------------------------------------

    pub async fn get_or_create_conversation(
        &self,
        session_id: &str,
        user_id: i64,
    ) -> Result<Conversation> {
        if let Some(existing) = self.find_conversation(session_id).await? {
            return Ok(existing);
        }

        let row = sqlx::query(
            r#"INSERT INTO conversations (session_id, user_id, document_context, search_context, created_at, last_activity)
               VALUES ($1, $2, '[]', '[]', $3, $3)
               RETURNING id, session_id, user_id, title, current_section, document_context, search_context, created_at, last_activity"#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row_to_conversation(row))
    }

    pub async fn find_conversation(&self, session_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"SELECT id, session_id, user_id, title, current_section, document_context, search_context, created_at, last_activity
               FROM conversations WHERE session_id = $1"#,
        )
        .bind(session_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(row_to_conversation))
    }

    pub async fn list_conversations_for_user(&self, user_id: i64) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"SELECT id, session_id, user_id, title, current_section, document_context, search_context, created_at, last_activity
               FROM conversations WHERE user_id = $1 ORDER BY last_activity DESC"#,
        )
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows.into_iter().map(row_to_conversation).collect())
    }

    pub async fn update_conversation_context(
        &self,
        conversation_id: i64,
        current_section: Option<&str>,
        document_context: &[SessionContextSnapshot],
        search_context: &[SearchContextDescriptor],
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE conversations
               SET current_section = $1, document_context = $2, search_context = $3, last_activity = $4
               WHERE id = $5"#,
        )
        .bind(current_section)
        .bind(serde_json::to_value(document_context)?)
        .bind(serde_json::to_value(search_context)?)
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn delete_conversation(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM conversations WHERE session_id = $1")
            .bind(session_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    /// Enforces a per-user cap on open sessions (§4 `max_sessions_per_user`) by
    /// dropping the least-recently-active conversations beyond `keep`.
    pub async fn prune_oldest_conversations(&self, user_id: i64, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM conversations WHERE id IN (
                   SELECT id FROM conversations WHERE user_id = $1
                   ORDER BY last_activity DESC OFFSET $2
               )"#,
        )
        .bind(user_id)
        .bind(keep as i64)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn append_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
        content: &str,
        search_query: Option<&str>,
        used_sections: Option<&[String]>,
        context_relevance_score: Option<f32>,
        source_chunks: &[i64],
        source_documents: &[i64],
    ) -> Result<ConversationMessage> {
        let row = sqlx::query(
            r#"INSERT INTO conversation_messages
                (conversation_id, role, content, search_query, used_sections,
                 context_relevance_score, source_chunks, source_documents, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
               RETURNING id, conversation_id, role, content, search_query, search_results_snapshot,
                         used_sections, context_relevance_score, source_chunks, source_documents, created_at"#,
        )
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(search_query)
        .bind(used_sections)
        .bind(context_relevance_score)
        .bind(source_chunks)
        .bind(source_documents)
        .bind(Utc::now())
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row_to_message(row))
    }

    pub async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: i64,
    ) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            r#"SELECT id, conversation_id, role, content, search_query, search_results_snapshot,
                      used_sections, context_relevance_score, source_chunks, source_documents, created_at
               FROM conversation_messages WHERE conversation_id = $1
               ORDER BY created_at DESC LIMIT $2"#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        let mut messages: Vec<_> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_document(row: sqlx::postgres::PgRow) -> Document {
    Document {
        id: row.get("id"),
        owner_user_id: row.get("owner_user_id"),
        original_filename: row.get("original_filename"),
        blob_path: row.get("blob_path"),
        size_bytes: row.get("size_bytes"),
        declared_content_kind: row.get("declared_content_kind"),
        detected_content_kind: row.get("detected_content_kind"),
        title: row.get("title"),
        description: row.get("description"),
        section: row.get("section"),
        access_level: row.get("access_level"),
        ingest_state: row.get("ingest_state"),
        processing_error: row.get("processing_error"),
        has_images: row.get("has_images"),
        extracted_text_summary: row.get("extracted_text_summary"),
        extracted_metadata: row
            .try_get::<Json, _>("extracted_metadata")
            .unwrap_or(Json::Null),
        uploaded_at: row.get("uploaded_at"),
        processed_at: row.get("processed_at"),
    }
}

fn row_to_conversation(row: sqlx::postgres::PgRow) -> Conversation {
    let document_context: Json = row.get("document_context");
    let search_context: Json = row.get("search_context");
    Conversation {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        current_section: row.get("current_section"),
        document_context: serde_json::from_value(document_context).unwrap_or_default(),
        search_context: serde_json::from_value(search_context).unwrap_or_default(),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> ConversationMessage {
    ConversationMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: row.get("role"),
        content: row.get("content"),
        search_query: row.get("search_query"),
        search_results_snapshot: row.get("search_results_snapshot"),
        used_sections: row.get("used_sections"),
        context_relevance_score: row.get("context_relevance_score"),
        source_chunks: row.get("source_chunks"),
        source_documents: row.get("source_documents"),
        created_at: row.get("created_at"),
    }
}
