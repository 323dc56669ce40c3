use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;

/// Per-document lifecycle state (SPEC_FULL.md §3, §4.8, §9 redesign flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IngestState {
    Uploaded,
    Parsing,
    Embedding,
    Indexing,
    Processed,
    Failed,
}

impl IngestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, IngestState::Processed | IngestState::Failed)
    }
}

/// A retrievable unit's content kind (§3 Chunk, §4.1 content block kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    Slide,
    Notes,
    ImageText,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub owner_user_id: i64,
    pub original_filename: String,
    pub blob_path: String,
    pub size_bytes: i64,
    pub declared_content_kind: String,
    pub detected_content_kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Immutable after creation (§3 Document invariants).
    pub section: String,
    /// Immutable after creation.
    pub access_level: String,
    pub ingest_state: IngestState,
    pub processing_error: Option<String>,
    pub has_images: bool,
    pub extracted_text_summary: Option<String>,
    pub extracted_metadata: Json,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn processed(&self) -> bool {
        self.ingest_state == IngestState::Processed
    }

    /// Title resolution per §4.7 item 5: title, else original_filename sans
    /// extension, else `Document <id>`; never the literal placeholder "string".
    pub fn resolve_title(&self) -> String {
        if let Some(title) = &self.title {
            let trimmed = title.trim();
            if !trimmed.is_empty() && trimmed != "string" {
                return trimmed.to_string();
            }
        }

        let stem = std::path::Path::new(&self.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .trim();
        if !stem.is_empty() && stem != "string" {
            return stem.to_string();
        }

        format!("Document {}", self.id)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i32,
    pub content: String,
    pub content_length: i32,
    pub chunk_type: ChunkType,
    pub page_number: Option<i32>,
    pub section_name: Option<String>,
    /// Present iff the chunk has been indexed into the vector store (§3 Chunk invariant).
    pub embedding_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Store-internal record mirroring a chunk payload plus its vector (§3 VectorRecord).
/// The adapter substrate decision (SPEC_FULL.md §4.4) keeps this as a row alongside
/// `Chunk` in the same relational store rather than a separate vector-database
/// client's wire type.
#[derive(Debug, Clone)]
pub struct VectorPayload {
    pub document_id: i64,
    pub chunk_id: i64,
    pub content: String,
    pub section: String,
    pub access_level: String,
    pub chunk_type: ChunkType,
    pub page_number: Option<i32>,
    pub section_name: Option<String>,
    pub sheet_name: Option<String>,
    pub document_name: String,
    pub file_kind: String,
    pub chunk_index: i32,
    pub content_length: i32,
    pub has_images: bool,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub session_id: String,
    pub user_id: i64,
    pub title: Option<String>,
    pub current_section: Option<String>,
    pub document_context: Vec<SessionContextSnapshot>,
    pub search_context: Vec<SearchContextDescriptor>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Held inside Conversation.document_context (§3). Bounded to N_ctx entries, FIFO evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContextSnapshot {
    pub document_id: i64,
    pub section: String,
    pub content_preview: String,
    pub query: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchContextDescriptor {
    pub query: String,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub search_query: Option<String>,
    pub search_results_snapshot: Option<Json>,
    pub used_sections: Option<Vec<String>>,
    pub context_relevance_score: Option<f32>,
    pub source_chunks: Vec<i64>,
    pub source_documents: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Document metadata surfaced for overview/meta-questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: i64,
    pub title: String,
    pub section: String,
    pub chunk_count: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOverview {
    pub metadata: DocumentMetadata,
    pub preview_chunks: Vec<String>,
}
