use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = String;

// ===== CHAT =====

#[derive(Debug, Clone, Deserialize)]
pub struct ChatImageInput {
    pub data_b64: String,
    pub mime: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub section: Option<String>,
    /// Accepted for client compatibility; not consulted by any module.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub images: Vec<ChatImageInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub document_id: i64,
    pub document_name: String,
    pub chunk_id: i64,
    pub similarity: f32,
    pub page_number: Option<i32>,
    pub preview: String,
    pub download_url: String,
    pub view_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    DocumentHeavy,
    Hybrid,
    GeneralKnowledge,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionAnalysis {
    pub is_clarifying: bool,
    pub memory_strategy: String,
    pub similarity_to_previous: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: SessionId,
    pub sources: Vec<SourceCitation>,
    pub context_chunks_used: usize,
    pub timestamp: DateTime<Utc>,
    pub follow_up_questions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<String>,
    pub response_strategy: ResponseStrategy,
    pub question_analysis: QuestionAnalysis,
}

/// Streamed chat event, one JSON object per SSE `data:` line. The turn runs
/// as a single future (§5's per-request budget caps it at one generation
/// call), so there is exactly one event per stream beyond the keep-alive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Done(Box<ChatResponse>),
    Error { detail: String },
}

// ===== SEARCH =====

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub access_level: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default)]
    pub strict_section_search: bool,
}

fn default_search_limit() -> usize {
    10
}

fn default_score_threshold() -> f32 {
    0.6
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub document_id: i64,
    pub chunk_id: i64,
    pub content: String,
    pub score: f32,
    pub section: String,
    pub access_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    pub metadata: serde_json::Value,
}

// ===== SESSIONS =====

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub current_section: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub current_section: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
