use axum::{extract::State, Extension, Json};
use tracing::info;

use crate::auth::middleware::Principal;
use crate::models::chat::{SearchRequest, SearchResultItem};
use crate::security::RequiredAccess;
use crate::services::retrieval_engine::RetrievalRequest;
use crate::state::AppState;
use crate::utils::error::ApiError;

/// POST /api/search -- direct retrieval without generation (§6).
pub async fn search_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResultItem>>, ApiError> {
    info!(user_id = principal.user_id, query = %req.query, "search request");

    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query cannot be empty".into()));
    }

    let access_level = req.access_level.as_deref().unwrap_or(&principal.access_level);

    if let Some(section) = &req.section {
        state
            .access_evaluator
            .require_section_access(access_level, section, RequiredAccess::ReadOnly)?;
    }

    let allowed_sections = state.access_evaluator.allowed_sections(access_level);

    let chunks = state
        .retrieval_engine
        .retrieve(RetrievalRequest {
            query: &req.query,
            allowed_sections: &allowed_sections,
            target_section: req.section.as_deref(),
            strict_section_search: req.strict_section_search,
            access_level,
            limit: req.limit,
            score_threshold: req.score_threshold,
        })
        .await;

    let results = chunks
        .into_iter()
        .map(|c| SearchResultItem {
            document_id: c.document_id,
            chunk_id: c.chunk_id,
            content: c.content,
            score: c.score,
            section: c.section,
            access_level: c.access_level,
            chunk_type: Some(format!("{:?}", c.chunk_type).to_lowercase()),
            page_number: c.page_number,
            section_name: c.section_name,
            metadata: serde_json::json!({
                "content_length": c.content_length,
                "has_metadata": c.has_metadata,
            }),
        })
        .collect();

    Ok(Json(results))
}
