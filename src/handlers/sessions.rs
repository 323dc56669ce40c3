use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::auth::middleware::Principal;
use crate::models::chat::{ChatMessage, SessionDetail, SessionSummary};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// GET /api/sessions -- conversations belonging to the principal.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let conversations = state.repository.list_conversations_for_user(principal.user_id).await?;

    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let message_count = state.repository.recent_messages(conversation.id, i64::MAX).await?.len();
        summaries.push(SessionSummary {
            session_id: conversation.session_id,
            current_section: conversation.current_section,
            created_at: conversation.created_at,
            last_activity: conversation.last_activity,
            message_count,
        });
    }

    Ok(Json(summaries))
}

/// GET /api/sessions/:session_id
pub async fn get_session_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let conversation = state
        .repository
        .find_conversation(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session '{session_id}' not found")))?;

    if conversation.user_id != principal.user_id {
        return Err(ApiError::NotFound(format!("session '{session_id}' not found")));
    }

    let messages = state
        .repository
        .recent_messages(conversation.id, i64::MAX)
        .await?
        .into_iter()
        .map(|m| ChatMessage {
            role: format!("{:?}", m.role).to_lowercase(),
            content: m.content,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(SessionDetail {
        session_id: conversation.session_id,
        current_section: conversation.current_section,
        messages,
    }))
}

/// DELETE /api/sessions/:session_id
pub async fn delete_session_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation = state
        .repository
        .find_conversation(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session '{session_id}' not found")))?;

    if conversation.user_id != principal.user_id {
        return Err(ApiError::NotFound(format!("session '{session_id}' not found")));
    }

    state.conversation_manager.delete_session(&session_id).await?;

    Ok(Json(serde_json::json!({"deleted": true, "session_id": session_id})))
}
