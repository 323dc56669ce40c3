use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tracing::info;

use crate::auth::middleware::Principal;
use crate::logging::ChatTurnLog;
use crate::models::chat::{ChatRequest, ChatResponse, ChatStreamEvent};
use crate::security::RequiredAccess;
use crate::services::conversation::ChatTurnRequest;
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::rate_limiter::AccessLevelScale;
use crate::utils::token_estimator;

fn access_scale(access_level: &str) -> AccessLevelScale {
    match access_level {
        "full" | "premium" => AccessLevelScale::Double,
        "trial" | "limited" => AccessLevelScale::Half,
        _ => AccessLevelScale::Baseline,
    }
}

async fn run_turn(
    state: &AppState,
    principal: &Principal,
    req: ChatRequest,
) -> Result<ChatResponse, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message cannot be empty".into()));
    }

    state
        .rate_limiter
        .check(principal.user_id, access_scale(&principal.access_level))
        .map_err(|retry_after_secs| ApiError::RateLimited { retry_after_secs })?;

    let allowed_sections = state.access_evaluator.allowed_sections(&principal.access_level);

    if let Some(section) = &req.section {
        state
            .access_evaluator
            .require_section_access(&principal.access_level, section, RequiredAccess::ReadOnly)?;
    }

    let image_count = req.images.len();

    let mut response = state
        .conversation_manager
        .handle_message(ChatTurnRequest {
            user_id: principal.user_id,
            access_level: &principal.access_level,
            session_id: req.session_id,
            message: &req.message,
            requested_section: req.section.as_deref(),
            allowed_sections: &allowed_sections,
            strict_section_search: req.section.is_some(),
            limit: state.settings.rag.default_search_limit,
            score_threshold: state.settings.rag.default_score_threshold,
        })
        .await?;

    // No vision/OCR backend is wired up (same gap as the document ingestion
    // path, §4.1's `ocr_skipped`); surface the image count instead of analysis.
    if image_count > 0 {
        response.image_analysis = Some(format!(
            "{image_count} image(s) received but not analyzed: no vision/OCR backend is configured"
        ));
    }

    Ok(response)
}

/// Writes one audit row per turn (§10.2): success carries the response and a
/// rough token count, failure carries the error. Never blocks the response.
async fn log_outcome(
    state: &AppState,
    principal: &Principal,
    started: std::time::Instant,
    session_id: &str,
    outcome: &Result<ChatResponse, ApiError>,
) {
    let conversation_id = state
        .repository
        .find_conversation(session_id)
        .await
        .ok()
        .flatten()
        .map(|c| c.id)
        .unwrap_or(0);

    let builder =
        ChatTurnLog::builder(conversation_id, principal.user_id).processing_time(started.elapsed().as_millis() as i32);

    let log = match outcome {
        Ok(response) => builder
            .token_count(token_estimator::estimate_tokens(&response.response) as i32)
            .similarity(response.question_analysis.similarity_to_previous.unwrap_or(0.0))
            .build(),
        Err(e) => builder.error(e.to_string(), "chat_turn").build(),
    };

    state.activity_logger.log(log);
}

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(user_id = principal.user_id, "chat request");
    let started = std::time::Instant::now();
    let fallback_session_id = req.session_id.clone().unwrap_or_default();
    let outcome = run_turn(&state, &principal, req).await;
    let session_id = outcome.as_ref().map(|r| r.session_id.as_str()).unwrap_or(&fallback_session_id);
    log_outcome(&state, &principal, started, session_id, &outcome).await;
    Ok(Json(outcome?))
}

/// POST /api/chat/stream -- SSE transport over the same single-shot turn
/// (the per-request budget allows one generation call, §5; there is no
/// token-level streaming to multiplex beyond staged progress events).
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::once(async move {
        let started = std::time::Instant::now();
        let fallback_session_id = req.session_id.clone().unwrap_or_default();
        let outcome = run_turn(&state, &principal, req).await;
        let session_id = outcome.as_ref().map(|r| r.session_id.as_str()).unwrap_or(&fallback_session_id);
        log_outcome(&state, &principal, started, session_id, &outcome).await;

        let event = match outcome {
            Ok(response) => ChatStreamEvent::Done(Box::new(response)),
            Err(e) => ChatStreamEvent::Error { detail: e.to_string() },
        };
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
