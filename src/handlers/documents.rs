use axum::{
    extract::{Multipart, Path, State},
    Extension, Json,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::database::models::Document;
use crate::document::KNOWN_KINDS;
use crate::security::RequiredAccess;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub title: String,
    pub original_filename: String,
    pub section: String,
    pub access_level: String,
    pub ingest_state: String,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub size_bytes: i64,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(d: Document) -> Self {
        let title = d.resolve_title();
        let processed = d.processed();
        let ingest_state = format!("{:?}", d.ingest_state).to_lowercase();
        Self {
            title,
            id: d.id,
            original_filename: d.original_filename,
            section: d.section,
            access_level: d.access_level,
            ingest_state,
            processed,
            processing_error: d.processing_error,
            size_bytes: d.size_bytes,
            uploaded_at: d.uploaded_at,
        }
    }
}

/// GET /api/documents -- documents visible within the principal's allowed sections.
pub async fn list_documents_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let allowed_sections = state.access_evaluator.allowed_sections(&principal.access_level);
    let documents = state.repository.list_documents_for_sections(&allowed_sections).await?;
    Ok(Json(documents.into_iter().map(DocumentResponse::from).collect()))
}

fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// POST /api/documents -- multipart upload `{file, title?, description?, section}`.
/// Rejects unsupported extensions, oversize files, and sections the principal
/// cannot upload to (§6); ingestion runs in the background after acceptance.
pub async fn upload_document_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, ApiError> {
    let mut section: Option<String> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "section" => section = Some(field.text().await.unwrap_or_default()),
            "title" => title = Some(field.text().await.unwrap_or_default()),
            "description" => description = Some(field.text().await.unwrap_or_default()),
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let section = section.ok_or_else(|| ApiError::BadRequest("section is required".into()))?;
    let filename = filename.ok_or_else(|| ApiError::BadRequest("file is required".into()))?;
    let data = file_bytes.ok_or_else(|| ApiError::BadRequest("file is required".into()))?;

    state
        .access_evaluator
        .require_section_access(&principal.access_level, &section, RequiredAccess::Full)?;

    let kind = extension_of(&filename)
        .ok_or_else(|| ApiError::BadRequest("file has no extension".to_string()))?;
    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Err(ApiError::BadRequest(format!("unsupported file extension '{kind}'")));
    }

    if data.len() as u64 > state.settings.server.max_upload_bytes {
        return Err(ApiError::BadRequest(format!(
            "file exceeds maximum upload size of {} bytes",
            state.settings.server.max_upload_bytes
        )));
    }

    tokio::fs::create_dir_all(&state.settings.blob.root_dir)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to prepare blob storage: {e}")))?;

    let blob_path = format!("{}/{}-{}", state.settings.blob.root_dir, Uuid::new_v4(), filename);
    tokio::fs::write(&blob_path, &data)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to store blob: {e}")))?;

    let document = state
        .repository
        .create_document(
            principal.user_id,
            &filename,
            &blob_path,
            data.len() as i64,
            &kind,
            title,
            description,
            &section,
            &principal.access_level,
        )
        .await?;

    info!(document_id = document.id, section, "document accepted for ingestion");

    let orchestrator = state.ingestion_orchestrator.clone();
    let document_id = document.id;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.ingest(document_id).await {
            warn!(document_id, error = %e, "background ingestion failed");
        }
    });

    Ok(Json(DocumentResponse::from(document)))
}

/// DELETE /api/documents/:id
pub async fn delete_document_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(document_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let document = state
        .repository
        .get_document(document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {document_id} not found")))?;

    state
        .access_evaluator
        .require_section_access(&principal.access_level, &document.section, RequiredAccess::Full)?;

    if let Err(e) = state.ingestion_orchestrator.delete(document_id).await {
        error!(document_id, error = %e, "document delete failed");
        return Err(e);
    }

    Ok(Json(serde_json::json!({"deleted": true, "document_id": document_id})))
}
