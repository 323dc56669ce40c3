use crate::auth::jwt::JwtManager;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Resolved from a validated JWT; carried as a request extension into handlers.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub access_level: String,
}

/// Bearer-token validation (§10.3). Every route but `/healthz` runs behind this.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".into()))?;

    let jwt_manager: Arc<JwtManager> = state.jwt_manager.clone();
    let claims = jwt_manager
        .validate_token(token)
        .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))?;

    req.extensions_mut().insert(Principal {
        user_id: claims.user_id,
        access_level: claims.access_level,
    });

    Ok(next.run(req).await)
}
