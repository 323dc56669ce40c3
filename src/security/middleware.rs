use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::debug;

/// IP whitelist + custom-header validation (§10.3's secondary request-level
/// guard, layered in front of bearer auth).
pub async fn security_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = addr.ip();

    if !state.ip_whitelist.is_allowed(ip).await {
        return Err(ApiError::Unauthorized(format!("access denied from IP: {ip}")));
    }

    let validated = state.header_validator.validate(request.headers())?;
    debug!(app_id = %validated.app_id, "request headers validated");

    Ok(next.run(request).await)
}
