use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

mod auth;
mod config;
mod database;
mod document;
mod handlers;
mod logging;
mod models;
mod security;
mod services;
mod state;
mod utils;

use auth::JwtManager;
use config::Settings;
use database::{DbPool, Repository, VectorStore};
use logging::{AuditLoggerConfig, TurnAuditLogger};
use security::{AccessEvaluator, CustomHeaderValidator, IpWhitelist};
use services::{
    ConversationManager, EmbeddingService, Generator, IngestionOrchestrator, LlmService,
    RetrievalEngine,
};
use state::AppState;
use utils::limiters::Limiters;
use utils::rate_limiter::InboundRateLimiter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,kitchen_knowledge_rag=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting kitchen-knowledge RAG service");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    info!("database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));

    let vector_store = Arc::new(VectorStore::new(
        db_pool.clone(),
        settings.rag.collection_name.clone(),
        settings.embedding.dimension,
    ));
    vector_store.ensure_collection().await?;
    info!("vector collection ready");

    let limiters = Arc::new(Limiters::new(&settings.limits));

    let embedding_service = Arc::new(EmbeddingService::new(
        settings.llm.base_url.clone(),
        settings.embedding.clone(),
        limiters.clone(),
        settings.embedding.batch_size,
    ));

    let llm_service = Arc::new(LlmService::new(settings.llm.clone(), limiters.clone()));
    let generator = Arc::new(Generator::new(llm_service.clone(), settings.llm.reply_language.clone()));

    let retrieval_engine = Arc::new(RetrievalEngine::new(
        vector_store.clone(),
        embedding_service.clone(),
        limiters.clone(),
    ));

    let ingestion_orchestrator = Arc::new(IngestionOrchestrator::new(
        repository.clone(),
        vector_store.clone(),
        embedding_service.clone(),
        settings.rag.chunk_size,
        settings.rag.chunk_overlap,
    ));

    let conversation_manager = Arc::new(ConversationManager::new(
        repository.clone(),
        retrieval_engine.clone(),
        generator.clone(),
        embedding_service.clone(),
        settings.rag.max_context_size,
        settings.rag.max_sessions_per_user,
    ));

    spawn_session_cleanup_task(conversation_manager.clone(), settings.rag.session_timeout_minutes);

    let access_evaluator = Arc::new(AccessEvaluator::new(settings.access_control.clone()));

    let jwt_manager = Arc::new(JwtManager::new(
        &settings.security.jwt_secret,
        settings.security.jwt_expiration_seconds,
    ));

    let rate_limiter = Arc::new(InboundRateLimiter::new(
        settings.limits.inbound_rate_limit_per_hour,
        settings.limits.inbound_rate_limit_enabled,
    ));

    let ip_whitelist = Arc::new(IpWhitelist::new(
        PathBuf::from("config/ip_whitelist.toml"),
        settings.security.allowed_ips.clone(),
    )?);
    (*ip_whitelist).clone().start_watcher()?;
    info!("IP whitelist watcher started");

    let activity_logger = Arc::new(TurnAuditLogger::new(db_pool.get_pool().clone(), AuditLoggerConfig::default()));

    let header_validator = Arc::new(CustomHeaderValidator::new(
        settings.security.custom_headers.app_id.clone(),
        settings.security.custom_headers.api_key.clone(),
        settings.security.custom_headers.request_signature == "enabled",
        settings.security.custom_headers.timestamp_tolerance,
    ));

    let app_state = AppState {
        db_pool,
        repository,
        embedding_service,
        llm_service,
        generator,
        retrieval_engine,
        ingestion_orchestrator,
        conversation_manager,
        access_evaluator,
        jwt_manager,
        rate_limiter,
        ip_whitelist,
        header_validator,
        limiters,
        activity_logger,
        settings: settings.clone(),
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Periodically evicts in-memory session state idle past `session_timeout_minutes`;
/// the conversation rows themselves live in Postgres and are untouched.
fn spawn_session_cleanup_task(conversation_manager: Arc<ConversationManager>, timeout_minutes: i64) {
    let interval = std::time::Duration::from_secs(60 * 5);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = conversation_manager.cleanup_expired_sessions(timeout_minutes);
            if removed > 0 {
                info!(removed, "session cache cleanup tick");
            }
        }
    });
}

fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/api/search", post(handlers::search::search_handler))
        .route(
            "/api/documents",
            get(handlers::documents::list_documents_handler)
                .post(handlers::documents::upload_document_handler),
        )
        .route("/api/documents/:id", delete(handlers::documents::delete_document_handler))
        .route("/api/sessions", get(handlers::sessions::list_sessions_handler))
        .route(
            "/api/sessions/:session_id",
            get(handlers::sessions::get_session_handler)
                .delete(handlers::sessions::delete_session_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::middleware::require_auth))
        .route_layer(middleware::from_fn_with_state(state.clone(), security::middleware::security_middleware));

    let public = Router::new().route("/healthz", get(handlers::health::healthz));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(DefaultBodyLimit::max(state.settings.server.max_upload_bytes as usize))
        .with_state(state)
}
