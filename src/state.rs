use std::sync::Arc;

use crate::auth::jwt::JwtManager;
use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::logging::TurnAuditLogger;
use crate::security::{AccessEvaluator, CustomHeaderValidator, IpWhitelist};
use crate::services::{
    ConversationManager, EmbeddingService, Generator, IngestionOrchestrator, LlmService,
    RetrievalEngine,
};
use crate::utils::limiters::Limiters;
use crate::utils::rate_limiter::InboundRateLimiter;

/// Shared application state threaded through every handler via `State<AppState>`.
/// Cheap to clone: every field is either a plain `Arc` or already internally
/// `Arc`-backed (`DbPool`, `Settings`).
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub embedding_service: Arc<EmbeddingService>,
    pub llm_service: Arc<LlmService>,
    pub generator: Arc<Generator>,
    pub retrieval_engine: Arc<RetrievalEngine>,
    pub ingestion_orchestrator: Arc<IngestionOrchestrator>,
    pub conversation_manager: Arc<ConversationManager>,
    pub access_evaluator: Arc<AccessEvaluator>,
    pub jwt_manager: Arc<JwtManager>,
    pub rate_limiter: Arc<InboundRateLimiter>,
    pub ip_whitelist: Arc<IpWhitelist>,
    pub header_validator: Arc<CustomHeaderValidator>,
    pub limiters: Arc<Limiters>,
    pub activity_logger: Arc<TurnAuditLogger>,
    pub settings: Settings,
}
