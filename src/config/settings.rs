use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub rag: RagConfig,
    pub limits: LimitsConfig,
    pub access_control: AccessControlConfig,
    pub blob: BlobConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub allowed_ips: Vec<String>,
    pub custom_headers: CustomHeadersConfig,
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CustomHeadersConfig {
    pub app_id: String,
    pub api_key: String,
    pub request_signature: String,
    pub timestamp_tolerance: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BlobConfig {
    /// Filesystem root the object store resolves blob paths against.
    pub root_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    pub reply_language: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub collection_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks_per_document: usize,
    pub max_chunks_for_vector_store: usize,
    pub default_search_limit: usize,
    pub default_score_threshold: f32,
    pub max_context_size: usize,
    pub session_timeout_minutes: i64,
    pub max_sessions_per_user: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub db_search_concurrency: usize,
    pub llm_generate_concurrency: usize,
    pub acquire_timeout_ms: u64,
    /// requests/hour for the baseline access level; other levels scale it (see AccessControlConfig).
    pub inbound_rate_limit_per_hour: u32,
    pub inbound_rate_limit_enabled: bool,
}

/// Access-level -> allowed sections, and access-level -> {section -> right}.
/// Mirrors the "access evaluation contract" consumed from §6; this crate owns the
/// table because the configuration-editing surface itself is an external collaborator.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccessControlConfig {
    pub access_levels: HashMap<String, Vec<String>>,
    pub detailed_access_levels: HashMap<String, HashMap<String, String>>,
    /// See SPEC_FULL.md §9: default false (strict). When true, chat/search treat every
    /// section as at-least-read_only regardless of the detailed table; upload/delete
    /// still enforce the detailed table unconditionally.
    pub relax_chat_read_access: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
