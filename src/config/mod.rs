pub mod settings;

pub use settings::{
    AccessControlConfig, BlobConfig, DatabaseConfig, EmbeddingConfig, LimitsConfig, LlmConfig,
    RagConfig, SecurityConfig, ServerConfig, Settings,
};
