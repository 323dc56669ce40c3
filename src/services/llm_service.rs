use crate::config::LlmConfig;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequestNonStreaming {
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct NonStreamingChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct NonStreamingCompletion {
    choices: Vec<NonStreamingChoice>,
}

pub struct LlmService {
    client: Client,
    config: LlmConfig,
    limiters: Arc<Limiters>,
}

impl LlmService {
    pub fn new(config: LlmConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .expect("Failed to create HTTP client"),
            config,
            limiters,
        }
    }

    /// Non-streaming completion used by the generator for the main answer and
    /// the follow-up-question pass.
    pub async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<String, ApiError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await
        .map_err(|e| ApiError::LlmError(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "llm_generate", "wait_queue");

        let request = ChatCompletionRequestNonStreaming {
            messages,
            max_tokens: self.config.max_tokens,
            temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("failed to call LLM API: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!("LLM API error: {status} - {body}")));
        }

        let completion: NonStreamingCompletion = response
            .json()
            .await
            .map_err(|e| ApiError::LlmError(format!("malformed LLM response: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::LlmError("LLM response had no choices".into()))
    }
}
