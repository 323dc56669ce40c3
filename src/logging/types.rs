use chrono::{DateTime, Utc};

/// Outcome of a single chat turn. This is deliberately narrow: it tracks the
/// metrics operators actually query for (latency, error rate, retrieval
/// similarity) rather than the full request/response bodies, so the audit
/// table doesn't become a second copy of tenant document content.
#[derive(Debug, Clone)]
pub enum TurnStatus {
    Success,
    Error,
}

impl TurnStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurnLog {
    pub conversation_id: i64,
    pub user_id: i64,
    pub status: TurnStatus,

    pub processing_time_ms: i32,
    pub token_count: Option<i32>,
    pub similarity_score: Option<f32>,

    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ChatTurnLog {
    pub fn builder(conversation_id: i64, user_id: i64) -> ChatTurnLogBuilder {
        ChatTurnLogBuilder::new(conversation_id, user_id)
    }
}

pub struct ChatTurnLogBuilder {
    log: ChatTurnLog,
}

impl ChatTurnLogBuilder {
    pub fn new(conversation_id: i64, user_id: i64) -> Self {
        Self {
            log: ChatTurnLog {
                conversation_id,
                user_id,
                status: TurnStatus::Success,
                processing_time_ms: 0,
                token_count: None,
                similarity_score: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn processing_time(mut self, ms: i32) -> Self {
        self.log.processing_time_ms = ms;
        self
    }

    pub fn token_count(mut self, count: i32) -> Self {
        self.log.token_count = Some(count);
        self
    }

    pub fn similarity(mut self, score: f32) -> Self {
        self.log.similarity_score = Some(score);
        self
    }

    /// Marks the turn as failed; overrides whatever status was set before.
    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.status = TurnStatus::Error;
        self
    }

    pub fn build(self) -> ChatTurnLog {
        self.log
    }
}
