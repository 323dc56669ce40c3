use crate::database::models::SessionContextSnapshot;
use crate::models::chat::SessionId;
use std::time::Instant;

/// In-memory fast path for a session (§5). The database row (`Conversation`)
/// is the source of truth across restarts; this cache exists to avoid
/// re-embedding the previous turn's query on every memory-policy decision
/// (the per-request budget allows only one embedding call, §5).
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub user_id: i64,
    pub last_query_embedding: Option<Vec<f32>>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl ConversationState {
    pub fn new(session_id: SessionId, user_id: i64) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            user_id,
            last_query_embedding: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, timeout_minutes: i64) -> bool {
        self.last_activity.elapsed().as_secs() > (timeout_minutes.max(0) as u64) * 60
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Bounded FIFO list of document snapshots carried on `Conversation`.
pub fn evict_to_capacity(mut snapshots: Vec<SessionContextSnapshot>, capacity: usize) -> Vec<SessionContextSnapshot> {
    if snapshots.len() > capacity {
        let overflow = snapshots.len() - capacity;
        snapshots.drain(0..overflow);
    }
    snapshots
}
