use super::types::ConversationState;
use crate::models::chat::SessionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Thread-safe in-memory conversation cache plus per-session locks (§5:
/// "message appends are serialized per conversation id; concurrent turns
/// for the same session id MUST be serialized").
#[derive(Clone)]
pub struct ConversationCache {
    storage: Arc<DashMap<SessionId, ConversationState>>,
    locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        info!("initializing conversation cache");
        Self {
            storage: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<ConversationState> {
        let state = self.storage.get(session_id)?.value().clone();
        debug!(session_id, "retrieved session from cache");
        Some(state)
    }

    pub fn set(&self, session_id: SessionId, state: ConversationState) {
        self.storage.insert(session_id, state);
    }

    pub fn remove(&self, session_id: &str) -> Option<ConversationState> {
        self.locks.remove(session_id);
        self.storage.remove(session_id).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// The lock guarding one session's turn sequence. A second concurrent
    /// caller should `try_lock()` this and surface `ApiError::SessionBusy`
    /// rather than queue behind the first.
    pub fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn cleanup_expired(&self, timeout_minutes: i64) -> usize {
        let start_len = self.storage.len();
        self.storage.retain(|_, state| !state.is_expired(timeout_minutes));
        let removed = start_len.saturating_sub(self.storage.len());
        if removed > 0 {
            info!(removed, "cleaned up expired sessions");
        }
        removed
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let cache = ConversationCache::new();
        let state = ConversationState::new("session-1".to_string(), 42);
        cache.set("session-1".to_string(), state);
        assert!(cache.get("session-1").is_some());
        cache.remove("session-1");
        assert!(cache.get("session-1").is_none());
    }

    #[test]
    fn session_lock_is_stable_across_calls() {
        let cache = ConversationCache::new();
        let a = cache.session_lock("session-1");
        let b = cache.session_lock("session-1");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
