//! Session store.
//!
//! Conversations live in process, keyed by session id. Each session owns an
//! async mutex; a turn holds it from ingress to reply, which is what
//! serializes concurrent requests for the same session while leaving
//! different sessions fully parallel. Idle sessions are reset on next use
//! and removed by the periodic sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use concierge_core::ConversationState;

pub struct SessionHandle {
    pub state: tokio::sync::Mutex<ConversationState>,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout_minutes: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout: Duration::minutes(idle_timeout_minutes),
        }
    }

    /// Resolves the handle for a turn, creating a fresh session when the id
    /// is absent or unknown. Returns the effective session id.
    pub fn get_or_create(
        &self,
        session_id: Option<&str>,
        user_id: &str,
        trace_id: &str,
    ) -> (String, Arc<SessionHandle>) {
        let mut sessions = self.lock_map();

        if let Some(id) = session_id {
            if let Some(handle) = sessions.get(id) {
                return (id.to_string(), Arc::clone(handle));
            }
        }

        let id = session_id
            .map(str::to_string)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let handle = Arc::new(SessionHandle {
            state: tokio::sync::Mutex::new(ConversationState::new(&id, user_id, trace_id)),
        });
        sessions.insert(id.clone(), Arc::clone(&handle));
        debug!(event_name = "sessions.created", session_id = %id, user_id, "session created");
        (id, handle)
    }

    /// Prepares locked state for a new turn: an expired conversation is
    /// replaced wholesale, a live one gets a fresh trace id.
    pub fn refresh(&self, conversation: &mut ConversationState, trace_id: &str) {
        if conversation.is_expired(self.idle_timeout) {
            info!(
                event_name = "sessions.expired_reset",
                session_id = %conversation.session_id,
                "idle session reset before turn"
            );
            *conversation = ConversationState::new(
                conversation.session_id.clone(),
                conversation.user_id.clone(),
                trace_id,
            );
            return;
        }
        conversation.touch(trace_id);
    }

    /// Removes a session. Idempotent: ending an unknown or already-ended
    /// session reports false without error.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.lock_map().remove(session_id).is_some()
    }

    /// Drops expired sessions. A session whose lock is held is mid-turn and
    /// therefore not expired; it is skipped, not waited on.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.lock_map();
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.state.try_lock() {
            Ok(conversation) => !conversation.is_expired(self.idle_timeout),
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(event_name = "sessions.swept", removed, "expired sessions removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
