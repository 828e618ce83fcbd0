use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dialogue::DialogueState;
use crate::intent::IntentResult;

/// Opaque per-turn identifier used to correlate logs and audit records.
/// 16 hex characters, fresh for every turn even on session reuse.
pub fn generate_trace_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: MessageRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DialogueState,
    pub to: DialogueState,
    pub at: DateTime<Utc>,
}

/// Everything one session carries across turns.
///
/// Owned by the session store; the orchestrator receives it by exclusive
/// reference for the span of one turn. Counters, the pending intent, and the
/// history list are mutated non-atomically across the pipeline, which is why
/// turns for the same session are serialized by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub user_id: String,
    pub trace_id: String,
    pub state: DialogueState,
    pub permission_level: u8,
    pub history: Vec<MessageEntry>,
    pub transition_log: Vec<TransitionRecord>,
    /// At most one incomplete intent, stashed while the user is asked to
    /// supply missing slots.
    pub pending_intent: Option<IntentResult>,
    pub unknown_intent_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            trace_id: trace_id.into(),
            state: DialogueState::Init,
            permission_level: 1,
            history: Vec::new(),
            transition_log: Vec::new(),
            pending_intent: None,
            unknown_intent_count: 0,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn record_user_message(&mut self, text: impl Into<String>) {
        self.history.push(MessageEntry {
            role: MessageRole::User,
            text: text.into(),
            at: Utc::now(),
        });
        self.last_active_at = Utc::now();
    }

    pub fn record_assistant_message(&mut self, text: impl Into<String>) {
        self.history.push(MessageEntry {
            role: MessageRole::Assistant,
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// Renders the last `exchanges` user/assistant pairs for prompt context.
    pub fn recent_history(&self, exchanges: usize) -> String {
        if self.history.is_empty() {
            return "no prior conversation".to_string();
        }
        let start = self.history.len().saturating_sub(exchanges * 2);
        let mut brief = String::new();
        for entry in &self.history[start..] {
            brief.push_str(entry.role.as_str());
            brief.push_str(": ");
            brief.push_str(&entry.text);
            brief.push('\n');
        }
        brief
    }

    pub fn increment_unknown_intent(&mut self) -> u32 {
        self.unknown_intent_count += 1;
        self.unknown_intent_count
    }

    pub fn reset_unknown_intent(&mut self) {
        self.unknown_intent_count = 0;
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        Utc::now() > self.last_active_at + idle_timeout
    }

    /// Marks the session active for a new turn under a fresh trace id.
    pub fn touch(&mut self, trace_id: impl Into<String>) {
        self.trace_id = trace_id.into();
        self.last_active_at = Utc::now();
    }
}
