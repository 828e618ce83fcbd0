//! Last-line error handling.
//!
//! When a turn dies on an infrastructure fault, the fallback decides what
//! the user hears and whether a human takes over. Timeouts get a retry
//! message, data-access faults get a handoff, everything else gets an
//! apology. No raw error detail ever reaches the reply.

use tracing::error;

use concierge_core::AgentError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackDecision {
    pub code: u16,
    pub reply: String,
    pub needs_handoff: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackManager;

impl FallbackManager {
    pub fn handle_error(&self, trace_id: &str, agent_error: &AgentError) -> FallbackDecision {
        error!(
            event_name = "fallback.turn_failed",
            trace_id,
            error = %agent_error,
            "turn ended on infrastructure fault"
        );

        FallbackDecision {
            code: agent_error.status_code(),
            reply: agent_error.user_message().to_string(),
            needs_handoff: matches!(agent_error, AgentError::DataAccess(_)),
        }
    }
}
