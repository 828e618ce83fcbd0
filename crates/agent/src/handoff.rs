//! Human handoff dispatch.
//!
//! Escalation is a first-class outcome, not an error: the dispatcher files
//! a ticket, emits an audit event, and hands back what the user should be
//! told while they wait.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use concierge_core::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, ConversationState};

const ESTIMATED_WAIT_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffReason {
    UserRequested,
    RepeatedUnknownIntent,
    CapabilityFailure,
    SystemError,
}

impl HandoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRequested => "user_requested",
            Self::RepeatedUnknownIntent => "repeated_unknown_intent",
            Self::CapabilityFailure => "capability_failure",
            Self::SystemError => "system_error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffTicket {
    pub ticket_id: String,
    pub estimated_wait_secs: u64,
}

pub struct HandoffDispatcher {
    sink: Arc<dyn AuditSink>,
}

impl HandoffDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn dispatch(&self, conversation: &ConversationState, reason: HandoffReason) -> HandoffTicket {
        let ticket = HandoffTicket {
            ticket_id: Uuid::new_v4().to_string(),
            estimated_wait_secs: ESTIMATED_WAIT_SECS,
        };

        info!(
            event_name = "handoff.dispatched",
            session_id = %conversation.session_id,
            trace_id = %conversation.trace_id,
            reason = reason.as_str(),
            ticket_id = %ticket.ticket_id,
            "conversation escalated to a human agent"
        );
        self.sink.emit(
            AuditEvent::new(
                &conversation.session_id,
                &conversation.trace_id,
                "handoff.dispatched",
                AuditCategory::Handoff,
                "handoff-dispatcher",
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason.as_str())
            .with_metadata("ticket_id", &ticket.ticket_id),
        );

        ticket
    }

    /// The holding message shown while the ticket waits in queue.
    pub fn waiting_message(ticket: &HandoffTicket) -> String {
        format!(
            "I'm connecting you with a human agent now. Estimated wait: about {} seconds.",
            ticket.estimated_wait_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge_core::{AuditCategory, ConversationState, InMemoryAuditSink};

    use super::{HandoffDispatcher, HandoffReason};

    #[test]
    fn dispatch_files_a_ticket_and_audits_it() {
        let sink = InMemoryAuditSink::default();
        let dispatcher = HandoffDispatcher::new(Arc::new(sink.clone()));
        let conversation = ConversationState::new("s-1", "u-1", "t-1");

        let ticket = dispatcher.dispatch(&conversation, HandoffReason::RepeatedUnknownIntent);
        assert!(!ticket.ticket_id.is_empty());
        assert_eq!(ticket.estimated_wait_secs, 60);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, AuditCategory::Handoff);
        assert_eq!(
            events[0].metadata.get("reason").map(String::as_str),
            Some("repeated_unknown_intent")
        );
    }

    #[test]
    fn waiting_message_names_the_wait() {
        let sink = InMemoryAuditSink::default();
        let dispatcher = HandoffDispatcher::new(Arc::new(sink));
        let conversation = ConversationState::new("s-1", "u-1", "t-1");
        let ticket = dispatcher.dispatch(&conversation, HandoffReason::UserRequested);
        assert!(HandoffDispatcher::waiting_message(&ticket).contains("60 seconds"));
    }
}
