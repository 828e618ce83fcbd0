//! The dialogue state machine.
//!
//! Control flow between pipeline stages is decided here, by a static
//! adjacency table, and nowhere else. The completion backend can influence
//! which of the legal edges is taken (via classification or extraction
//! output) but can never add an edge.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::{ConversationState, TransitionRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    Init,
    IntentRecognition,
    SlotExtraction,
    SlotComplete,
    NeedClarify,
    UnknownIntent,
    Forbidden,
    ToolExecution,
    ResponseGeneration,
    AskUser,
    Fallback,
    HumanHandoff,
    Reject,
    Done,
    Error,
}

impl DialogueState {
    pub const ALL: [DialogueState; 15] = [
        DialogueState::Init,
        DialogueState::IntentRecognition,
        DialogueState::SlotExtraction,
        DialogueState::SlotComplete,
        DialogueState::NeedClarify,
        DialogueState::UnknownIntent,
        DialogueState::Forbidden,
        DialogueState::ToolExecution,
        DialogueState::ResponseGeneration,
        DialogueState::AskUser,
        DialogueState::Fallback,
        DialogueState::HumanHandoff,
        DialogueState::Reject,
        DialogueState::Done,
        DialogueState::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::IntentRecognition => "INTENT_RECOGNITION",
            Self::SlotExtraction => "SLOT_EXTRACTION",
            Self::SlotComplete => "SLOT_COMPLETE",
            Self::NeedClarify => "NEED_CLARIFY",
            Self::UnknownIntent => "UNKNOWN_INTENT",
            Self::Forbidden => "FORBIDDEN",
            Self::ToolExecution => "TOOL_EXECUTION",
            Self::ResponseGeneration => "RESPONSE_GENERATION",
            Self::AskUser => "ASK_USER",
            Self::Fallback => "FALLBACK",
            Self::HumanHandoff => "HUMAN_HANDOFF",
            Self::Reject => "REJECT",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// A terminal state ends the turn; the next turn resets to `Init`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// The legal edges. One arm per source state so a new state cannot be added
/// without deciding its successors.
fn valid_targets(from: DialogueState) -> &'static [DialogueState] {
    use DialogueState::*;
    match from {
        Init => &[IntentRecognition, Reject],
        IntentRecognition => &[SlotExtraction, UnknownIntent, HumanHandoff, Done, Error],
        SlotExtraction => &[SlotComplete, NeedClarify, Forbidden, Error],
        SlotComplete => &[ToolExecution, Forbidden],
        NeedClarify => &[AskUser, Fallback, HumanHandoff],
        UnknownIntent => &[AskUser, Fallback, HumanHandoff],
        Forbidden => &[Reject, HumanHandoff],
        ToolExecution => &[ResponseGeneration, Fallback, Error],
        ResponseGeneration => &[Done, Error],
        AskUser => &[Done],
        Fallback => &[HumanHandoff, Done],
        HumanHandoff => &[Done],
        Reject => &[Done],
        Error => &[Done, Fallback],
        Done => &[],
    }
}

/// Stateless gatekeeper over [`ConversationState::state`].
pub struct StateMachine;

impl StateMachine {
    pub fn is_valid(from: DialogueState, to: DialogueState) -> bool {
        valid_targets(from).contains(&to)
    }

    pub fn valid_targets(from: DialogueState) -> &'static [DialogueState] {
        valid_targets(from)
    }

    /// Moves the conversation to `to` if the edge is legal, appending a
    /// transition record. An illegal edge is refused: the state is left
    /// untouched and the refusal is logged, never panicked on.
    pub fn transition(conversation: &mut ConversationState, to: DialogueState) -> bool {
        let from = conversation.state;
        if !Self::is_valid(from, to) {
            warn!(
                event_name = "dialogue.transition_refused",
                session_id = %conversation.session_id,
                trace_id = %conversation.trace_id,
                from = from.as_str(),
                to = to.as_str(),
                "refused illegal dialogue transition"
            );
            return false;
        }
        conversation.state = to;
        conversation.transition_log.push(TransitionRecord {
            from,
            to,
            at: Utc::now(),
        });
        true
    }

    /// Starts a new turn: back to `Init` unconditionally, recorded in the
    /// transition log when the state actually changes.
    pub fn reset(conversation: &mut ConversationState) {
        let from = conversation.state;
        if from == DialogueState::Init {
            return;
        }
        conversation.state = DialogueState::Init;
        conversation.transition_log.push(TransitionRecord {
            from,
            to: DialogueState::Init,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{DialogueState, StateMachine};
    use crate::session::ConversationState;

    fn fresh() -> ConversationState {
        ConversationState::new("s-1", "u-1", "t-1")
    }

    #[test]
    fn every_pair_outside_the_table_is_refused_without_mutation() {
        for from in DialogueState::ALL {
            for to in DialogueState::ALL {
                let mut conversation = fresh();
                conversation.state = from;
                let expected = StateMachine::valid_targets(from).contains(&to);
                let moved = StateMachine::transition(&mut conversation, to);
                assert_eq!(moved, expected, "{from:?} -> {to:?}");
                if moved {
                    assert_eq!(conversation.state, to);
                    assert_eq!(conversation.transition_log.len(), 1);
                } else {
                    assert_eq!(conversation.state, from);
                    assert!(conversation.transition_log.is_empty());
                }
            }
        }
    }

    #[test]
    fn done_has_no_successors() {
        assert!(StateMachine::valid_targets(DialogueState::Done).is_empty());
        assert!(DialogueState::Done.is_terminal());
    }

    #[test]
    fn sensitive_input_can_be_rejected_straight_from_init() {
        let mut conversation = fresh();
        assert!(StateMachine::transition(&mut conversation, DialogueState::Reject));
        assert!(StateMachine::transition(&mut conversation, DialogueState::Done));
    }

    #[test]
    fn happy_path_logs_every_hop_in_order() {
        let mut conversation = fresh();
        let path = [
            DialogueState::IntentRecognition,
            DialogueState::SlotExtraction,
            DialogueState::SlotComplete,
            DialogueState::ToolExecution,
            DialogueState::ResponseGeneration,
            DialogueState::Done,
        ];
        for state in path {
            assert!(StateMachine::transition(&mut conversation, state), "{state:?}");
        }
        let hops: Vec<_> = conversation
            .transition_log
            .iter()
            .map(|record| (record.from, record.to))
            .collect();
        assert_eq!(hops.len(), path.len());
        assert_eq!(hops[0], (DialogueState::Init, DialogueState::IntentRecognition));
        assert_eq!(
            hops[5],
            (DialogueState::ResponseGeneration, DialogueState::Done)
        );
    }

    #[test]
    fn reset_returns_a_finished_turn_to_init() {
        let mut conversation = fresh();
        assert!(StateMachine::transition(&mut conversation, DialogueState::IntentRecognition));
        assert!(StateMachine::transition(&mut conversation, DialogueState::Done));
        assert!(!StateMachine::transition(&mut conversation, DialogueState::IntentRecognition));

        StateMachine::reset(&mut conversation);
        assert_eq!(conversation.state, DialogueState::Init);
        assert!(StateMachine::transition(&mut conversation, DialogueState::IntentRecognition));
    }

    #[test]
    fn reset_from_init_records_nothing() {
        let mut conversation = fresh();
        StateMachine::reset(&mut conversation);
        assert!(conversation.transition_log.is_empty());
    }
}
