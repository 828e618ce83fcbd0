//! The per-turn driver.
//!
//! One call to [`Orchestrator::process`] takes a user message through the
//! whole pipeline: ingress screening, classification, slot filling, the
//! permission gate, capability invocation and synthesis. Every hop between
//! stages goes through the dialogue state machine, so an illegal sequence
//! is structurally impossible rather than merely untested.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use concierge_core::config::DialogueConfig;
use concierge_core::{
    slot_definitions, AgentError, AuditCategory, AuditEvent, AuditOutcome, AuditSink,
    ConversationState, DialogueState, ExecutionContext, Intent, IntentResult, StateMachine,
};

use crate::capabilities::{CapabilityRegistry, CODE_PERMISSION_DENIED};
use crate::classifier::IntentClassifier;
use crate::fallback::FallbackManager;
use crate::guardrails::{PermissionChecker, SensitiveWordFilter};
use crate::handoff::{HandoffDispatcher, HandoffReason};
use crate::llm::CompletionClient;
use crate::slot_filler::SlotFiller;
use crate::synthesizer::ResponseSynthesizer;

const GREETING_REPLY: &str =
    "Hello! I can help you with orders, shipments, refunds and your account. What can I do for you?";
const FAREWELL_REPLY: &str = "Thanks for stopping by. Have a great day!";
const BLOCKED_CONTENT_REPLY: &str =
    "I can't help with that topic. Is there something about your orders or account I can do?";
const FORBIDDEN_REPLY: &str =
    "You don't have permission for that operation. I can connect you with a human agent if needed.";

/// What one turn hands back to the transport layer.
///
/// `state` carries the turn's outcome for the client. The machine itself
/// always parks at `DONE` between turns; the reply reports the state that
/// decided the outcome (`NEED_CLARIFY`, `HUMAN_HANDOFF`, `REJECT`, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub code: u16,
    pub message: String,
    pub reply: String,
    pub state: DialogueState,
    pub need_human_handoff: bool,
}

impl TurnReply {
    fn success(reply: impl Into<String>, state: DialogueState) -> Self {
        Self {
            code: 200,
            message: "ok".to_string(),
            reply: reply.into(),
            state,
            need_human_handoff: false,
        }
    }

    fn need_clarify(question: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: "need_clarify".to_string(),
            reply: question.into(),
            state: DialogueState::NeedClarify,
            need_human_handoff: false,
        }
    }

    fn handoff(reply: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: "human_handoff".to_string(),
            reply: reply.into(),
            state: DialogueState::HumanHandoff,
            need_human_handoff: true,
        }
    }

    fn rejected(code: u16, reply: impl Into<String>) -> Self {
        Self {
            code,
            message: "rejected".to_string(),
            reply: reply.into(),
            state: DialogueState::Reject,
            need_human_handoff: false,
        }
    }
}

pub struct Orchestrator {
    classifier: IntentClassifier,
    slot_filler: SlotFiller,
    registry: CapabilityRegistry,
    synthesizer: ResponseSynthesizer,
    sensitive_filter: SensitiveWordFilter,
    permission_checker: PermissionChecker,
    handoff: HandoffDispatcher,
    fallback: FallbackManager,
    audit: Arc<dyn AuditSink>,
    confidence_threshold: f64,
    max_unknown_intent_retries: u32,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: CapabilityRegistry,
        audit: Arc<dyn AuditSink>,
        dialogue: &DialogueConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&client), dialogue.history_window),
            slot_filler: SlotFiller::new(Arc::clone(&client)),
            registry,
            synthesizer: ResponseSynthesizer::new(client),
            sensitive_filter: SensitiveWordFilter,
            permission_checker: PermissionChecker,
            handoff: HandoffDispatcher::new(Arc::clone(&audit)),
            fallback: FallbackManager,
            audit,
            confidence_threshold: dialogue.confidence_threshold,
            max_unknown_intent_retries: dialogue.max_unknown_intent_retries,
        }
    }

    /// Drives one turn. Never returns an error: infrastructure faults are
    /// absorbed by the fallback and come back as a reply like any other.
    pub async fn process(&self, conversation: &mut ConversationState, user_text: &str) -> TurnReply {
        StateMachine::reset(conversation);

        // Blocked content ends the turn before anything is recorded, so the
        // message never enters history or reaches the backend.
        if self.sensitive_filter.is_blocked(user_text) {
            StateMachine::transition(conversation, DialogueState::Reject);
            StateMachine::transition(conversation, DialogueState::Done);
            self.audit.emit(
                AuditEvent::new(
                    &conversation.session_id,
                    &conversation.trace_id,
                    "ingress.blocked_content",
                    AuditCategory::Policy,
                    "sensitive-word-filter",
                    AuditOutcome::Rejected,
                ),
            );
            return TurnReply::rejected(400, BLOCKED_CONTENT_REPLY);
        }

        conversation.record_user_message(user_text);
        StateMachine::transition(conversation, DialogueState::IntentRecognition);

        match self.run_turn(conversation, user_text).await {
            Ok(reply) => reply,
            Err(agent_error) => {
                StateMachine::transition(conversation, DialogueState::Error);
                let decision = self.fallback.handle_error(&conversation.trace_id, &agent_error);
                let reply = if decision.needs_handoff {
                    StateMachine::transition(conversation, DialogueState::Fallback);
                    StateMachine::transition(conversation, DialogueState::HumanHandoff);
                    let ticket = self.handoff.dispatch(conversation, HandoffReason::SystemError);
                    StateMachine::transition(conversation, DialogueState::Done);
                    let reply = format!(
                        "{} {}",
                        decision.reply,
                        HandoffDispatcher::waiting_message(&ticket)
                    );
                    conversation.record_assistant_message(&reply);
                    TurnReply {
                        code: decision.code,
                        message: "fallback".to_string(),
                        reply,
                        state: DialogueState::HumanHandoff,
                        need_human_handoff: true,
                    }
                } else {
                    StateMachine::transition(conversation, DialogueState::Done);
                    conversation.record_assistant_message(&decision.reply);
                    TurnReply {
                        code: decision.code,
                        message: "fallback".to_string(),
                        reply: decision.reply,
                        state: DialogueState::Fallback,
                        need_human_handoff: false,
                    }
                };
                reply
            }
        }
    }

    async fn run_turn(
        &self,
        conversation: &mut ConversationState,
        user_text: &str,
    ) -> Result<TurnReply, AgentError> {
        let classified = self.classifier.classify(conversation, user_text).await?;
        info!(
            event_name = "orchestrator.classified",
            trace_id = %conversation.trace_id,
            intent = classified.intent.code(),
            confidence = classified.confidence,
            "turn classified"
        );

        if classified.is_recognized(self.confidence_threshold) {
            match classified.intent {
                Intent::HumanHandoff => return Ok(self.escalate(conversation, HandoffReason::UserRequested)),
                Intent::Greeting => return Ok(self.finish_simple(conversation, GREETING_REPLY)),
                Intent::EndConversation => {
                    return Ok(self.finish_simple(conversation, FAREWELL_REPLY))
                }
                _ => {}
            }

            conversation.reset_unknown_intent();
            StateMachine::transition(conversation, DialogueState::SlotExtraction);
            let filled = self.slot_filler.fill(conversation, classified).await?;
            return self.resolve_filled(conversation, filled).await;
        }

        // Unrecognized. A stashed incomplete intent means this message is
        // probably the answer to our own clarification question.
        if let Some(pending) = conversation.pending_intent.take() {
            StateMachine::transition(conversation, DialogueState::SlotExtraction);
            let missing_before = pending.missing_slots.clone();
            let merged = self.slot_filler.backfill(conversation, pending, user_text).await?;
            // An answer that fills nothing counts as an unrecognized turn,
            // otherwise gibberish replies could loop on clarification forever.
            if !merged.is_complete() && merged.missing_slots == missing_before {
                return Ok(self.handle_stalled_clarification(conversation, merged));
            }
            conversation.reset_unknown_intent();
            return self.resolve_filled(conversation, merged).await;
        }

        Ok(self.handle_unknown_intent(conversation))
    }

    /// Shared tail for freshly filled and backfilled intents.
    async fn resolve_filled(
        &self,
        conversation: &mut ConversationState,
        filled: IntentResult,
    ) -> Result<TurnReply, AgentError> {
        if !filled.is_complete() {
            StateMachine::transition(conversation, DialogueState::NeedClarify);
            let question = missing_slot_question(&filled);
            conversation.pending_intent = Some(filled);
            StateMachine::transition(conversation, DialogueState::AskUser);
            StateMachine::transition(conversation, DialogueState::Done);
            conversation.record_assistant_message(&question);
            return Ok(TurnReply::need_clarify(question));
        }

        StateMachine::transition(conversation, DialogueState::SlotComplete);

        if !self.permission_checker.allows(filled.intent, conversation.permission_level) {
            StateMachine::transition(conversation, DialogueState::Forbidden);
            self.audit.emit(
                AuditEvent::new(
                    &conversation.session_id,
                    &conversation.trace_id,
                    "policy.permission_denied",
                    AuditCategory::Policy,
                    "permission-checker",
                    AuditOutcome::Rejected,
                )
                .with_metadata("intent", filled.intent.code()),
            );
            StateMachine::transition(conversation, DialogueState::Reject);
            StateMachine::transition(conversation, DialogueState::Done);
            conversation.record_assistant_message(FORBIDDEN_REPLY);
            conversation.pending_intent = None;
            return Ok(TurnReply::rejected(403, FORBIDDEN_REPLY));
        }

        StateMachine::transition(conversation, DialogueState::ToolExecution);
        let context = ExecutionContext {
            user_id: conversation.user_id.clone(),
            session_id: conversation.session_id.clone(),
            trace_id: conversation.trace_id.clone(),
            permission_level: conversation.permission_level,
        };
        let params: BTreeMap<String, String> = filled
            .slots
            .iter()
            .filter_map(|(name, value)| value.clone().map(|value| (name.clone(), value)))
            .collect();
        let result = self.registry.invoke(filled.intent, &context, &params).await?;

        if !result.success {
            StateMachine::transition(conversation, DialogueState::Fallback);
            conversation.pending_intent = None;

            // Without a capability-provided message there is nothing useful
            // to tell the user, so the conversation goes to a human instead.
            let Some(reply) = result.error_message.clone() else {
                StateMachine::transition(conversation, DialogueState::HumanHandoff);
                let ticket = self.handoff.dispatch(conversation, HandoffReason::CapabilityFailure);
                StateMachine::transition(conversation, DialogueState::Done);
                let reply = HandoffDispatcher::waiting_message(&ticket);
                conversation.record_assistant_message(&reply);
                return Ok(TurnReply::handoff(reply));
            };

            StateMachine::transition(conversation, DialogueState::Done);
            conversation.record_assistant_message(&reply);
            let code =
                if result.error_code.as_deref() == Some(CODE_PERMISSION_DENIED) { 403 } else { 200 };
            return Ok(TurnReply {
                code,
                message: result.error_code.unwrap_or_else(|| "failed".to_string()),
                reply,
                state: DialogueState::Fallback,
                need_human_handoff: false,
            });
        }

        StateMachine::transition(conversation, DialogueState::ResponseGeneration);
        let phrased = self.synthesizer.synthesize(conversation, filled.intent, &result).await;
        let masked = self.sensitive_filter.mask(&phrased);
        StateMachine::transition(conversation, DialogueState::Done);
        conversation.record_assistant_message(&masked);
        conversation.pending_intent = None;
        conversation.reset_unknown_intent();
        Ok(TurnReply::success(masked, DialogueState::Done))
    }

    /// A clarification answer that advanced no missing slot. Strikes accrue
    /// like unknown-intent turns; at the threshold the pending intent is
    /// abandoned and the conversation escalates.
    fn handle_stalled_clarification(
        &self,
        conversation: &mut ConversationState,
        pending: IntentResult,
    ) -> TurnReply {
        StateMachine::transition(conversation, DialogueState::NeedClarify);
        let strikes = conversation.increment_unknown_intent();

        if strikes >= self.max_unknown_intent_retries {
            conversation.reset_unknown_intent();
            StateMachine::transition(conversation, DialogueState::HumanHandoff);
            let ticket = self.handoff.dispatch(conversation, HandoffReason::RepeatedUnknownIntent);
            StateMachine::transition(conversation, DialogueState::Done);
            let reply = format!(
                "I'm having trouble understanding. {}",
                HandoffDispatcher::waiting_message(&ticket)
            );
            conversation.record_assistant_message(&reply);
            return TurnReply::handoff(reply);
        }

        let question = missing_slot_question(&pending);
        conversation.pending_intent = Some(pending);
        StateMachine::transition(conversation, DialogueState::AskUser);
        StateMachine::transition(conversation, DialogueState::Done);
        conversation.record_assistant_message(&question);
        TurnReply::need_clarify(question)
    }

    fn handle_unknown_intent(&self, conversation: &mut ConversationState) -> TurnReply {
        let strikes = conversation.increment_unknown_intent();
        StateMachine::transition(conversation, DialogueState::UnknownIntent);

        if strikes >= self.max_unknown_intent_retries {
            conversation.reset_unknown_intent();
            StateMachine::transition(conversation, DialogueState::HumanHandoff);
            let ticket = self.handoff.dispatch(conversation, HandoffReason::RepeatedUnknownIntent);
            StateMachine::transition(conversation, DialogueState::Done);
            let reply = format!(
                "I'm having trouble understanding. {}",
                HandoffDispatcher::waiting_message(&ticket)
            );
            conversation.record_assistant_message(&reply);
            return TurnReply::handoff(reply);
        }

        StateMachine::transition(conversation, DialogueState::AskUser);
        StateMachine::transition(conversation, DialogueState::Done);
        let question = "I'm not sure I understood. I can check an order, track a shipment, \
                        cancel or change an order, request a refund, file a complaint, or look \
                        up your account. Could you rephrase?";
        conversation.record_assistant_message(question);
        TurnReply::need_clarify(question)
    }

    fn escalate(&self, conversation: &mut ConversationState, reason: HandoffReason) -> TurnReply {
        StateMachine::transition(conversation, DialogueState::HumanHandoff);
        let ticket = self.handoff.dispatch(conversation, reason);
        StateMachine::transition(conversation, DialogueState::Done);
        let reply = HandoffDispatcher::waiting_message(&ticket);
        conversation.record_assistant_message(&reply);
        conversation.pending_intent = None;
        conversation.reset_unknown_intent();
        TurnReply::handoff(reply)
    }

    fn finish_simple(&self, conversation: &mut ConversationState, reply: &str) -> TurnReply {
        StateMachine::transition(conversation, DialogueState::Done);
        conversation.record_assistant_message(reply);
        conversation.reset_unknown_intent();
        TurnReply::success(reply, DialogueState::Done)
    }
}

/// Asks only for what is still missing, by description.
fn missing_slot_question(filled: &IntentResult) -> String {
    let definitions = slot_definitions(filled.intent);
    let mut wanted = Vec::new();
    for name in &filled.missing_slots {
        if let Some(definition) = definitions.iter().find(|definition| definition.name == *name) {
            wanted.push(definition.description);
        }
    }
    format!("To continue, I still need: {}.", wanted.join("; "))
}
