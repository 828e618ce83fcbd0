use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed set of user goals the system supports.
///
/// Each member carries a stable string code - the only vocabulary the
/// completion backend may emit. The set is immutable at runtime; any code
/// outside it resolves to [`Intent::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QueryOrderStatus,
    QueryLogistics,
    CancelOrder,
    ModifyOrder,
    RequestRefund,
    Complaint,
    Consultation,
    QueryAccount,
    ModifyAccount,
    HumanHandoff,
    Greeting,
    EndConversation,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 13] = [
        Intent::QueryOrderStatus,
        Intent::QueryLogistics,
        Intent::CancelOrder,
        Intent::ModifyOrder,
        Intent::RequestRefund,
        Intent::Complaint,
        Intent::Consultation,
        Intent::QueryAccount,
        Intent::ModifyAccount,
        Intent::HumanHandoff,
        Intent::Greeting,
        Intent::EndConversation,
        Intent::Unknown,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::QueryOrderStatus => "query_order_status",
            Self::QueryLogistics => "query_logistics",
            Self::CancelOrder => "cancel_order",
            Self::ModifyOrder => "modify_order",
            Self::RequestRefund => "request_refund",
            Self::Complaint => "complaint",
            Self::Consultation => "consultation",
            Self::QueryAccount => "query_account",
            Self::ModifyAccount => "modify_account",
            Self::HumanHandoff => "human_handoff",
            Self::Greeting => "greeting",
            Self::EndConversation => "end_conversation",
            Self::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::QueryOrderStatus => "look up an order's status",
            Self::QueryLogistics => "track a shipment",
            Self::CancelOrder => "cancel an order",
            Self::ModifyOrder => "change an order",
            Self::RequestRefund => "request a refund",
            Self::Complaint => "file a complaint",
            Self::Consultation => "ask a general question",
            Self::QueryAccount => "look up account details",
            Self::ModifyAccount => "change account details",
            Self::HumanHandoff => "speak with a human agent",
            Self::Greeting => "say hello",
            Self::EndConversation => "end the conversation",
            Self::Unknown => "unrecognized",
        }
    }

    /// Operations that change data or money are flagged as sensitive.
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            Self::CancelOrder
                | Self::ModifyOrder
                | Self::RequestRefund
                | Self::Complaint
                | Self::ModifyAccount
        )
    }

    /// Total translation from an external string to a member. Anything that
    /// does not match a known code - including blanks - is `Unknown`.
    pub fn from_code(code: &str) -> Intent {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Intent::Unknown;
        }
        Self::ALL
            .into_iter()
            .find(|intent| intent.code().eq_ignore_ascii_case(trimmed))
            .unwrap_or(Intent::Unknown)
    }

    /// Whether the intent is routed through the capability registry.
    /// Greetings, farewells, handoffs, and unknowns are answered without
    /// invoking any backend operation.
    pub fn needs_capability(self) -> bool {
        !matches!(
            self,
            Self::Greeting | Self::EndConversation | Self::HumanHandoff | Self::Unknown
        )
    }

    /// Renders the closed vocabulary for classification prompts, one
    /// `- code: label` line per member, `Unknown` excluded.
    pub fn prompt_catalog() -> String {
        let mut catalog = String::new();
        for intent in Self::ALL {
            if intent == Intent::Unknown {
                continue;
            }
            catalog.push_str("- ");
            catalog.push_str(intent.code());
            catalog.push_str(": ");
            catalog.push_str(intent.label());
            catalog.push('\n');
        }
        catalog
    }
}

/// Output of classification plus slot filling for one turn.
///
/// Created by the classifier, updated by the slot filler, consumed by the
/// orchestrator and invoker. It outlives the turn only when stashed as the
/// session's pending intent across a clarification exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    /// Classification confidence, clamped to [0, 1].
    pub confidence: f64,
    /// Slot name to extracted value; `None` marks a slot the user has not
    /// (validly) provided yet.
    pub slots: BTreeMap<String, Option<String>>,
    /// Required slots still unfilled.
    pub missing_slots: Vec<String>,
    /// The user text this result was derived from, kept for audit.
    pub raw_input: String,
    /// The unparsed backend reply, kept for audit and debugging.
    pub raw_backend_output: Option<String>,
}

impl IntentResult {
    pub fn new(
        intent: Intent,
        confidence: f64,
        raw_input: impl Into<String>,
        raw_backend_output: impl Into<String>,
    ) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            slots: BTreeMap::new(),
            missing_slots: Vec::new(),
            raw_input: raw_input.into(),
            raw_backend_output: Some(raw_backend_output.into()),
        }
    }

    /// Result for a backend failure or an unparsable reply: `Unknown` at
    /// zero confidence, with the failure reason kept for audit.
    pub fn failed(raw_input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            slots: BTreeMap::new(),
            missing_slots: Vec::new(),
            raw_input: raw_input.into(),
            raw_backend_output: Some(reason.into()),
        }
    }

    /// Recognition requires a known intent and confidence at or above the
    /// configured threshold.
    pub fn is_recognized(&self, confidence_threshold: f64) -> bool {
        self.intent != Intent::Unknown && self.confidence >= confidence_threshold
    }

    pub fn is_complete(&self) -> bool {
        self.missing_slots.is_empty()
    }

    pub fn slot_value(&self, name: &str) -> Option<&str> {
        self.slots.get(name).and_then(|value| value.as_deref())
    }
}
