//! Response synthesis.
//!
//! The backend is given only the redacted, structured capability result to
//! phrase, never raw records. If it fails or returns nothing usable, the
//! deterministic template takes over: a fixed label table rendered straight
//! from the result's fields, which by construction cannot fabricate a value.

use std::sync::Arc;

use tracing::warn;

use concierge_core::{CapabilityResult, ConversationState, Intent};

use crate::llm::{CompletionClient, CompletionRequest};

const SYNTHESIZER_TEMPERATURE: f64 = 0.3;
const SYNTHESIZER_MAX_TOKENS: u32 = 500;

/// Display order and labels for known result fields. Fields outside this
/// table render under their raw name, after the known ones.
const FIELD_LABELS: [(&str, &str); 15] = [
    ("order_id", "Order number"),
    ("order_status", "Order status"),
    ("order_amount", "Order amount"),
    ("create_time", "Created"),
    ("update_time", "Last updated"),
    ("product_name", "Items"),
    ("receiver_name", "Recipient"),
    ("receiver_phone", "Contact phone"),
    ("receiver_address", "Delivery address"),
    ("logistics_status", "Shipping status"),
    ("current_location", "Current location"),
    ("estimate_arrival", "Estimated arrival"),
    ("account_id", "Account"),
    ("member_level", "Membership level"),
    ("registered_at", "Member since"),
];

pub struct ResponseSynthesizer {
    client: Arc<dyn CompletionClient>,
}

impl ResponseSynthesizer {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Phrases a successful capability result. Degrades to the template on
    /// any backend trouble, so this stage can never fail a turn.
    pub async fn synthesize(
        &self,
        conversation: &ConversationState,
        intent: Intent,
        result: &CapabilityResult,
    ) -> String {
        if !result.has_data() {
            return self.template_reply(intent, result);
        }

        let mut fields = String::new();
        for (name, value) in &result.data {
            fields.push_str(name);
            fields.push_str(": ");
            fields.push_str(value);
            fields.push('\n');
        }

        let request = CompletionRequest {
            system_prompt: format!(
                "You perform response synthesis for a customer service assistant.\n\
                 The user wanted to {}. Phrase the following verified fields as a\n\
                 short, friendly reply. Use only these fields; do not add facts,\n\
                 figures, dates, or promises that are not listed.",
                intent.label()
            ),
            user_prompt: fields,
            temperature: SYNTHESIZER_TEMPERATURE,
            max_tokens: SYNTHESIZER_MAX_TOKENS,
            stop: Vec::new(),
        };

        match self.client.complete(request).await {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            Ok(_) => self.template_reply(intent, result),
            Err(error) => {
                warn!(
                    event_name = "synthesizer.backend_failed",
                    trace_id = %conversation.trace_id,
                    error = %error,
                    "synthesis degraded to template"
                );
                self.template_reply(intent, result)
            }
        }
    }

    /// Deterministic rendering of the result fields.
    pub fn template_reply(&self, intent: Intent, result: &CapabilityResult) -> String {
        if !result.has_data() {
            return format!(
                "I couldn't find any records for your request to {}. \
                 Please double-check the details and try again.",
                intent.label()
            );
        }

        let mut reply = String::from("Here's what I found:\n");
        let mut remaining = result.data.clone();
        for (name, label) in FIELD_LABELS {
            if let Some(value) = remaining.remove(name) {
                reply.push_str(label);
                reply.push_str(": ");
                reply.push_str(&value);
                reply.push('\n');
            }
        }
        for (name, value) in remaining {
            reply.push_str(&name);
            reply.push_str(": ");
            reply.push_str(&value);
            reply.push('\n');
        }
        reply.trim_end().to_string()
    }
}
