//! Slot filling.
//!
//! For an intent with a parameter table, the backend is asked to pull the
//! values out of the user's words. Extracted values are never trusted as-is:
//! each one passes the slot's format validation, and a value that fails is
//! treated as absent rather than corrected. The filler reports exactly which
//! required slots are still missing so the user can be asked for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use concierge_core::{slot_definitions, AgentError, ConversationState, IntentResult};

use crate::llm::{extract_json_object, CompletionClient, CompletionRequest};

const FILLER_TEMPERATURE: f64 = 0.1;
const FILLER_MAX_TOKENS: u32 = 300;

pub struct SlotFiller {
    client: Arc<dyn CompletionClient>,
}

impl SlotFiller {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Extracts and validates the slots for `result.intent` from the turn's
    /// user text. Intents without a parameter table pass through complete.
    pub async fn fill(
        &self,
        conversation: &ConversationState,
        mut result: IntentResult,
    ) -> Result<IntentResult, AgentError> {
        let definitions = slot_definitions(result.intent);
        if definitions.is_empty() {
            result.missing_slots.clear();
            return Ok(result);
        }

        let extracted = self.extract(conversation, &result, &result.raw_input.clone()).await?;
        apply_extracted(&mut result, extracted);
        Ok(result)
    }

    /// Re-runs extraction for a stashed incomplete intent against a new
    /// message, merging in any newly supplied values. Values already
    /// validated in earlier turns are kept.
    pub async fn backfill(
        &self,
        conversation: &ConversationState,
        mut pending: IntentResult,
        user_text: &str,
    ) -> Result<IntentResult, AgentError> {
        let extracted = self.extract(conversation, &pending, user_text).await?;
        let mut merged = extracted;
        for (name, value) in &pending.slots {
            if value.is_some() {
                merged.insert(name.clone(), value.clone());
            }
        }
        apply_extracted(&mut pending, merged);
        pending.raw_input = user_text.to_string();
        Ok(pending)
    }

    async fn extract(
        &self,
        conversation: &ConversationState,
        result: &IntentResult,
        user_text: &str,
    ) -> Result<BTreeMap<String, Option<String>>, AgentError> {
        let definitions = slot_definitions(result.intent);
        let mut catalog = String::new();
        for definition in definitions {
            catalog.push_str("- ");
            catalog.push_str(definition.name);
            catalog.push_str(": ");
            catalog.push_str(definition.description);
            if definition.required {
                catalog.push_str(" (required)");
            }
            catalog.push('\n');
        }

        let request = CompletionRequest {
            system_prompt: format!(
                "You perform slot extraction for the intent `{}`.\n\
                 Slots to look for:\n{catalog}\
                 Reply with only a JSON object mapping slot names to extracted\n\
                 string values. Use null for slots the message does not provide.\n\
                 Never invent values.",
                result.intent.code()
            ),
            user_prompt: user_text.to_string(),
            temperature: FILLER_TEMPERATURE,
            max_tokens: FILLER_MAX_TOKENS,
            stop: Vec::new(),
        };

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(error @ AgentError::Timeout(_)) => return Err(error),
            Err(error) => {
                warn!(
                    event_name = "slot_filler.backend_failed",
                    trace_id = %conversation.trace_id,
                    error = %error,
                    "slot extraction degraded to empty"
                );
                return Ok(BTreeMap::new());
            }
        };

        Ok(parse_extraction(&response.text))
    }
}

fn parse_extraction(backend_text: &str) -> BTreeMap<String, Option<String>> {
    let Some(window) = extract_json_object(backend_text) else {
        return BTreeMap::new();
    };
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(window) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(text) => Some(text),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            (name, text.filter(|text| !text.trim().is_empty()))
        })
        .collect()
}

/// Validates extracted values against the intent's table and recomputes the
/// missing list. Slot names the backend invented are dropped.
fn apply_extracted(result: &mut IntentResult, extracted: BTreeMap<String, Option<String>>) {
    let definitions = slot_definitions(result.intent);
    let mut slots = BTreeMap::new();
    let mut missing = Vec::new();

    for definition in definitions {
        let value = extracted
            .get(definition.name)
            .and_then(|value| value.clone())
            .filter(|value| definition.accepts(value));
        if value.is_none() && definition.required {
            missing.push(definition.name.to_string());
        }
        slots.insert(definition.name.to_string(), value);
    }

    debug!(
        event_name = "slot_filler.applied",
        intent = result.intent.code(),
        missing = ?missing,
        "slot table applied"
    );
    result.slots = slots;
    result.missing_slots = missing;
}
