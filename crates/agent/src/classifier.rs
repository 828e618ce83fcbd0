//! Intent classification.
//!
//! The backend is asked to pick one code out of the closed catalog and
//! report a confidence. Its reply is parsed strictly; any code outside the
//! catalog, any malformed reply, and any non-timeout backend fault all
//! degrade to `Unknown` at zero confidence. Only a timeout surfaces as an
//! error, because the caller owes the user a retry message for it.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use concierge_core::{AgentError, ConversationState, Intent, IntentResult};

use crate::llm::{extract_json_object, CompletionClient, CompletionRequest};

const CLASSIFIER_TEMPERATURE: f64 = 0.1;
const CLASSIFIER_MAX_TOKENS: u32 = 200;

#[derive(Deserialize)]
struct ClassifierReply {
    intent: String,
    confidence: f64,
}

pub struct IntentClassifier {
    client: Arc<dyn CompletionClient>,
    history_window: usize,
}

impl IntentClassifier {
    pub fn new(client: Arc<dyn CompletionClient>, history_window: usize) -> Self {
        Self { client, history_window }
    }

    pub async fn classify(
        &self,
        conversation: &ConversationState,
        user_text: &str,
    ) -> Result<IntentResult, AgentError> {
        let request = CompletionRequest {
            system_prompt: self.system_prompt(),
            user_prompt: format!(
                "Recent conversation:\n{}\nNew user message: {user_text}",
                conversation.recent_history(self.history_window)
            ),
            temperature: CLASSIFIER_TEMPERATURE,
            max_tokens: CLASSIFIER_MAX_TOKENS,
            stop: Vec::new(),
        };

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(error @ AgentError::Timeout(_)) => return Err(error),
            Err(error) => {
                warn!(
                    event_name = "classifier.backend_failed",
                    trace_id = %conversation.trace_id,
                    error = %error,
                    "classification degraded to unknown"
                );
                return Ok(IntentResult::failed(user_text, error.to_string()));
            }
        };

        Ok(self.parse(user_text, &response.text))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You perform intent classification for a customer service assistant.\n\
             Pick exactly one intent code from this catalog:\n{}\n\
             Reply with only a JSON object: {{\"intent\": \"<code>\", \"confidence\": <0..1>}}.\n\
             If no code fits, use confidence 0.",
            Intent::prompt_catalog()
        )
    }

    fn parse(&self, user_text: &str, backend_text: &str) -> IntentResult {
        let Some(window) = extract_json_object(backend_text) else {
            return IntentResult::failed(user_text, backend_text);
        };
        match serde_json::from_str::<ClassifierReply>(window) {
            Ok(reply) => {
                let intent = Intent::from_code(&reply.intent);
                debug!(
                    event_name = "classifier.parsed",
                    intent = intent.code(),
                    confidence = reply.confidence,
                    "intent classified"
                );
                IntentResult::new(intent, reply.confidence, user_text, backend_text)
            }
            Err(_) => IntentResult::failed(user_text, backend_text),
        }
    }
}
