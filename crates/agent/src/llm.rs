//! Completion backend client.
//!
//! Every stage that needs the language model goes through
//! [`CompletionClient`]. The HTTP implementation talks to any
//! OpenAI-compatible chat endpoint with a bounded timeout and a small retry
//! budget; the mock implementation answers from scripted markers and backs
//! the whole test suite plus local runs without a backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use concierge_core::AgentError;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub latency_ms: u64,
    /// Token usage as reported by the backend, when it reports one.
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError>;
    fn model_name(&self) -> &str;
}

/// Pulls the first balanced `{...}` window out of free text. Backends often
/// wrap JSON in prose or code fences; the window is what gets parsed.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl HttpCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, AgentError> {
        let timeout = Duration::from_secs(timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AgentError::Internal(format!("http client build failed: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
            max_retries,
        })
    }

    async fn send_once(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, Option<ChatUsage>), AgentError> {
        let body = ChatRequestBody {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system_prompt },
                ChatMessage { role: "user", content: &request.user_prompt },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop,
        };

        let mut http_request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request.send().await.map_err(|err| {
            if err.is_timeout() {
                AgentError::Timeout(self.timeout.as_millis() as u64)
            } else {
                AgentError::Backend(format!("request failed: {err}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Backend(format!("backend returned status {status}")));
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|err| AgentError::Backend(format!("unreadable response body: {err}")))?;

        let usage = parsed.usage;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::Backend("response contained no completion".to_string()))?;
        Ok((text, usage))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
        let started = std::time::Instant::now();
        let mut last_error = AgentError::Backend("no attempts made".to_string());

        for attempt in 0..=self.max_retries {
            match self.send_once(&request).await {
                Ok((text, usage)) => {
                    return Ok(CompletionResponse {
                        text,
                        latency_ms: started.elapsed().as_millis() as u64,
                        prompt_tokens: usage.as_ref().and_then(|usage| usage.prompt_tokens),
                        completion_tokens: usage.as_ref().and_then(|usage| usage.completion_tokens),
                    });
                }
                Err(error) => {
                    warn!(
                        event_name = "llm.attempt_failed",
                        attempt,
                        error = %error,
                        "completion attempt failed"
                    );
                    // Timeouts are not retried: the caller's budget is spent.
                    if matches!(error, AgentError::Timeout(_)) {
                        return Err(error);
                    }
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted backend for tests and backendless runs.
///
/// Answers are looked up by a marker substring of the system prompt, so one
/// mock can serve classification, extraction and synthesis in a single turn.
/// Each marker holds a queue; responses are consumed in order, the last one
/// repeating.
#[derive(Default)]
pub struct MockCompletionClient {
    scripts: Mutex<HashMap<String, Vec<String>>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.push_script(marker, response);
        self
    }

    pub fn push_script(&self, marker: impl Into<String>, response: impl Into<String>) {
        let mut scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(poisoned) => poisoned.into_inner(),
        };
        scripts.entry(marker.into()).or_default().push(response.into());
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
        let mut scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (marker, responses) in scripts.iter_mut() {
            if request.system_prompt.contains(marker.as_str()) {
                let text = if responses.len() > 1 {
                    responses.remove(0)
                } else {
                    responses
                        .first()
                        .cloned()
                        .ok_or_else(|| AgentError::Backend("script exhausted".to_string()))?
                };
                debug!(event_name = "llm.mock_hit", marker = %marker, "scripted completion");
                return Ok(CompletionResponse {
                    text,
                    latency_ms: 1,
                    prompt_tokens: None,
                    completion_tokens: None,
                });
            }
        }
        Err(AgentError::Backend(format!(
            "no script matches prompt: {}",
            &request.system_prompt.chars().take(60).collect::<String>()
        )))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
