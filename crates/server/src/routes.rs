//! Chat API routes.
//!
//! JSON endpoints:
//! - `POST /api/agent/chat` drives one dialogue turn
//! - `POST /api/agent/session/end` ends a session (idempotent)
//!
//! The HTTP status mirrors the envelope's `code` field, so transport-level
//! clients and envelope-reading clients see the same outcome.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use concierge_agent::guardrails::RiskScreen;
use concierge_agent::orchestrator::Orchestrator;
use concierge_agent::sessions::SessionStore;
use concierge_core::audit::truncate_body;
use concierge_core::{
    generate_trace_id, AuditCategory, AuditEvent, AuditOutcome, AuditSink,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
    pub risk: Arc<RiskScreen>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub message: String,
}

impl ChatRequest {
    fn validate(&self, max_message_chars: usize) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("userId must not be blank".to_string());
        }
        if self.session_id.trim().is_empty() {
            return Err("sessionId must not be blank".to_string());
        }
        if self.message.trim().is_empty() {
            return Err("message must not be blank".to_string());
        }
        if self.message.chars().count() > max_message_chars {
            return Err(format!("message must not exceed {max_message_chars} characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub code: u16,
    pub message: String,
    pub reply: String,
    pub session_id: String,
    pub state: String,
    pub need_human_handoff: bool,
    pub trace_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionParams {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub code: u16,
    pub message: String,
    pub ended: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agent/chat", post(chat))
        .route("/api/agent/session/end", post(end_session))
        .with_state(state)
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    let trace_id = generate_trace_id();

    if let Err(reason) = request.validate(state.risk.max_message_chars()) {
        return respond(ChatResponse {
            code: 400,
            message: reason,
            reply: String::new(),
            session_id: request.session_id,
            state: "REJECT".to_string(),
            need_human_handoff: false,
            trace_id,
        });
    }

    state.audit.emit(
        AuditEvent::new(
            &request.session_id,
            &trace_id,
            "ingress.chat_request",
            AuditCategory::Ingress,
            &request.user_id,
            AuditOutcome::Success,
        )
        .with_metadata("message_excerpt", truncate_body(&request.message)),
    );

    let verdict = state.risk.screen(&request.user_id, &request.message);
    if !verdict.is_allowed() {
        return respond(ChatResponse {
            code: 403,
            message: "rejected".to_string(),
            reply: verdict.user_message(),
            session_id: request.session_id,
            state: "REJECT".to_string(),
            need_human_handoff: false,
            trace_id,
        });
    }

    let (session_id, handle) =
        state.sessions.get_or_create(Some(&request.session_id), &request.user_id, &trace_id);

    // The session lock is held for the whole turn; concurrent requests for
    // the same session queue here.
    let mut conversation = handle.state.lock().await;
    state.sessions.refresh(&mut conversation, &trace_id);
    let reply = state.orchestrator.process(&mut conversation, &request.message).await;
    drop(conversation);

    info!(
        event_name = "routes.chat_completed",
        trace_id = %trace_id,
        session_id = %session_id,
        code = reply.code,
        need_human_handoff = reply.need_human_handoff,
        "chat turn completed"
    );

    respond(ChatResponse {
        code: reply.code,
        message: reply.message,
        reply: reply.reply,
        session_id,
        state: reply.state.as_str().to_string(),
        need_human_handoff: reply.need_human_handoff,
        trace_id,
    })
}

pub async fn end_session(
    State(state): State<AppState>,
    Query(params): Query<EndSessionParams>,
) -> (StatusCode, Json<EndSessionResponse>) {
    let ended = state.sessions.end_session(&params.session_id);
    state.audit.emit(AuditEvent::new(
        &params.session_id,
        generate_trace_id(),
        "ingress.session_end",
        AuditCategory::Ingress,
        "api",
        AuditOutcome::Success,
    ));

    let message =
        if ended { "session ended".to_string() } else { "session not found".to_string() };
    (StatusCode::OK, Json(EndSessionResponse { code: 200, message, ended }))
}

fn respond(payload: ChatResponse) -> (StatusCode, Json<ChatResponse>) {
    let status = StatusCode::from_u16(payload.code).unwrap_or(StatusCode::OK);
    (status, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        extract::{Query, State},
        http::StatusCode,
        Json,
    };

    use concierge_agent::capabilities::CapabilityRegistry;
    use concierge_agent::guardrails::RiskScreen;
    use concierge_agent::llm::MockCompletionClient;
    use concierge_agent::orchestrator::Orchestrator;
    use concierge_agent::sessions::SessionStore;
    use concierge_core::config::{DialogueConfig, RiskConfig};
    use concierge_core::InMemoryAuditSink;

    use super::{chat, end_session, AppState, ChatRequest, EndSessionParams};

    fn state_with(mock: MockCompletionClient) -> (AppState, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let dialogue = DialogueConfig {
            confidence_threshold: 0.7,
            history_window: 3,
            max_unknown_intent_retries: 3,
            session_timeout_minutes: 30,
            sweep_interval_secs: 300,
        };
        let orchestrator = Orchestrator::new(
            Arc::new(mock),
            CapabilityRegistry::with_defaults(),
            Arc::new(sink.clone()),
            &dialogue,
        );
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(SessionStore::new(30)),
            risk: Arc::new(RiskScreen::new(RiskConfig {
                max_requests_per_minute: 60,
                max_message_chars: 2000,
            })),
            audit: Arc::new(sink.clone()),
        };
        (state, sink)
    }

    fn chat_request(user_id: &str, session_id: &str, message: &str) -> ChatRequest {
        ChatRequest {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn chat_turn_returns_a_session_and_trace_id() {
        let mock = MockCompletionClient::new()
            .script("intent classification", r#"{"intent":"greeting","confidence":0.99}"#);
        let (state, _) = state_with(mock);

        let (status, Json(payload)) =
            chat(State(state.clone()), Json(chat_request("u-1001", "s-chat", "hello"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.code, 200);
        assert_eq!(payload.session_id, "s-chat");
        assert_eq!(payload.trace_id.len(), 16);
        assert!(payload.reply.contains("Hello"));
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_any_processing() {
        let (state, _) = state_with(MockCompletionClient::new());

        let (status, Json(payload)) =
            chat(State(state.clone()), Json(chat_request("u-1001", "s-1", "   "))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.code, 400);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected_before_any_processing() {
        let (state, _) = state_with(MockCompletionClient::new());

        let (status, Json(payload)) =
            chat(State(state.clone()), Json(chat_request("u-1001", "  ", "hello"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.code, 400);
        assert!(payload.message.contains("sessionId"));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn over_limit_message_is_invalid_input() {
        let (state, _) = state_with(MockCompletionClient::new());

        let (status, Json(payload)) = chat(
            State(state.clone()),
            Json(chat_request("u-1001", "s-1", &"x".repeat(2001))),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.code, 400);
        assert!(payload.message.contains("2000"));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn injection_markers_are_screened_out_as_policy() {
        let (state, _) = state_with(MockCompletionClient::new());

        let (status, Json(payload)) = chat(
            State(state.clone()),
            Json(chat_request("u-1001", "s-1", "'; DROP TABLE orders")),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(payload.code, 403);
        assert_eq!(payload.state, "REJECT");
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn session_id_is_stable_across_turns() {
        let mock = MockCompletionClient::new()
            .script("intent classification", r#"{"intent":"greeting","confidence":0.99}"#);
        let (state, _) = state_with(mock);

        let (_, Json(first)) =
            chat(State(state.clone()), Json(chat_request("u-1001", "s-stable", "hello"))).await;
        let (_, Json(second)) = chat(
            State(state.clone()),
            Json(chat_request("u-1001", "s-stable", "hello again")),
        )
        .await;

        assert_eq!(first.session_id, second.session_id);
        assert_ne!(first.trace_id, second.trace_id);
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn ingress_audit_truncates_long_messages() {
        let mock = MockCompletionClient::new()
            .script("intent classification", r#"{"intent":"greeting","confidence":0.99}"#);
        let (state, sink) = state_with(mock);

        let long_message = "a".repeat(300);
        chat(State(state), Json(chat_request("u-1001", "s-audit", &long_message))).await;

        let excerpt = sink
            .events()
            .iter()
            .find(|event| event.event_type == "ingress.chat_request")
            .and_then(|event| event.metadata.get("message_excerpt").cloned())
            .unwrap_or_default();
        assert_eq!(excerpt.chars().count(), 123);
        assert!(excerpt.ends_with("..."));
    }

    #[tokio::test]
    async fn ending_a_session_twice_is_harmless() {
        let mock = MockCompletionClient::new()
            .script("intent classification", r#"{"intent":"greeting","confidence":0.99}"#);
        let (state, _) = state_with(mock);

        let (_, Json(turn)) =
            chat(State(state.clone()), Json(chat_request("u-1001", "s-end", "hello"))).await;

        let (status, Json(first)) = end_session(
            State(state.clone()),
            Query(EndSessionParams { session_id: turn.session_id.clone() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(first.ended);

        let (status, Json(second)) = end_session(
            State(state.clone()),
            Query(EndSessionParams { session_id: turn.session_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!second.ended);
        assert_eq!(second.code, 200);
    }
}
