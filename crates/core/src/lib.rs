//! Concierge Core - domain model for task-oriented dialogue orchestration
//!
//! This crate holds everything that must stay deterministic while a
//! completion backend (an LLM) is in the loop:
//!
//! - **Intents** (`intent`) - the closed set of user goals the system
//!   supports, plus the classification result carried through a turn
//! - **Slots** (`slots`) - static per-intent parameter definitions and
//!   format validation
//! - **Dialogue state machine** (`dialogue`) - the explicit adjacency table
//!   that decides "what happens next"; never the language model
//! - **Conversation state** (`session`) - the per-session entity carried
//!   across turns
//! - **Capability results** (`capability`) - the post-redaction shape in
//!   which backend operations report
//! - **Audit** (`audit`) - the trace-id keyed event trail
//! - **Config** (`config`) - file/env/override layered configuration
//!
//! # Safety Principle
//!
//! Output from the completion backend is untrusted data. Every value that
//! crosses into this crate is mapped onto a closed enumeration or validated
//! against a static pattern; anything that does not fit resolves to a
//! reserved unknown/missing value instead of a new behavior.

pub mod audit;
pub mod capability;
pub mod config;
pub mod dialogue;
pub mod errors;
pub mod intent;
pub mod session;
pub mod slots;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use capability::{CapabilityResult, ExecutionContext};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use dialogue::{DialogueState, StateMachine};
pub use errors::AgentError;
pub use intent::{Intent, IntentResult};
pub use session::{generate_trace_id, ConversationState, MessageEntry, MessageRole, TransitionRecord};
pub use slots::{slot_definitions, SlotDefinition};
