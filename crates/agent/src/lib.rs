//! Concierge Agent - the per-turn dialogue runtime
//!
//! This crate is the "brain" of the concierge system. Each user turn is
//! driven through a fixed pipeline:
//!
//! 1. **Ingress screening** (`guardrails`) - sensitive-content filter,
//!    rate limiting, length and injection checks
//! 2. **Intent classification** (`classifier`) - natural language to one
//!    member of a closed intent set, with confidence
//! 3. **Slot filling** (`slot_filler`) - extract and validate the
//!    parameters the intent needs; ask for what is missing
//! 4. **Permission check** (`guardrails`) - sensitive operations require
//!    clearance before any capability runs
//! 5. **Capability invocation** (`capabilities`) - the registered backend
//!    operation, with redaction applied before anything leaves it
//! 6. **Response synthesis** (`synthesizer`) - phrase the structured result,
//!    falling back to a deterministic template
//!
//! # Key Types
//!
//! - `Orchestrator` - the turn driver (see `orchestrator`)
//! - `CompletionClient` - pluggable completion backend (see `llm`)
//! - `SessionStore` - keyed conversation state with turn serialization
//!
//! # Safety Principle
//!
//! The completion backend is strictly a translator. It never chooses the
//! next dialogue state, never bypasses a permission check, and never sees
//! data a capability has not already redacted.

pub mod capabilities;
pub mod classifier;
pub mod fallback;
pub mod guardrails;
pub mod handoff;
pub mod llm;
pub mod orchestrator;
pub mod sessions;
pub mod slot_filler;
pub mod synthesizer;
