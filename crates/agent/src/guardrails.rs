//! Ingress and policy guardrails.
//!
//! Everything here runs before or after the completion backend, never
//! through it: blocked-content screening on the way in, PII masking on the
//! way out, rate and length limits per user, injection screening, and the
//! permission gate in front of sensitive operations.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::warn;

use concierge_core::config::RiskConfig;
use concierge_core::Intent;

const PHONE_PATTERN: &str = r"\b1[3-9]\d{9}\b";
const NATIONAL_ID_PATTERN: &str = r"\b\d{17}[\dXx]\b";

/// Terms that end a turn immediately, before any model call.
const BLOCKED_TERMS: [&str; 6] =
    ["violence", "weapon", "gambling", "narcotics", "counterfeit", "extremist"];

const INJECTION_MARKERS: [&str; 8] = [
    "select ",
    "insert ",
    "delete ",
    "drop table",
    "union select",
    "<script",
    "javascript:",
    "onerror=",
];

fn phone_regex() -> Option<&'static Regex> {
    static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(PHONE_PATTERN).ok()).as_ref()
}

fn national_id_regex() -> Option<&'static Regex> {
    static NATIONAL_ID: OnceLock<Option<Regex>> = OnceLock::new();
    NATIONAL_ID.get_or_init(|| Regex::new(NATIONAL_ID_PATTERN).ok()).as_ref()
}

/// Inbound block + outbound mask over the same vocabulary of concerns.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensitiveWordFilter;

impl SensitiveWordFilter {
    pub fn is_blocked(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        BLOCKED_TERMS.iter().any(|term| lowered.contains(term))
    }

    /// Masks PII in outbound text. Applied to every reply, template or
    /// synthesized, as the last step before it leaves the pipeline.
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        if let Some(regex) = phone_regex() {
            masked = regex
                .replace_all(&masked, |captures: &regex::Captures<'_>| {
                    let phone = &captures[0];
                    format!("{}****{}", &phone[..3], &phone[phone.len() - 4..])
                })
                .into_owned();
        }
        if let Some(regex) = national_id_regex() {
            masked = regex.replace_all(&masked, "******************").into_owned();
        }
        masked
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskVerdict {
    Allowed,
    MessageTooLong { limit: usize },
    RateLimited,
    InjectionSuspected,
}

impl RiskVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Allowed => String::new(),
            Self::MessageTooLong { limit } => {
                format!("That message is too long. Please keep it under {limit} characters.")
            }
            Self::RateLimited => {
                "You are sending messages too quickly. Please wait a moment and try again."
                    .to_string()
            }
            Self::InjectionSuspected => {
                "That message could not be processed. Please rephrase it.".to_string()
            }
        }
    }
}

struct WindowCounter {
    window_start: Instant,
    count: u32,
}

/// Per-user fixed-window request limiting plus message screening.
pub struct RiskScreen {
    config: RiskConfig,
    windows: Mutex<HashMap<String, WindowCounter>>,
}

impl RiskScreen {
    pub fn new(config: RiskConfig) -> Self {
        Self { config, windows: Mutex::new(HashMap::new()) }
    }

    pub fn max_message_chars(&self) -> usize {
        self.config.max_message_chars
    }

    pub fn screen(&self, user_id: &str, text: &str) -> RiskVerdict {
        if text.chars().count() > self.config.max_message_chars {
            return RiskVerdict::MessageTooLong { limit: self.config.max_message_chars };
        }

        let lowered = text.to_lowercase();
        if INJECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            warn!(event_name = "risk.injection_suspected", user_id, "injection marker in message");
            return RiskVerdict::InjectionSuspected;
        }

        if !self.admit(user_id) {
            warn!(event_name = "risk.rate_limited", user_id, "per-user rate limit hit");
            return RiskVerdict::RateLimited;
        }

        RiskVerdict::Allowed
    }

    fn admit(&self, user_id: &str) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(windows) => windows,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let counter = windows
            .entry(user_id.to_string())
            .or_insert(WindowCounter { window_start: now, count: 0 });

        if now.duration_since(counter.window_start) >= Duration::from_secs(60) {
            counter.window_start = now;
            counter.count = 0;
        }

        counter.count += 1;
        counter.count <= self.config.max_requests_per_minute
    }
}

/// Clearance gate in front of sensitive operations. Read-only intents pass
/// unconditionally; sensitive ones need a non-zero clearance level.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionChecker;

impl PermissionChecker {
    pub fn allows(&self, intent: Intent, permission_level: u8) -> bool {
        !intent.is_sensitive() || permission_level >= 1
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::RiskConfig;
    use concierge_core::Intent;

    use super::{PermissionChecker, RiskScreen, RiskVerdict, SensitiveWordFilter};

    fn risk_config() -> RiskConfig {
        RiskConfig { max_requests_per_minute: 3, max_message_chars: 50 }
    }

    #[test]
    fn blocked_terms_are_caught_case_insensitively() {
        let filter = SensitiveWordFilter;
        assert!(filter.is_blocked("where can I buy a WEAPON"));
        assert!(!filter.is_blocked("where is my order"));
    }

    #[test]
    fn outbound_phone_numbers_are_masked() {
        let filter = SensitiveWordFilter;
        let masked = filter.mask("call me at 13812345678 about the order");
        assert_eq!(masked, "call me at 138****5678 about the order");
    }

    #[test]
    fn outbound_national_ids_are_masked() {
        let filter = SensitiveWordFilter;
        let masked = filter.mask("id 11010119900101123X on file");
        assert!(!masked.contains("11010119900101123X"));
        assert!(masked.contains("******************"));
    }

    #[test]
    fn mask_leaves_ordinary_numbers_alone() {
        let filter = SensitiveWordFilter;
        assert_eq!(filter.mask("order ORD-2026-001234, total 129.00"), "order ORD-2026-001234, total 129.00");
    }

    #[test]
    fn over_long_messages_are_rejected() {
        let screen = RiskScreen::new(risk_config());
        let verdict = screen.screen("u-1", &"x".repeat(51));
        assert_eq!(verdict, RiskVerdict::MessageTooLong { limit: 50 });
    }

    #[test]
    fn injection_markers_are_rejected() {
        let screen = RiskScreen::new(risk_config());
        assert_eq!(
            screen.screen("u-1", "'; DROP TABLE orders"),
            RiskVerdict::InjectionSuspected
        );
        assert_eq!(
            screen.screen("u-1", "<script>alert(1)</script>"),
            RiskVerdict::InjectionSuspected
        );
    }

    #[test]
    fn rate_limit_trips_after_the_budget() {
        let screen = RiskScreen::new(risk_config());
        assert!(screen.screen("u-1", "one").is_allowed());
        assert!(screen.screen("u-1", "two").is_allowed());
        assert!(screen.screen("u-1", "three").is_allowed());
        assert_eq!(screen.screen("u-1", "four"), RiskVerdict::RateLimited);
        // Limits are per user.
        assert!(screen.screen("u-2", "one").is_allowed());
    }

    #[test]
    fn permission_gate_only_guards_sensitive_intents() {
        let checker = PermissionChecker;
        assert!(checker.allows(Intent::QueryOrderStatus, 0));
        assert!(checker.allows(Intent::CancelOrder, 1));
        assert!(!checker.allows(Intent::CancelOrder, 0));
        assert!(!checker.allows(Intent::RequestRefund, 0));
    }
}
