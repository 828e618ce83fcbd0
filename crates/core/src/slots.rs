use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::intent::Intent;

/// Order identifiers follow a fixed template, e.g. `ORD-2026-001234`.
pub const ORDER_ID_PATTERN: &str = r"^ORD-\d{4}-\d{6}$";

/// Static description of one parameter an intent needs before its
/// capability can run. Configuration data, never user data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    /// Optional format pattern; a value that fails it is discarded as
    /// missing, never corrected.
    pub pattern: Option<&'static str>,
}

impl SlotDefinition {
    /// Format validation. Pattern-less slots accept any non-blank value.
    pub fn accepts(&self, value: &str) -> bool {
        match self.pattern {
            None => !value.trim().is_empty(),
            Some(pattern) => compiled_patterns()
                .get(pattern)
                .is_some_and(|regex| regex.is_match(value)),
        }
    }
}

/// The per-intent slot tables. Intents absent here need no parameters.
pub fn slot_definitions(intent: Intent) -> &'static [SlotDefinition] {
    const ORDER_ID: SlotDefinition = SlotDefinition {
        name: "order_id",
        description: "order number, format ORD-XXXX-XXXXXX",
        required: true,
        pattern: Some(ORDER_ID_PATTERN),
    };

    match intent {
        Intent::QueryOrderStatus | Intent::QueryLogistics => &[ORDER_ID],
        Intent::CancelOrder => &[
            ORDER_ID,
            SlotDefinition {
                name: "reason",
                description: "why the order should be cancelled",
                required: false,
                pattern: None,
            },
        ],
        Intent::RequestRefund => &[
            ORDER_ID,
            SlotDefinition {
                name: "refund_reason",
                description: "why a refund is requested",
                required: true,
                pattern: None,
            },
        ],
        Intent::Complaint => &[
            SlotDefinition {
                name: "order_id",
                description: "order number, format ORD-XXXX-XXXXXX",
                required: false,
                pattern: Some(ORDER_ID_PATTERN),
            },
            SlotDefinition {
                name: "complaint_content",
                description: "what the complaint is about",
                required: true,
                pattern: None,
            },
        ],
        _ => &[],
    }
}

fn compiled_patterns() -> &'static HashMap<&'static str, Regex> {
    static PATTERNS: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = HashMap::new();
        for intent in Intent::ALL {
            for definition in slot_definitions(intent) {
                if let Some(pattern) = definition.pattern {
                    if let Ok(regex) = Regex::new(pattern) {
                        patterns.insert(pattern, regex);
                    }
                }
            }
        }
        patterns
    })
}

#[cfg(test)]
mod tests {
    use super::{slot_definitions, SlotDefinition, ORDER_ID_PATTERN};
    use crate::intent::Intent;

    #[test]
    fn order_status_requires_a_patterned_order_id() {
        let definitions = slot_definitions(Intent::QueryOrderStatus);
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "order_id");
        assert!(definitions[0].required);
        assert_eq!(definitions[0].pattern, Some(ORDER_ID_PATTERN));
    }

    #[test]
    fn refund_needs_order_id_and_reason() {
        let definitions = slot_definitions(Intent::RequestRefund);
        let required: Vec<&str> = definitions
            .iter()
            .filter(|definition| definition.required)
            .map(|definition| definition.name)
            .collect();
        assert_eq!(required, vec!["order_id", "refund_reason"]);
    }

    #[test]
    fn parameterless_intents_have_empty_tables() {
        assert!(slot_definitions(Intent::QueryAccount).is_empty());
        assert!(slot_definitions(Intent::Greeting).is_empty());
        assert!(slot_definitions(Intent::Consultation).is_empty());
        assert!(slot_definitions(Intent::Unknown).is_empty());
    }

    #[test]
    fn order_id_pattern_accepts_only_the_fixed_template() {
        let definition = slot_definitions(Intent::QueryOrderStatus)[0];
        assert!(definition.accepts("ORD-2026-001234"));
        assert!(!definition.accepts("ord-2026-001234"));
        assert!(!definition.accepts("ORD-26-1234"));
        assert!(!definition.accepts("ORD-2026-001234X"));
        assert!(!definition.accepts(""));
    }

    #[test]
    fn pattern_less_slots_reject_only_blanks() {
        let free_text = SlotDefinition {
            name: "refund_reason",
            description: "",
            required: true,
            pattern: None,
        };
        assert!(free_text.accepts("arrived broken"));
        assert!(!free_text.accepts("   "));
    }
}
