//! Capability registry and the reference lookup capabilities.
//!
//! A capability is the only place real data enters a turn. Each one declares
//! its required parameters, and redaction happens inside the capability
//! before the result is returned: credential-class fields never leave it and
//! contact fields leave masked. The registry normalizes the failure surface
//! so the orchestrator only ever sees typed results or infrastructure
//! errors.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use concierge_core::{AgentError, CapabilityResult, ExecutionContext, Intent};

pub const CODE_UNSUPPORTED: &str = "UNSUPPORTED_OPERATION";
pub const CODE_INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const CODE_EXECUTE_ERROR: &str = "EXECUTE_ERROR";
pub const CODE_PERMISSION_DENIED: &str = "PERMISSION_DENIED";

/// Fields a result may carry at most. Anything past the cap is dropped.
const MAX_RESULT_FIELDS: usize = 16;

/// Field names that never leave a capability, regardless of value.
const DROPPED_FIELDS: [&str; 3] = ["password", "id_card", "bank_card"];

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;
    fn required_params(&self) -> &'static [&'static str];
    async fn execute(
        &self,
        context: &ExecutionContext,
        params: &BTreeMap<String, String>,
    ) -> Result<CapabilityResult, AgentError>;
}

/// Which capability serves an intent. Intents with no entry here are
/// unsupported operations even when classification succeeds.
pub fn capability_name_for(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::QueryOrderStatus => Some("order_lookup"),
        Intent::QueryLogistics => Some("logistics_lookup"),
        Intent::QueryAccount => Some("account_lookup"),
        Intent::Consultation => Some("knowledge_search"),
        _ => None,
    }
}

pub struct CapabilityRegistry {
    capabilities: HashMap<&'static str, Box<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self { capabilities: HashMap::new() }
    }

    /// The standard set: order, logistics and account lookups.
    /// `knowledge_search` is referenced by the intent map but has no
    /// implementation yet, so consultation turns take the unsupported path.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(OrderLookupCapability::with_seed_data());
        registry.register(LogisticsLookupCapability::with_seed_data());
        registry.register(AccountLookupCapability::with_seed_data());
        registry
    }

    pub fn register<C>(&mut self, capability: C)
    where
        C: Capability + 'static,
    {
        self.capabilities.insert(capability.name(), Box::new(capability));
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Runs the capability mapped to `intent`.
    ///
    /// Unsupported intents and missing parameters come back as typed
    /// failures, not errors. Timeouts and data-access faults propagate so
    /// the turn's error handling can decide between retry and handoff; any
    /// other execution fault is normalized to a generic `EXECUTE_ERROR`.
    pub async fn invoke(
        &self,
        intent: Intent,
        context: &ExecutionContext,
        params: &BTreeMap<String, String>,
    ) -> Result<CapabilityResult, AgentError> {
        let Some(name) = capability_name_for(intent) else {
            return Ok(CapabilityResult::fail(
                intent.code(),
                CODE_UNSUPPORTED,
                "this operation is not available yet",
            ));
        };
        let Some(capability) = self.capabilities.get(name) else {
            return Ok(CapabilityResult::fail(
                name,
                CODE_UNSUPPORTED,
                "this operation is not available yet",
            ));
        };

        for required in capability.required_params() {
            // A blank value is as useless to the capability as an absent one.
            if !params.get(*required).is_some_and(|value| !value.trim().is_empty()) {
                return Ok(CapabilityResult::fail(
                    name,
                    CODE_INVALID_PARAMS,
                    format!("missing parameter `{required}`"),
                ));
            }
        }

        let started = Instant::now();
        let outcome = capability.execute(context, params).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut result) => {
                result.latency_ms = latency_ms;
                info!(
                    event_name = "capability.executed",
                    capability = name,
                    trace_id = %context.trace_id,
                    success = result.success,
                    latency_ms,
                    "capability executed"
                );
                Ok(result)
            }
            Err(error @ (AgentError::Timeout(_) | AgentError::DataAccess(_))) => Err(error),
            Err(error) => {
                warn!(
                    event_name = "capability.execute_error",
                    capability = name,
                    trace_id = %context.trace_id,
                    error = %error,
                    "capability fault normalized"
                );
                let mut result = CapabilityResult::fail(
                    name,
                    CODE_EXECUTE_ERROR,
                    "the operation could not be completed",
                );
                result.latency_ms = latency_ms;
                Ok(result)
            }
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Masks a phone number to first three and last four digits.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    if digits.len() < 7 {
        return "****".to_string();
    }
    let head: String = digits[..3].iter().collect();
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// Keeps only a short address prefix.
pub fn mask_address(address: &str) -> String {
    let prefix: String = address.chars().take(10).collect();
    if prefix.chars().count() < address.chars().count() {
        format!("{prefix}...")
    } else {
        prefix
    }
}

/// Applies the outbound policy to a raw record: credential fields dropped,
/// contact fields masked, field count capped.
fn redact_record(raw: BTreeMap<String, String>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter(|(name, _)| !DROPPED_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| {
            let value = if name.ends_with("phone") {
                mask_phone(&value)
            } else if name.ends_with("address") {
                mask_address(&value)
            } else {
                value
            };
            (name, value)
        })
        .take(MAX_RESULT_FIELDS)
        .collect()
}

struct OrderRecord {
    owner: &'static str,
    fields: Vec<(&'static str, &'static str)>,
}

/// Order directory lookup. In-process seed data stands in for the order
/// store; the redaction and ownership rules are the real contract.
pub struct OrderLookupCapability {
    orders: HashMap<&'static str, OrderRecord>,
}

impl OrderLookupCapability {
    pub fn with_seed_data() -> Self {
        let mut orders = HashMap::new();
        orders.insert(
            "ORD-2026-001234",
            OrderRecord {
                owner: "u-1001",
                fields: vec![
                    ("order_id", "ORD-2026-001234"),
                    ("order_status", "shipped"),
                    ("order_amount", "129.00"),
                    ("create_time", "2026-08-01 10:15:00"),
                    ("update_time", "2026-08-03 08:40:00"),
                    ("product_name", "Trail Running Shoes"),
                    ("receiver_name", "J. Rivera"),
                    ("receiver_phone", "13812345678"),
                    ("receiver_address", "88 Harbor View Road, Building 2, Apt 1503"),
                    ("password", "hunter2"),
                ],
            },
        );
        orders.insert(
            "ORD-2026-005678",
            OrderRecord {
                owner: "u-1002",
                fields: vec![
                    ("order_id", "ORD-2026-005678"),
                    ("order_status", "processing"),
                    ("order_amount", "58.50"),
                    ("create_time", "2026-08-10 18:02:00"),
                    ("update_time", "2026-08-10 18:02:00"),
                    ("product_name", "Ceramic Pour-Over Set"),
                ],
            },
        );
        Self { orders }
    }
}

#[async_trait]
impl Capability for OrderLookupCapability {
    fn name(&self) -> &'static str {
        "order_lookup"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["order_id"]
    }

    async fn execute(
        &self,
        context: &ExecutionContext,
        params: &BTreeMap<String, String>,
    ) -> Result<CapabilityResult, AgentError> {
        let order_id = params.get("order_id").map(String::as_str).unwrap_or_default();
        let Some(record) = self.orders.get(order_id) else {
            return Ok(CapabilityResult::no_data(self.name()));
        };
        if record.owner != context.user_id {
            return Ok(CapabilityResult::fail(
                self.name(),
                CODE_PERMISSION_DENIED,
                "this order belongs to a different account",
            ));
        }

        let raw: BTreeMap<String, String> = record
            .fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Ok(CapabilityResult::ok(self.name(), redact_record(raw)))
    }
}

/// Shipment tracking lookup, keyed by order id.
pub struct LogisticsLookupCapability {
    shipments: HashMap<&'static str, Vec<(&'static str, &'static str)>>,
}

impl LogisticsLookupCapability {
    pub fn with_seed_data() -> Self {
        let mut shipments = HashMap::new();
        shipments.insert(
            "ORD-2026-001234",
            vec![
                ("order_id", "ORD-2026-001234"),
                ("logistics_status", "in transit"),
                ("current_location", "Regional sorting center, Oakdale"),
                ("estimate_arrival", "2026-08-05"),
            ],
        );
        Self { shipments }
    }
}

#[async_trait]
impl Capability for LogisticsLookupCapability {
    fn name(&self) -> &'static str {
        "logistics_lookup"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["order_id"]
    }

    async fn execute(
        &self,
        _context: &ExecutionContext,
        params: &BTreeMap<String, String>,
    ) -> Result<CapabilityResult, AgentError> {
        let order_id = params.get("order_id").map(String::as_str).unwrap_or_default();
        let Some(fields) = self.shipments.get(order_id) else {
            return Ok(CapabilityResult::no_data(self.name()));
        };
        let raw: BTreeMap<String, String> =
            fields.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
        Ok(CapabilityResult::ok(self.name(), redact_record(raw)))
    }
}

/// Account profile lookup, keyed by the authenticated user id.
pub struct AccountLookupCapability {
    accounts: HashMap<&'static str, Vec<(&'static str, &'static str)>>,
}

impl AccountLookupCapability {
    pub fn with_seed_data() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "u-1001",
            vec![
                ("account_id", "u-1001"),
                ("member_level", "gold"),
                ("registered_at", "2024-03-12"),
                ("phone", "13812345678"),
                ("password", "hunter2"),
            ],
        );
        Self { accounts }
    }
}

#[async_trait]
impl Capability for AccountLookupCapability {
    fn name(&self) -> &'static str {
        "account_lookup"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(
        &self,
        context: &ExecutionContext,
        _params: &BTreeMap<String, String>,
    ) -> Result<CapabilityResult, AgentError> {
        let Some(fields) = self.accounts.get(context.user_id.as_str()) else {
            return Ok(CapabilityResult::no_data(self.name()));
        };
        let raw: BTreeMap<String, String> =
            fields.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
        Ok(CapabilityResult::ok(self.name(), redact_record(raw)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use concierge_core::{AgentError, CapabilityResult, ExecutionContext, Intent};

    use super::{
        mask_address, mask_phone, Capability, CapabilityRegistry, CODE_INVALID_PARAMS,
        CODE_PERMISSION_DENIED, CODE_UNSUPPORTED,
    };

    fn context(user_id: &str) -> ExecutionContext {
        ExecutionContext {
            user_id: user_id.to_string(),
            session_id: "s-1".to_string(),
            trace_id: "t-1".to_string(),
            permission_level: 1,
        }
    }

    fn order_params(order_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("order_id".to_string(), order_id.to_string())])
    }

    #[test]
    fn phone_mask_keeps_first_three_and_last_four() {
        assert_eq!(mask_phone("13812345678"), "138****5678");
        assert_eq!(mask_phone("12345"), "****");
    }

    #[test]
    fn address_mask_keeps_a_short_prefix() {
        assert_eq!(mask_address("88 Harbor View Road, Building 2"), "88 Harbor ...");
        assert_eq!(mask_address("short"), "short");
    }

    #[tokio::test]
    async fn order_lookup_redacts_before_returning() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &order_params("ORD-2026-001234"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.data.get("receiver_phone").map(String::as_str),
            Some("138****5678")
        );
        assert_eq!(
            result.data.get("receiver_address").map(String::as_str),
            Some("88 Harbor ...")
        );
        assert!(!result.data.contains_key("password"));
        assert_eq!(result.data.get("order_status").map(String::as_str), Some("shipped"));
    }

    #[tokio::test]
    async fn foreign_order_is_denied() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-9999"), &order_params("ORD-2026-001234"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(CODE_PERMISSION_DENIED));
        assert!(result.data.is_empty());
    }

    #[tokio::test]
    async fn unknown_order_is_no_data_not_failure() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &order_params("ORD-2026-999999"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.has_data());
    }

    #[tokio::test]
    async fn missing_required_param_fails_before_execution() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &BTreeMap::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(CODE_INVALID_PARAMS));
    }

    #[tokio::test]
    async fn blank_required_param_fails_before_execution() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &order_params("   "))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(CODE_INVALID_PARAMS));
    }

    #[tokio::test]
    async fn consultation_maps_to_an_unregistered_capability() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::Consultation, &context("u-1001"), &BTreeMap::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(CODE_UNSUPPORTED));
    }

    #[tokio::test]
    async fn unmapped_intent_is_unsupported() {
        let registry = CapabilityRegistry::with_defaults();
        let result = registry
            .invoke(Intent::ModifyAccount, &context("u-1001"), &BTreeMap::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(CODE_UNSUPPORTED));
    }

    #[tokio::test]
    async fn data_access_faults_propagate_as_errors() {
        struct BrokenLookup;

        #[async_trait::async_trait]
        impl Capability for BrokenLookup {
            fn name(&self) -> &'static str {
                "order_lookup"
            }
            fn required_params(&self) -> &'static [&'static str] {
                &[]
            }
            async fn execute(
                &self,
                _context: &ExecutionContext,
                _params: &BTreeMap<String, String>,
            ) -> Result<CapabilityResult, AgentError> {
                Err(AgentError::DataAccess("order store unreachable".to_string()))
            }
        }

        let mut registry = CapabilityRegistry::new();
        registry.register(BrokenLookup);
        let outcome = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &BTreeMap::new())
            .await;
        assert!(matches!(outcome, Err(AgentError::DataAccess(_))));
    }

    #[tokio::test]
    async fn other_faults_normalize_to_execute_error() {
        struct FlakyLookup;

        #[async_trait::async_trait]
        impl Capability for FlakyLookup {
            fn name(&self) -> &'static str {
                "order_lookup"
            }
            fn required_params(&self) -> &'static [&'static str] {
                &[]
            }
            async fn execute(
                &self,
                _context: &ExecutionContext,
                _params: &BTreeMap<String, String>,
            ) -> Result<CapabilityResult, AgentError> {
                Err(AgentError::Internal("index out of bounds somewhere deep".to_string()))
            }
        }

        let mut registry = CapabilityRegistry::new();
        registry.register(FlakyLookup);
        let result = registry
            .invoke(Intent::QueryOrderStatus, &context("u-1001"), &BTreeMap::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(super::CODE_EXECUTE_ERROR));
        // The internal detail must not reach the user-facing message.
        assert!(!result.error_message.clone().unwrap_or_default().contains("index"));
    }
}
