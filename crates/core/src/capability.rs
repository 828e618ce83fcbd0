use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Caller identity and turn correlation passed to every capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_id: String,
    pub session_id: String,
    pub trace_id: String,
    pub permission_level: u8,
}

/// What a capability reports back, after redaction.
///
/// Data is an opaque string map by the time it leaves the capability;
/// credential-class fields are already gone and contact fields already
/// masked. Downstream stages (synthesis, templates) only ever see this
/// shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub success: bool,
    pub data: BTreeMap<String, String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Wall-clock execution time, filled in by the invoker.
    pub latency_ms: u64,
    /// Which capability produced this, for audit.
    pub provenance: String,
}

impl CapabilityResult {
    pub fn ok(provenance: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            success: true,
            data,
            error_code: None,
            error_message: None,
            latency_ms: 0,
            provenance: provenance.into(),
        }
    }

    pub fn fail(
        provenance: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: BTreeMap::new(),
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            latency_ms: 0,
            provenance: provenance.into(),
        }
    }

    /// Successful lookup that simply found nothing. Distinct from failure:
    /// the turn still reaches response generation.
    pub fn no_data(provenance: impl Into<String>) -> Self {
        Self {
            success: true,
            data: BTreeMap::new(),
            error_code: None,
            error_message: None,
            latency_ms: 0,
            provenance: provenance.into(),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}
