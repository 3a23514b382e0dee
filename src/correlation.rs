//! Per-invocation correlation identifiers read from inbound headers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const SCENARIO_ID_HEADER: &str = "x-scenario-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SCENARIO_NAME_HEADER: &str = "x-scenario-name";

/// Identifiers attached to every log line of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    #[serde(rename = "x-correlation-id")]
    pub correlation_id: String,
    #[serde(rename = "x-scenario-id")]
    pub scenario_id: String,
    #[serde(rename = "x-session-id")]
    pub session_id: String,
    #[serde(rename = "x-scenario-name")]
    pub scenario_name: String,
    #[serde(rename = "x-service-name")]
    pub service_name: String,
}

impl CorrelationContext {
    /// Builds the context from inbound headers, generating a correlation id
    /// when none was sent. Header names are matched case-insensitively.
    pub fn from_headers(headers: &HashMap<String, String>, service_name: &str) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let correlation_id = match lookup(CORRELATION_ID_HEADER) {
            id if id.is_empty() => uuid::Uuid::new_v4().to_string(),
            id => id,
        };
        Self {
            correlation_id,
            scenario_id: lookup(SCENARIO_ID_HEADER),
            session_id: lookup(SESSION_ID_HEADER),
            scenario_name: lookup(SCENARIO_NAME_HEADER),
            service_name: service_name.to_string(),
        }
    }

    /// Context for triggers that carry no headers.
    pub fn generate(service_name: &str) -> Self {
        Self::from_headers(&HashMap::new(), service_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_id_when_absent() {
        let ctx = CorrelationContext::from_headers(&HashMap::new(), "orders");
        assert!(!ctx.correlation_id.is_empty());
        assert!(uuid::Uuid::parse_str(&ctx.correlation_id).is_ok());
        assert_eq!(ctx.service_name, "orders");
        assert!(ctx.scenario_id.is_empty());
    }

    #[test]
    fn test_preserves_inbound_ids() {
        let headers = HashMap::from([
            ("X-Correlation-Id".to_string(), "abc-123".to_string()),
            ("x-session-id".to_string(), "sess".to_string()),
            ("x-scenario-name".to_string(), "checkout".to_string()),
        ]);
        let ctx = CorrelationContext::from_headers(&headers, "orders");
        assert_eq!(ctx.correlation_id, "abc-123");
        assert_eq!(ctx.session_id, "sess");
        assert_eq!(ctx.scenario_name, "checkout");
    }

    #[test]
    fn test_empty_header_value_is_replaced() {
        let headers = HashMap::from([("x-correlation-id".to_string(), String::new())]);
        let ctx = CorrelationContext::from_headers(&headers, "orders");
        assert!(!ctx.correlation_id.is_empty());
    }

    #[test]
    fn test_each_generation_is_unique() {
        let a = CorrelationContext::generate("svc");
        let b = CorrelationContext::generate("svc");
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
