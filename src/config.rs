//! Process-wide settings, read once from the environment at startup.

use std::str::FromStr;

use crate::logging::Severity;
use crate::types::TriggerKind;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deployment stage, prefixed onto queue registration keys.
    pub stage: String,
    pub service_name: String,
    pub log_level: Severity,
    /// Running inside Lambda (JSON log lines) rather than locally.
    pub is_lambda: bool,
    pub error_queue: Option<String>,
    pub error_topic: Option<String>,
    pub error_subject: String,
    pub trigger_kind: TriggerKind,
    pub listen_addr: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stage: String::new(),
            service_name: "eventgate".to_string(),
            log_level: Severity::Info,
            is_lambda: false,
            error_queue: None,
            error_topic: None,
            error_subject: "Lambda invocation failure".to_string(),
            trigger_kind: TriggerKind::Api,
            listen_addr: "127.0.0.1:9001".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("stage") {
            config.stage = v;
        }
        if let Some(v) = get("service_name") {
            config.service_name = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v
                .parse::<u8>()
                .ok()
                .and_then(Severity::from_number)
                .unwrap_or(Severity::Info);
        }
        config.is_lambda = get("AWS_LAMBDA_FUNCTION_NAME").is_some();
        config.error_queue = get("error_notification_queue");
        config.error_topic = get("error_notification_sns_topic");
        if let Some(v) = get("error_notification_subject") {
            config.error_subject = v;
        }
        if let Some(v) = get("TRIGGER_KIND") {
            match TriggerKind::from_str(&v) {
                Ok(kind) => config.trigger_kind = kind,
                Err(err) => log::warn!("{err}, falling back to {}", config.trigger_kind),
            }
        }
        if let Some(v) = get("LISTEN_ADDR") {
            config.listen_addr = v;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> DispatcherConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DispatcherConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.service_name, "eventgate");
        assert_eq!(config.log_level, Severity::Info);
        assert_eq!(config.trigger_kind, TriggerKind::Api);
        assert!(!config.is_lambda);
        assert!(config.error_queue.is_none());
    }

    #[test]
    fn test_reads_environment_keys() {
        let config = config_from(&[
            ("stage", "dev"),
            ("service_name", "orders"),
            ("LOG_LEVEL", "7"),
            ("AWS_LAMBDA_FUNCTION_NAME", "orders-api"),
            ("error_notification_queue", "errors"),
            ("error_notification_sns_topic", "arn:aws:sns:us-east-1:1:errors"),
            ("TRIGGER_KIND", "sqs"),
        ]);
        assert_eq!(config.stage, "dev");
        assert_eq!(config.service_name, "orders");
        assert_eq!(config.log_level, Severity::Debug);
        assert!(config.is_lambda);
        assert_eq!(config.error_queue.as_deref(), Some("errors"));
        assert_eq!(config.trigger_kind, TriggerKind::Queue);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config_from(&[("LOG_LEVEL", "loud"), ("TRIGGER_KIND", "ftp"), ("service_name", "")]);
        assert_eq!(config.log_level, Severity::Info);
        assert_eq!(config.trigger_kind, TriggerKind::Api);
        assert_eq!(config.service_name, "eventgate");
    }
}
