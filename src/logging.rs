//! Correlated, leveled logging on top of the `log` facade.
//!
//! Each invocation owns an [`InvocationLog`] bound to its
//! [`CorrelationContext`]; entries are rendered by a [`LogPrinter`] and then
//! emitted through `log`, so whichever logger the binary installed
//! (`env_logger` here) decides where the line goes.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::correlation::CorrelationContext;

/// Syslog severities, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    pub fn level(self) -> log::Level {
        match self {
            Self::Emergency | Self::Alert | Self::Critical | Self::Error => log::Level::Error,
            Self::Warning => log::Level::Warn,
            Self::Notice | Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub object: Value,
    pub timestamp: DateTime<Utc>,
}

pub trait LogPrinter: Send + Sync {
    fn print(&self, entry: &LogEntry, context: &CorrelationContext);
}

/// One JSON document per line, for CloudWatch ingestion.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudWatchPrinter;

impl CloudWatchPrinter {
    pub fn render(entry: &LogEntry, context: &CorrelationContext) -> Value {
        json!({
            "version": "1.1",
            "short_message": entry.message,
            "full_message": entry.object,
            "timestamp": entry.timestamp.timestamp(),
            "level": entry.severity as u8,
            "_log_level_name": entry.severity.name(),
            "_x_correlation_id": context.correlation_id,
            "_x_scenario_id": context.scenario_id,
            "_x_session_id": context.session_id,
            "_x_scenario_name": context.scenario_name,
            "_service_name": context.service_name,
        })
    }
}

impl LogPrinter for CloudWatchPrinter {
    fn print(&self, entry: &LogEntry, context: &CorrelationContext) {
        log::log!(entry.severity.level(), "{}", Self::render(entry, context));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPrinter;

impl LogPrinter for LocalPrinter {
    fn print(&self, entry: &LogEntry, context: &CorrelationContext) {
        log::log!(
            entry.severity.level(),
            "{} - {} - {} [{}]",
            entry.severity.name(),
            entry.message,
            entry.object,
            context.correlation_id
        );
    }
}

/// Keeps every entry in memory so tests can inspect what was emitted.
#[derive(Debug, Default)]
pub struct RecordingPrinter {
    entries: Mutex<Vec<(LogEntry, CorrelationContext)>>,
}

impl RecordingPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogEntry, CorrelationContext)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|(entry, _)| entry.message)
            .collect()
    }
}

impl LogPrinter for RecordingPrinter {
    fn print(&self, entry: &LogEntry, context: &CorrelationContext) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((entry.clone(), context.clone()));
        }
    }
}

/// A logger scoped to one invocation.
#[derive(Clone)]
pub struct InvocationLog {
    context: Arc<CorrelationContext>,
    threshold: Severity,
    printer: Arc<dyn LogPrinter>,
}

impl InvocationLog {
    pub fn new(context: CorrelationContext, threshold: Severity, printer: Arc<dyn LogPrinter>) -> Self {
        Self {
            context: Arc::new(context),
            threshold,
            printer,
        }
    }

    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity <= self.threshold
    }

    pub fn print(&self, severity: Severity, message: &str, object: impl Serialize) {
        if !self.enabled(severity) {
            return;
        }
        let object = serde_json::to_value(object)
            .unwrap_or_else(|err| Value::String(format!("unserializable log object: {err}")));
        let entry = LogEntry {
            severity,
            message: message.to_string(),
            object,
            timestamp: Utc::now(),
        };
        self.printer.print(&entry, &self.context);
    }

    pub fn debug(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Debug, message, object);
    }

    pub fn info(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Info, message, object);
    }

    pub fn notice(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Notice, message, object);
    }

    pub fn warning(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Warning, message, object);
    }

    pub fn error(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Error, message, object);
    }

    pub fn critical(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Critical, message, object);
    }

    pub fn alert(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Alert, message, object);
    }

    pub fn emergency(&self, message: &str, object: impl Serialize) {
        self.print(Severity::Emergency, message, object);
    }
}

/// Installs `env_logger`. Inside Lambda the printer already produced a
/// complete JSON line, so the record is written bare.
pub fn init_env_logger(is_lambda: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if is_lambda {
        builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    }
    // a second init (tests, embedded use) keeps the first logger
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(threshold: Severity) -> (InvocationLog, Arc<RecordingPrinter>) {
        let printer = Arc::new(RecordingPrinter::new());
        let ctx = CorrelationContext::generate("svc");
        (InvocationLog::new(ctx, threshold, printer.clone()), printer)
    }

    #[test]
    fn test_threshold_filters_verbose_entries() {
        let (log, printer) = log_with(Severity::Info);
        log.debug("hidden", ());
        log.info("shown", json!({"k": 1}));
        log.alert("also shown", ());
        assert_eq!(printer.messages(), vec!["shown", "also shown"]);
    }

    #[test]
    fn test_entries_carry_context() {
        let (log, printer) = log_with(Severity::Debug);
        log.debug("detail", "x");
        let (entry, ctx) = printer.entries().remove(0);
        assert_eq!(entry.object, json!("x"));
        assert_eq!(&ctx, log.context());
    }

    #[test]
    fn test_cloudwatch_render_fields() {
        let ctx = CorrelationContext::generate("svc");
        let entry = LogEntry {
            severity: Severity::Warning,
            message: "m".into(),
            object: json!(null),
            timestamp: Utc::now(),
        };
        let line = CloudWatchPrinter::render(&entry, &ctx);
        assert_eq!(line["level"], 4);
        assert_eq!(line["_log_level_name"], "WARNING");
        assert_eq!(line["_x_correlation_id"], json!(ctx.correlation_id));
        assert_eq!(line["_service_name"], "svc");
    }

    #[test]
    fn test_severity_ordering_and_mapping() {
        assert!(Severity::Emergency < Severity::Debug);
        assert_eq!(Severity::from_number(5), Some(Severity::Notice));
        assert_eq!(Severity::from_number(8), None);
        assert_eq!(Severity::Critical.level(), log::Level::Error);
        assert_eq!(Severity::Notice.level(), log::Level::Info);
    }
}
