//! Out-of-band reporting of contained faults.
//!
//! A fault is fanned out to a queue channel and a topic channel. Delivery
//! problems are logged and swallowed; they never reach the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::DispatcherConfig;
use crate::logging::InvocationLog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureNotice {
    pub status_code: String,
    pub stack_trace: String,
    pub error_message: String,
}

impl FailureNotice {
    pub fn internal(error_message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self {
            status_code: "500".to_string(),
            stack_trace: stack_trace.into(),
            error_message: error_message.into(),
        }
    }
}

#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, notice: &FailureNotice, log: &InvocationLog);
}

/// A single delivery route (a queue, a topic).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, subject: &str, message: &str) -> anyhow::Result<()>;
}

pub struct ErrorNotifier {
    subject: String,
    queue: Option<Arc<dyn NotificationChannel>>,
    topic: Option<Arc<dyn NotificationChannel>>,
}

impl ErrorNotifier {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queue: None,
            topic: None,
        }
    }

    pub fn with_queue(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.queue = Some(channel);
        self
    }

    pub fn with_topic(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.topic = Some(channel);
        self
    }

    /// Wires the configured queue and topic to [`LogChannel`]s; deployments
    /// with real queue/topic clients pass their own channels instead.
    pub fn from_config(config: &DispatcherConfig) -> Self {
        let mut notifier = Self::new(config.error_subject.clone());
        if let Some(queue) = &config.error_queue {
            notifier = notifier.with_queue(Arc::new(LogChannel::new(queue.clone())));
        }
        if let Some(topic) = &config.error_topic {
            notifier = notifier.with_topic(Arc::new(LogChannel::new(topic.clone())));
        }
        notifier
    }

    async fn publish(
        &self,
        channel: Option<&Arc<dyn NotificationChannel>>,
        kind: &str,
        message: &str,
        log: &InvocationLog,
    ) {
        let Some(channel) = channel else {
            log.info(&format!("Error notification {kind} not configured"), ());
            return;
        };
        match channel.deliver(&self.subject, message).await {
            Ok(()) => log.info(
                &format!("Error notification pushed to {kind} {}", channel.name()),
                (),
            ),
            Err(err) => log.error(
                &format!("Error while pushing error notification to {kind} {}", channel.name()),
                format!("{err:#}"),
            ),
        }
    }
}

#[async_trait]
impl FailureNotifier for ErrorNotifier {
    async fn notify(&self, notice: &FailureNotice, log: &InvocationLog) {
        let message = match serde_json::to_string(notice) {
            Ok(message) => message,
            Err(err) => {
                log.error("Error notification could not be encoded", err.to_string());
                return;
            }
        };
        self.publish(self.queue.as_ref(), "queue", &message, log).await;
        self.publish(self.topic.as_ref(), "topic", &message, log).await;
    }
}

/// Writes notices to the process log under the `eventgate::notify` target.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, subject: &str, message: &str) -> anyhow::Result<()> {
        log::error!(target: "eventgate::notify", "[{}] {subject}: {message}", self.name);
        Ok(())
    }
}

/// Keeps delivered messages in memory.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    name: String,
    messages: Mutex<Vec<(String, String)>>,
}

impl InMemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub async fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, subject: &str, message: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .await
            .push((subject.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::correlation::CorrelationContext;
    use crate::logging::{RecordingPrinter, Severity};

    use super::*;

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _subject: &str, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("queue unreachable")
        }
    }

    fn test_log() -> (InvocationLog, Arc<RecordingPrinter>) {
        let printer = Arc::new(RecordingPrinter::new());
        let log = InvocationLog::new(CorrelationContext::generate("svc"), Severity::Debug, printer.clone());
        (log, printer)
    }

    #[tokio::test]
    async fn test_fans_out_to_both_channels() {
        let queue = Arc::new(InMemoryChannel::new("dev_errors"));
        let topic = Arc::new(InMemoryChannel::new("errors-topic"));
        let notifier = ErrorNotifier::new("Invocation failure")
            .with_queue(queue.clone())
            .with_topic(topic.clone());
        let (log, _) = test_log();

        notifier
            .notify(&FailureNotice::internal("index out of bounds", "trace"), &log)
            .await;

        let queued = queue.messages().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, "Invocation failure");
        let notice: FailureNotice = serde_json::from_str(&queued[0].1).unwrap();
        assert_eq!(notice.status_code, "500");
        assert_eq!(notice.error_message, "index out of bounds");
        assert_eq!(topic.messages().await, queued);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_logged_not_raised() {
        let topic = Arc::new(InMemoryChannel::new("errors-topic"));
        let notifier = ErrorNotifier::new("s")
            .with_queue(Arc::new(BrokenChannel))
            .with_topic(topic.clone());
        let (log, printer) = test_log();

        notifier.notify(&FailureNotice::internal("boom", ""), &log).await;

        assert_eq!(topic.messages().await.len(), 1);
        let failures: Vec<_> = printer
            .entries()
            .into_iter()
            .filter(|(entry, _)| entry.severity == Severity::Error)
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].0.message.contains("broken"));
    }

    #[tokio::test]
    async fn test_unconfigured_channels_are_skipped() {
        let (log, printer) = test_log();
        ErrorNotifier::from_config(&DispatcherConfig::default())
            .notify(&FailureNotice::internal("boom", ""), &log)
            .await;
        assert_eq!(
            printer.messages(),
            vec![
                "Error notification queue not configured",
                "Error notification topic not configured"
            ]
        );
    }
}
