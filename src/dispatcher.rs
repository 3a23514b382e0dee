//! The single orchestration point per trigger event.
//!
//! Every entry point follows the same path: build the correlation context,
//! resolve a route, coerce inputs, run the handler, shape the envelope.
//! The whole path runs inside one failure-containment boundary; panics and
//! [`HandlerError::Fault`]s become a generic 500 plus one out-of-band
//! notification, while [`TypedError`]s are reported with their own status.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Once};

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::coerce::{Params, coerce_params, decode_binary_body, parse_body};
use crate::config::DispatcherConfig;
use crate::correlation::CorrelationContext;
use crate::error::{HandlerError, TypedError};
use crate::logging::{CloudWatchPrinter, InvocationLog, LocalPrinter, LogPrinter, Severity};
use crate::notify::{ErrorNotifier, FailureNotice, FailureNotifier};
use crate::response::{
    ContentType, REDACTED, REDUCED, Reply, encode_reply, error_envelope, fault_envelope,
};
use crate::route::{ApiRequest, Event, RequestBody, RouteTable};
use crate::types::{
    ApiGatewayRequest, CronEvent, InvocationEvent, ResponseEnvelope, S3Event, SnsEvent, SqsEvent,
    TriggerEvent,
};

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Received = 0,
    Routing = 1,
    ParameterCoercion = 2,
    HandlerExecution = 3,
    ResponseShaping = 4,
    Complete = 5,
    Faulted = 6,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Routing,
            2 => Self::ParameterCoercion,
            3 => Self::HandlerExecution,
            4 => Self::ResponseShaping,
            5 => Self::Complete,
            6 => Self::Faulted,
            _ => Self::Received,
        }
    }
}

/// Survives an unwind so a fault can report where it happened.
#[derive(Debug)]
struct PhaseTracker(AtomicU8);

impl PhaseTracker {
    fn new() -> Self {
        Self(AtomicU8::new(Phase::Received as u8))
    }

    fn enter(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Relaxed);
    }

    fn current(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Relaxed))
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook that records the backtrace of the panicking thread
/// while its frames are still on the stack. Installed once per process.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            // thread-locals may already be gone when a thread panics on exit
            let _ = PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

// a panic and the catch_unwind that stops it run on the same thread
fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Request copy safe for info-level logs.
fn reduced_request(request: &ApiGatewayRequest, reduce_body: bool) -> ApiGatewayRequest {
    let mut reduced = request.clone();
    reduced.request_context = Value::Null;
    if reduce_body {
        reduced.body = REDUCED.to_string();
    }
    for (name, value) in reduced.headers.iter_mut() {
        if name.eq_ignore_ascii_case("authorization") {
            *value = REDUCED.to_string();
        }
    }
    for (name, values) in reduced.multi_value_headers.iter_mut() {
        if name.eq_ignore_ascii_case("authorization") {
            *values = vec![REDUCED.to_string()];
        }
    }
    reduced
}

fn first_record<T>(records: &[T]) -> Result<&T, TypedError> {
    records
        .first()
        .ok_or_else(|| TypedError::bad_request("event carries no records", None))
}

pub struct Dispatcher {
    routes: Arc<RouteTable>,
    notifier: Arc<dyn FailureNotifier>,
    printer: Arc<dyn LogPrinter>,
    service_name: String,
    log_level: Severity,
}

impl Dispatcher {
    pub fn new(
        config: &DispatcherConfig,
        routes: Arc<RouteTable>,
        notifier: Arc<dyn FailureNotifier>,
        printer: Arc<dyn LogPrinter>,
    ) -> Self {
        install_panic_hook();
        Self {
            routes,
            notifier,
            printer,
            service_name: config.service_name.clone(),
            log_level: config.log_level,
        }
    }

    /// Composition root: printer and notifier follow the config.
    pub fn from_config(config: &DispatcherConfig, routes: RouteTable) -> Self {
        let printer: Arc<dyn LogPrinter> = if config.is_lambda {
            Arc::new(CloudWatchPrinter)
        } else {
            Arc::new(LocalPrinter)
        };
        let notifier = Arc::new(ErrorNotifier::from_config(config));
        Self::new(config, Arc::new(routes), notifier, printer)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    fn invocation_log(&self, context: CorrelationContext) -> InvocationLog {
        InvocationLog::new(context, self.log_level, self.printer.clone())
    }

    pub async fn dispatch(&self, event: TriggerEvent) -> ResponseEnvelope {
        match event {
            TriggerEvent::Api(request) => self.handle_api(request).await,
            TriggerEvent::PubSub(event) => self.handle_pubsub(event).await,
            TriggerEvent::Queue(event) => self.handle_queue(event).await,
            TriggerEvent::Storage(event) => self.handle_storage(event).await,
            TriggerEvent::Scheduled(event) => self.handle_scheduled(event).await,
            TriggerEvent::Invocation(event) => self.handle_invocation(event).await,
        }
    }

    /// Runs `pipeline` inside the failure-containment boundary and maps
    /// every outcome to an envelope.
    async fn contain<F>(
        &self,
        kind: &str,
        log: &InvocationLog,
        request: &impl Serialize,
        phase: &PhaseTracker,
        pipeline: F,
    ) -> ResponseEnvelope
    where
        F: Future<Output = Result<ResponseEnvelope, HandlerError>>,
    {
        take_panic_trace();
        let outcome = AssertUnwindSafe(pipeline).catch_unwind().await;
        let envelope = match outcome {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(HandlerError::Declared(err))) => {
                phase.enter(Phase::ResponseShaping);
                log.error("Full Request", request);
                log.error(&format!("{kind} Error"), &err);
                error_envelope(&err)
            }
            Ok(Err(HandlerError::Fault(err))) => {
                let notice = FailureNotice::internal(format!("{err:#}"), format!("{err:?}"));
                self.fault(log, request, phase, notice).await
            }
            Err(payload) => {
                let trace = take_panic_trace()
                    .unwrap_or_else(|| Backtrace::force_capture().to_string());
                let notice = FailureNotice::internal(panic_message(payload.as_ref()), trace);
                self.fault(log, request, phase, notice).await
            }
        };
        phase.enter(Phase::Complete);
        envelope
    }

    async fn fault(
        &self,
        log: &InvocationLog,
        request: &impl Serialize,
        phase: &PhaseTracker,
        notice: FailureNotice,
    ) -> ResponseEnvelope {
        let faulted_in = phase.current();
        phase.enter(Phase::Faulted);
        log.error("Full Request", request);
        log.error("Panic Stack", &notice.stack_trace);
        log.error(
            "Panic Recovery",
            format!("{} (during {faulted_in:?})", notice.error_message),
        );
        let delivery = AssertUnwindSafe(self.notifier.notify(&notice, log))
            .catch_unwind()
            .await;
        if let Err(payload) = delivery {
            log.error("Error notification failed", panic_message(payload.as_ref()));
        }
        phase.enter(Phase::ResponseShaping);
        fault_envelope()
    }

    pub async fn handle_api(&self, request: ApiGatewayRequest) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::from_headers(
            &request.headers,
            &self.service_name,
        ));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &request);
        log.info("API Request", reduced_request(&request, true));

        let envelope = self
            .contain("API", &log, &request, &phase, self.run_api(&request, &log, &phase))
            .await;

        if envelope.is_success() {
            log.debug("Full Response", &envelope);
            let mut summary = envelope.clone();
            summary.body = REDACTED.to_string();
            log.info("Response", summary);
        } else {
            log.info("API Request", reduced_request(&request, false));
            log.info("Response", &envelope);
        }
        envelope
    }

    async fn run_api(
        &self,
        request: &ApiGatewayRequest,
        log: &InvocationLog,
        phase: &PhaseTracker,
    ) -> Result<ResponseEnvelope, HandlerError> {
        phase.enter(Phase::Routing);
        let route = self
            .routes
            .api(&request.resource, &request.http_method)
            .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;

        phase.enter(Phase::ParameterCoercion);
        let content_type = ContentType::from_headers(&request.headers)?;
        let path_params = match &route.path_shape {
            Some(shape) => coerce_params(shape, &request.path_parameters, None)?,
            None => Params::raw_single(&request.path_parameters),
        };
        let query_params = match &route.query_shape {
            Some(shape) => coerce_params(
                shape,
                &request.query_string_parameters,
                Some(&request.multi_value_query_string_parameters),
            )?,
            None => Params::raw_multi(
                &request.query_string_parameters,
                &request.multi_value_query_string_parameters,
            ),
        };
        let mut body = RequestBody {
            raw: request.body.clone(),
            ..RequestBody::default()
        };
        if let Some(shape) = &route.body_shape {
            if content_type.is_binary() {
                if !request.body.is_empty() {
                    body.binary = Some(decode_binary_body(&request.body)?);
                }
            } else {
                body.json = parse_body(shape, &request.body)?;
            }
        }

        phase.enter(Phase::HandlerExecution);
        let reply = (route.handler)(ApiRequest {
            headers: request.headers.clone(),
            path_params,
            query_params,
            body,
            content_type,
            log: log.clone(),
        })
        .await?;

        phase.enter(Phase::ResponseShaping);
        Ok(encode_reply(reply, content_type)?)
    }

    pub async fn handle_pubsub(&self, event: SnsEvent) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::generate(&self.service_name));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &event);
        let envelope = self
            .contain("SNS", &log, &event, &phase, async {
                phase.enter(Phase::Routing);
                let record = first_record(&event.records)?;
                let topic = record.sns.topic_arn.rsplit(':').next().unwrap_or_default();
                let payload: Value = serde_json::from_str(&record.sns.message).unwrap_or_else(|err| {
                    log.error("payload unmarshal failed", err.to_string());
                    Value::Null
                });
                let Some(event_name) = payload.get("event").and_then(Value::as_str) else {
                    log.error("event not found", &payload);
                    return Err(TypedError::bad_request("Unknown event structure", Some(payload.clone())).into());
                };
                log.info("Topic", topic);
                log.info("Event", event_name);
                log.info("Payload", &payload);
                let handler = self
                    .routes
                    .topic(topic, event_name)
                    .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;

                phase.enter(Phase::HandlerExecution);
                handler(Event {
                    payload: payload.clone(),
                    log: log.clone(),
                })
                .await?;
                phase.enter(Phase::ResponseShaping);
                Ok::<_, HandlerError>(ResponseEnvelope::no_content())
            })
            .await;
        log.info("Full Response", &envelope);
        envelope
    }

    pub async fn handle_queue(&self, event: SqsEvent) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::generate(&self.service_name));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &event);
        let envelope = self
            .contain("SQS Event", &log, &event, &phase, async {
                phase.enter(Phase::Routing);
                let record = first_record(&event.records)?;
                let handler = self
                    .routes
                    .queue(&record.event_source_arn)
                    .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;

                phase.enter(Phase::HandlerExecution);
                handler(Event {
                    payload: event.clone(),
                    log: log.clone(),
                })
                .await?;
                phase.enter(Phase::ResponseShaping);
                Ok::<_, HandlerError>(ResponseEnvelope::no_content())
            })
            .await;
        log.info("Full Response", &envelope);
        envelope
    }

    pub async fn handle_storage(&self, event: S3Event) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::generate(&self.service_name));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &event);
        let envelope = self
            .contain("S3 Event", &log, &event, &phase, async {
                phase.enter(Phase::Routing);
                let record = first_record(&event.records)?;
                let handler = self
                    .routes
                    .storage(&record.s3.bucket.name, &record.event_name, &record.s3.object.key)
                    .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;

                phase.enter(Phase::HandlerExecution);
                handler(Event {
                    payload: event.clone(),
                    log: log.clone(),
                })
                .await?;
                phase.enter(Phase::ResponseShaping);
                Ok::<_, HandlerError>(ResponseEnvelope::no_content())
            })
            .await;
        log.info("Full Response", &envelope);
        envelope
    }

    pub async fn handle_scheduled(&self, event: CronEvent) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::generate(&self.service_name));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &event);
        let envelope = self
            .contain("Cron", &log, &event, &phase, async {
                phase.enter(Phase::Routing);
                let handler = self
                    .routes
                    .schedule(&event.action_name)
                    .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;
                phase.enter(Phase::HandlerExecution);
                let reply = handler(Event {
                    payload: event.payload.clone(),
                    log: log.clone(),
                })
                .await?;
                phase.enter(Phase::ResponseShaping);
                Ok::<_, HandlerError>(encode_reply(reply, ContentType::Json)?)
            })
            .await;
        log.info("Response", &envelope);
        envelope
    }

    pub async fn handle_invocation(&self, event: InvocationEvent) -> ResponseEnvelope {
        let log = self.invocation_log(CorrelationContext::generate(&self.service_name));
        let phase = PhaseTracker::new();
        log.debug("Full Request", &event);
        let envelope = self
            .contain("Lambda Invocation", &log, &event, &phase, async {
                phase.enter(Phase::Routing);
                let handler = self
                    .routes
                    .invocation(&event.action_name)
                    .inspect_err(|err| log.alert(err.message(), self.routes.describe()))?;
                phase.enter(Phase::HandlerExecution);
                let reply: Reply = handler(Event {
                    payload: event.payload.clone(),
                    log: log.clone(),
                })
                .await?;
                phase.enter(Phase::ResponseShaping);
                Ok::<_, HandlerError>(encode_reply(reply, ContentType::Json)?)
            })
            .await;
        log.info("Response", &envelope);
        envelope
    }
}
