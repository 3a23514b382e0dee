//! Handler registrations and the per-trigger matching strategies.
//!
//! A [`RouteTable`] is assembled once at startup through
//! [`RouteTableBuilder`], which rejects duplicate registrations, and is then
//! shared read-only by every invocation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::coerce::{BodyShape, Params, Shape};
use crate::error::{HandlerError, RouteTableError, TypedError};
use crate::logging::InvocationLog;
use crate::response::{ContentType, Reply};
use crate::types::{S3Event, SqsEvent};

/// Request body as seen by an API handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBody {
    pub raw: String,
    /// Set when the route declared a body shape and the content is JSON.
    pub json: Option<Value>,
    /// Set when the route declared a body shape and the content is binary.
    pub binary: Option<Vec<u8>>,
}

impl RequestBody {
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, TypedError> {
        let value = self
            .json
            .as_ref()
            .ok_or_else(|| TypedError::bad_request("request body is missing", None))?;
        T::deserialize(value).map_err(|err| {
            TypedError::bad_request(format!("body unmarshal failed : {err}"), None)
        })
    }
}

pub struct ApiRequest {
    pub headers: HashMap<String, String>,
    pub path_params: Params,
    pub query_params: Params,
    pub body: RequestBody,
    pub content_type: ContentType,
    pub log: InvocationLog,
}

/// Payload plus the invocation's logger, handed to non-API handlers.
pub struct Event<T> {
    pub payload: T,
    pub log: InvocationLog,
}

pub type ApiHandlerFn = Arc<dyn Fn(ApiRequest) -> BoxFuture<'static, Result<Reply, HandlerError>> + Send + Sync>;
pub type EventHandlerFn<T> = Arc<dyn Fn(Event<T>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub type ActionHandlerFn = Arc<dyn Fn(Event<Value>) -> BoxFuture<'static, Result<Reply, HandlerError>> + Send + Sync>;

pub fn event_handler<T, F, Fut>(f: F) -> EventHandlerFn<T>
where
    F: Fn(Event<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

pub fn action_handler<F, Fut>(f: F) -> ActionHandlerFn
where
    F: Fn(Event<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// A request/response registration with its optional declared shapes.
#[derive(Clone)]
pub struct ApiRoute {
    pub(crate) handler: ApiHandlerFn,
    pub(crate) path_shape: Option<Shape>,
    pub(crate) query_shape: Option<Shape>,
    pub(crate) body_shape: Option<BodyShape>,
}

impl ApiRoute {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |req| Box::pin(f(req))),
            path_shape: None,
            query_shape: None,
            body_shape: None,
        }
    }

    pub fn path_params(mut self, shape: Shape) -> Self {
        self.path_shape = Some(shape);
        self
    }

    pub fn query_params(mut self, shape: Shape) -> Self {
        self.query_shape = Some(shape);
        self
    }

    pub fn body(mut self, shape: BodyShape) -> Self {
        self.body_shape = Some(shape);
        self
    }
}

struct StorageRoute {
    prefix: String,
    handler: EventHandlerFn<S3Event>,
}

struct QueueRoute {
    name: String,
    handler: EventHandlerFn<SqsEvent>,
}

/// Immutable routing state.
pub struct RouteTable {
    stage: String,
    api: HashMap<String, HashMap<String, ApiRoute>>,
    topics: HashMap<String, HashMap<String, EventHandlerFn<Value>>>,
    queues: HashMap<String, QueueRoute>,
    // prefixes kept longest-first, registration order among equals
    storage: HashMap<String, HashMap<String, Vec<StorageRoute>>>,
    schedules: HashMap<String, ActionHandlerFn>,
    invocations: HashMap<String, ActionHandlerFn>,
}

impl RouteTable {
    pub fn builder(stage: impl Into<String>) -> RouteTableBuilder {
        RouteTableBuilder {
            table: RouteTable {
                stage: stage.into(),
                api: HashMap::new(),
                topics: HashMap::new(),
                queues: HashMap::new(),
                storage: HashMap::new(),
                schedules: HashMap::new(),
                invocations: HashMap::new(),
            },
            error: None,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn api(&self, resource: &str, method: &str) -> Result<&ApiRoute, TypedError> {
        self.api
            .get(resource)
            .and_then(|methods| methods.get(method))
            .ok_or_else(|| TypedError::not_found(format!("path not found {resource}, {method}"), None))
    }

    pub fn topic(&self, topic: &str, event: &str) -> Result<&EventHandlerFn<Value>, TypedError> {
        let events = self
            .topics
            .get(topic)
            .ok_or_else(|| TypedError::not_found(format!("topic {topic} not mapped"), None))?;
        events
            .get(event)
            .ok_or_else(|| TypedError::not_found(format!("event {topic} {event} is not mapped"), None))
    }

    /// Matches the last `:`-segment of the source ARN against
    /// `{stage}_{name}`, ignoring case.
    pub fn queue(&self, source_arn: &str) -> Result<&EventHandlerFn<SqsEvent>, TypedError> {
        let queue_name = source_arn.rsplit(':').next().unwrap_or_default();
        self.queues
            .get(&queue_name.to_lowercase())
            .map(|route| &route.handler)
            .ok_or_else(|| TypedError::not_found(format!("queue {queue_name} is not mapped"), None))
    }

    /// Longest registered prefix contained anywhere in the key wins.
    pub fn storage(
        &self,
        bucket: &str,
        change_type: &str,
        key: &str,
    ) -> Result<&EventHandlerFn<S3Event>, TypedError> {
        self.storage
            .get(bucket)
            .and_then(|changes| changes.get(change_type))
            .and_then(|routes| routes.iter().find(|route| key.contains(route.prefix.as_str())))
            .map(|route| &route.handler)
            .ok_or_else(|| {
                TypedError::not_found(
                    format!("unknown s3 path {bucket}/{key} for {change_type}"),
                    None,
                )
            })
    }

    pub fn schedule(&self, action: &str) -> Result<&ActionHandlerFn, TypedError> {
        self.schedules
            .get(action)
            .ok_or_else(|| TypedError::not_found(format!("action {action} is not mapped"), None))
    }

    pub fn invocation(&self, action: &str) -> Result<&ActionHandlerFn, TypedError> {
        self.invocations
            .get(action)
            .ok_or_else(|| TypedError::not_found(format!("action {action} is not mapped"), None))
    }

    /// Registered keys, logged when a lookup misses.
    pub fn describe(&self) -> Value {
        let mut api: Vec<String> = self
            .api
            .iter()
            .flat_map(|(resource, methods)| methods.keys().map(move |m| format!("{m} {resource}")))
            .collect();
        api.sort();
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .flat_map(|(topic, events)| events.keys().map(move |e| format!("{topic}/{e}")))
            .collect();
        topics.sort();
        let mut queues: Vec<&str> = self.queues.values().map(|q| q.name.as_str()).collect();
        queues.sort_unstable();
        let mut storage: Vec<String> = self
            .storage
            .iter()
            .flat_map(|(bucket, changes)| {
                changes.iter().flat_map(move |(change, routes)| {
                    routes.iter().map(move |r| format!("{bucket}/{change}/{}", r.prefix))
                })
            })
            .collect();
        storage.sort();
        let mut schedules: Vec<&String> = self.schedules.keys().collect();
        schedules.sort();
        let mut invocations: Vec<&String> = self.invocations.keys().collect();
        invocations.sort();
        json!({
            "api": api,
            "topics": topics,
            "queues": queues,
            "storage": storage,
            "schedules": schedules,
            "invocations": invocations,
        })
    }
}

pub struct RouteTableBuilder {
    table: RouteTable,
    error: Option<RouteTableError>,
}

impl RouteTableBuilder {
    fn fail(&mut self, err: RouteTableError) {
        self.error.get_or_insert(err);
    }

    pub fn api(mut self, resource: &str, method: &str, route: ApiRoute) -> Self {
        let methods = self.table.api.entry(resource.to_string()).or_default();
        if methods.contains_key(method) {
            self.fail(RouteTableError::DuplicateApi {
                resource: resource.to_string(),
                method: method.to_string(),
            });
        } else {
            methods.insert(method.to_string(), route);
        }
        self
    }

    pub fn topic(mut self, topic: &str, event: &str, handler: EventHandlerFn<Value>) -> Self {
        let events = self.table.topics.entry(topic.to_string()).or_default();
        if events.contains_key(event) {
            self.fail(RouteTableError::DuplicateTopic {
                topic: topic.to_string(),
                event: event.to_string(),
            });
        } else {
            events.insert(event.to_string(), handler);
        }
        self
    }

    pub fn queue(mut self, name: &str, handler: EventHandlerFn<SqsEvent>) -> Self {
        let key = format!("{}_{name}", self.table.stage).to_lowercase();
        if self.table.queues.contains_key(&key) {
            self.fail(RouteTableError::DuplicateQueue(name.to_string()));
        } else {
            let route = QueueRoute {
                name: name.to_string(),
                handler,
            };
            self.table.queues.insert(key, route);
        }
        self
    }

    pub fn storage(
        mut self,
        bucket: &str,
        change_type: &str,
        prefix: &str,
        handler: EventHandlerFn<S3Event>,
    ) -> Self {
        let routes = self
            .table
            .storage
            .entry(bucket.to_string())
            .or_default()
            .entry(change_type.to_string())
            .or_default();
        if routes.iter().any(|r| r.prefix == prefix) {
            self.fail(RouteTableError::DuplicateStorage {
                bucket: bucket.to_string(),
                change_type: change_type.to_string(),
                prefix: prefix.to_string(),
            });
        } else {
            routes.push(StorageRoute {
                prefix: prefix.to_string(),
                handler,
            });
            // stable, so equal lengths keep registration order
            routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        }
        self
    }

    pub fn schedule(mut self, action: &str, handler: ActionHandlerFn) -> Self {
        if self.table.schedules.contains_key(action) {
            self.fail(RouteTableError::DuplicateSchedule(action.to_string()));
        } else {
            self.table.schedules.insert(action.to_string(), handler);
        }
        self
    }

    pub fn invocation(mut self, action: &str, handler: ActionHandlerFn) -> Self {
        if self.table.invocations.contains_key(action) {
            self.fail(RouteTableError::DuplicateInvocation(action.to_string()));
        } else {
            self.table.invocations.insert(action.to_string(), handler);
        }
        self
    }

    pub fn build(self) -> Result<RouteTable, RouteTableError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::correlation::CorrelationContext;
    use crate::logging::{RecordingPrinter, Severity};

    use super::*;

    fn noop_s3() -> EventHandlerFn<S3Event> {
        event_handler(|_: Event<S3Event>| async { Ok(()) })
    }

    fn tagged_s3(tag: &'static str, hits: Arc<std::sync::Mutex<Vec<&'static str>>>) -> EventHandlerFn<S3Event> {
        event_handler(move |_: Event<S3Event>| {
            let hits = hits.clone();
            async move {
                hits.lock().unwrap().push(tag);
                Ok(())
            }
        })
    }

    fn test_log() -> InvocationLog {
        InvocationLog::new(
            CorrelationContext::generate("svc"),
            Severity::Info,
            Arc::new(RecordingPrinter::new()),
        )
    }

    #[test]
    fn test_api_exact_match() {
        let table = RouteTable::builder("dev")
            .api("/orders/{orderId}", "GET", ApiRoute::new(|_| async { Ok(Reply::empty(204)) }))
            .build()
            .unwrap();
        assert!(table.api("/orders/{orderId}", "GET").is_ok());
        let err = table.api("/orders/{orderId}", "POST").err().unwrap();
        assert_eq!(err.status_code(), 404);
        assert!(table.api("/orders/o-1", "GET").is_err());
    }

    #[test]
    fn test_topic_two_level_match() {
        let handler = event_handler(|_: Event<Value>| async { Ok(()) });
        let table = RouteTable::builder("dev")
            .topic("dev_PAYMENTS", "transaction.confirmed", handler)
            .build()
            .unwrap();
        assert!(table.topic("dev_PAYMENTS", "transaction.confirmed").is_ok());
        let missing_event = table.topic("dev_PAYMENTS", "transaction.rejected").err().unwrap();
        assert!(missing_event.message().contains("transaction.rejected"));
        let missing_topic = table.topic("other", "transaction.confirmed").err().unwrap();
        assert!(missing_topic.message().contains("topic other"));
    }

    #[test]
    fn test_queue_uses_stage_prefix_case_insensitively() {
        let table = RouteTable::builder("dev")
            .queue("ORDERS", event_handler(|_: Event<SqsEvent>| async { Ok(()) }))
            .build()
            .unwrap();
        assert!(table.queue("arn:aws:sqs:ap-south-1:123456789012:dev_orders").is_ok());
        assert!(table.queue("arn:aws:sqs:ap-south-1:123456789012:DEV_ORDERS").is_ok());
        assert!(table.queue("arn:aws:sqs:ap-south-1:123456789012:prod_orders").is_err());
        assert!(table.queue("").is_err());
    }

    #[tokio::test]
    async fn test_storage_prefix_contained_in_key() {
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let table = RouteTable::builder("dev")
            .storage("B", "Put", "/temp", tagged_s3("temp", hits.clone()))
            .storage("B", "Put", "/perm", tagged_s3("perm", hits.clone()))
            .build()
            .unwrap();
        let handler = table.storage("B", "Put", "foo/temp/bar.pdf").ok().unwrap();
        handler(Event {
            payload: S3Event::default(),
            log: test_log(),
        })
        .await
        .unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["temp"]);
        assert!(table.storage("B", "Delete", "foo/temp/bar.pdf").is_err());
        assert!(table.storage("C", "Put", "foo/temp/bar.pdf").is_err());
        assert!(table.storage("B", "Put", "foo/other/bar.pdf").is_err());
    }

    #[tokio::test]
    async fn test_storage_longest_prefix_wins() {
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let table = RouteTable::builder("dev")
            .storage("B", "Put", "/a", tagged_s3("short", hits.clone()))
            .storage("B", "Put", "/a/b", tagged_s3("long", hits.clone()))
            .storage("B", "Put", "", tagged_s3("any", hits.clone()))
            .build()
            .unwrap();
        for key in ["x/a/b/c", "x/a/c", "x/y"] {
            let handler = table.storage("B", "Put", key).ok().unwrap();
            handler(Event {
                payload: S3Event::default(),
                log: test_log(),
            })
            .await
            .unwrap();
        }
        assert_eq!(*hits.lock().unwrap(), vec!["long", "short", "any"]);
    }

    #[test]
    fn test_duplicates_fail_the_build() {
        let route = || ApiRoute::new(|_| async { Ok(Reply::empty(204)) });
        let err = RouteTable::builder("dev")
            .api("/a", "GET", route())
            .api("/a", "GET", route())
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            RouteTableError::DuplicateApi {
                resource: "/a".into(),
                method: "GET".into()
            }
        );

        let queue = || event_handler(|_: Event<SqsEvent>| async { Ok(()) });
        let err = RouteTable::builder("dev")
            .queue("orders", queue())
            .queue("ORDERS", queue())
            .build()
            .err()
            .unwrap();
        assert_eq!(err, RouteTableError::DuplicateQueue("ORDERS".into()));

        let err = RouteTable::builder("dev")
            .storage("B", "Put", "/t", noop_s3())
            .storage("B", "Put", "/t", noop_s3())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RouteTableError::DuplicateStorage { .. }));
    }

    #[tokio::test]
    async fn test_actions_resolve_by_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let table = RouteTable::builder("dev")
            .schedule(
                "NIGHTLY",
                action_handler(move |event: Event<Value>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Reply::ok(event.payload))
                    }
                }),
            )
            .invocation("RECALC", action_handler(|_| async { Ok(Reply::empty(204)) }))
            .build()
            .unwrap();
        let handler = table.schedule("NIGHTLY").ok().unwrap();
        let reply = handler(Event {
            payload: json!({"a": 1}),
            log: test_log(),
        })
        .await
        .unwrap();
        assert_eq!(reply, Reply::ok(json!({"a": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(table.schedule("RECALC").is_err());
        assert!(table.invocation("RECALC").is_ok());
    }

    #[test]
    fn test_describe_lists_registrations() {
        let table = RouteTable::builder("dev")
            .api("/a", "GET", ApiRoute::new(|_| async { Ok(Reply::empty(204)) }))
            .queue("orders", event_handler(|_: Event<SqsEvent>| async { Ok(()) }))
            .storage("B", "Put", "/t", noop_s3())
            .build()
            .unwrap();
        let summary = table.describe();
        assert_eq!(summary["api"], json!(["GET /a"]));
        assert_eq!(summary["queues"], json!(["orders"]));
        assert_eq!(summary["storage"], json!(["B/Put//t"]));
    }
}
