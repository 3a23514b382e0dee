//! Routes heterogeneous serverless triggers (API Gateway requests, SNS
//! notifications, SQS messages, S3 changes, scheduled and direct
//! invocations) to registered business handlers through one dispatcher.
//!
//! Modules:
//! - [`route`]: handler registrations and per-trigger matching
//! - [`coerce`]: typed coercion of path/query params and bodies
//! - [`dispatcher`]: orchestration and failure containment
//! - [`response`]: content negotiation and envelope shaping
//! - [`notify`]: out-of-band fault notification
//! - [`logging`]: correlated, leveled logging
//! - [`api`]: local HTTP invocation harness

pub mod api;
pub mod coerce;
pub mod config;
pub mod correlation;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod notify;
pub mod response;
pub mod route;
pub mod types;

pub use config::DispatcherConfig;
pub use correlation::CorrelationContext;
pub use dispatcher::Dispatcher;
pub use error::{HandlerError, RouteTableError, TypedError};
pub use response::{ContentType, Reply};
pub use route::{ApiRequest, ApiRoute, Event, RouteTable};
pub use types::{ResponseEnvelope, TriggerEvent, TriggerKind};
