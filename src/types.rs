//! Wire shapes of the trigger events and of the response envelope.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// API Gateway sends `null` for empty maps and bodies.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The invocation entry point a trigger arrives through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Api,
    PubSub,
    Queue,
    Storage,
    Scheduled,
    Invocation,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::PubSub => "sns",
            Self::Queue => "sqs",
            Self::Storage => "s3",
            Self::Scheduled => "cron",
            Self::Invocation => "invoke",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trigger kind {0:?}")]
pub struct UnknownTriggerKind(pub String);

impl FromStr for TriggerKind {
    type Err = UnknownTriggerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "sns" => Ok(Self::PubSub),
            "sqs" => Ok(Self::Queue),
            "s3" => Ok(Self::Storage),
            "cron" => Ok(Self::Scheduled),
            "invoke" => Ok(Self::Invocation),
            _ => Err(UnknownTriggerKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub resource: String,
    #[serde(default, deserialize_with = "nullable")]
    pub path: String,
    #[serde(default, deserialize_with = "nullable")]
    pub http_method: String,
    #[serde(default, deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,
    #[serde(default, deserialize_with = "nullable")]
    pub multi_value_headers: HashMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub query_string_parameters: HashMap<String, String>,
    #[serde(default, deserialize_with = "nullable")]
    pub multi_value_query_string_parameters: HashMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub path_parameters: HashMap<String, String>,
    #[serde(default, deserialize_with = "nullable")]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: Value,
}

/// What the host environment receives back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl ResponseEnvelope {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn no_content() -> Self {
        Self::new(204, "")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnsEvent {
    #[serde(rename = "Records", default, deserialize_with = "nullable")]
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "EventSource", default)]
    pub event_source: String,
    #[serde(rename = "Sns")]
    pub sns: SnsMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default, deserialize_with = "nullable")]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records", default, deserialize_with = "nullable")]
    pub records: Vec<SqsMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub message_attributes: Value,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    #[serde(default)]
    pub aws_region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default, deserialize_with = "nullable")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub aws_region: String,
    #[serde(default)]
    pub event_time: String,
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
    #[serde(default)]
    pub arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub e_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronEvent {
    #[serde(default)]
    pub is_cron: bool,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    #[serde(default)]
    pub is_lambda_invocation: bool,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub payload: Value,
}

/// One inbound occurrence, tagged by the entry point it came through.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TriggerEvent {
    Api(ApiGatewayRequest),
    PubSub(SnsEvent),
    Queue(SqsEvent),
    Storage(S3Event),
    Scheduled(CronEvent),
    Invocation(InvocationEvent),
}

impl TriggerEvent {
    /// Decodes a raw payload; the kind comes from the entry point, never
    /// from the payload itself.
    pub fn from_value(kind: TriggerKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            TriggerKind::Api => Self::Api(serde_json::from_value(value)?),
            TriggerKind::PubSub => Self::PubSub(serde_json::from_value(value)?),
            TriggerKind::Queue => Self::Queue(serde_json::from_value(value)?),
            TriggerKind::Storage => Self::Storage(serde_json::from_value(value)?),
            TriggerKind::Scheduled => Self::Scheduled(serde_json::from_value(value)?),
            TriggerKind::Invocation => Self::Invocation(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Api(_) => TriggerKind::Api,
            Self::PubSub(_) => TriggerKind::PubSub,
            Self::Queue(_) => TriggerKind::Queue,
            Self::Storage(_) => TriggerKind::Storage,
            Self::Scheduled(_) => TriggerKind::Scheduled,
            Self::Invocation(_) => TriggerKind::Invocation,
        }
    }
}
