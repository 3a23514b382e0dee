//! Error types shared by routing, coercion and dispatch.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A deliberately raised failure carrying its own HTTP status.
///
/// Serialized as `{"errorCode", "errorMessage", "errorData"}`; the status is
/// transported by the response envelope instead of the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedError {
    #[serde(skip)]
    status_code: u16,
    #[serde(rename = "errorCode")]
    code: String,
    #[serde(rename = "errorMessage")]
    message: String,
    #[serde(rename = "errorData")]
    data: Option<Value>,
}

impl TypedError {
    pub fn new(
        status_code: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let status_code = if (100..=599).contains(&status_code) {
            status_code
        } else {
            500
        };
        Self {
            status_code,
            code: code.into(),
            message: message.into(),
            data,
        }
    }

    pub fn bad_request(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(400, "BAD_REQUEST", message, data)
    }

    pub fn not_found(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(404, "NOT_FOUND", message, data)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(415, "UNSUPPORTED_MEDIA_TYPE", message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_ERROR", message, None)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The `{"error": {...}}` document returned to callers.
    pub fn to_body(&self) -> String {
        serde_json::json!({ "error": self }).to_string()
    }
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status_code, self.message)
    }
}

impl std::error::Error for TypedError {}

/// What a business handler may fail with.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Reported to the caller with its own status.
    #[error(transparent)]
    Declared(#[from] TypedError),

    /// Contained, reported out of band, and hidden behind a generic 500.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

/// Registration problems detected while building a route table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteTableError {
    #[error("duplicate api route {method} {resource}")]
    DuplicateApi { resource: String, method: String },

    #[error("duplicate topic route {topic}/{event}")]
    DuplicateTopic { topic: String, event: String },

    #[error("duplicate queue route {0}")]
    DuplicateQueue(String),

    #[error("duplicate storage route {bucket}/{change_type}/{prefix}")]
    DuplicateStorage {
        bucket: String,
        change_type: String,
        prefix: String,
    },

    #[error("duplicate scheduled action {0}")]
    DuplicateSchedule(String),

    #[error("duplicate invocation action {0}")]
    DuplicateInvocation(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_body_wraps_error_fields() {
        let err = TypedError::not_found("path not found /orders, GET", Some(json!({"a": 1})));
        let body: Value = serde_json::from_str(&err.to_body()).unwrap();
        assert_eq!(
            body,
            json!({"error": {
                "errorCode": "NOT_FOUND",
                "errorMessage": "path not found /orders, GET",
                "errorData": {"a": 1}
            }})
        );
    }

    #[test]
    fn test_invalid_status_is_clamped() {
        assert_eq!(TypedError::new(42, "X", "bad", None).status_code(), 500);
        assert_eq!(TypedError::new(700, "X", "bad", None).status_code(), 500);
        assert_eq!(TypedError::new(409, "CONFLICT", "dup", None).status_code(), 409);
        let internal = TypedError::internal("db down");
        assert_eq!((internal.status_code(), internal.code()), (500, "INTERNAL_ERROR"));
        assert!(internal.data().is_none());
    }

    #[test]
    fn test_handler_error_conversions() {
        let declared: HandlerError = TypedError::bad_request("nope", None).into();
        assert!(matches!(declared, HandlerError::Declared(_)));
        let fault: HandlerError = anyhow::anyhow!("boom").into();
        assert!(matches!(fault, HandlerError::Fault(_)));
    }
}
