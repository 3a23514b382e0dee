//! Content negotiation and response-envelope shaping.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::error::TypedError;
use crate::types::ResponseEnvelope;

/// Body returned for any contained fault; never carries fault details.
pub const GENERIC_FAULT_BODY: &str = r#"{"error": "Error occurred please try after some time, if persist contact technical support"}"#;

pub const REDACTED: &str = "<<<redacted>>>";
pub const REDUCED: &str = "<<<reduced>>>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Json,
    Protobuf,
}

impl ContentType {
    pub const JSON: &'static str = "application/json";
    pub const PROTOBUF: &'static str = "application/x-protobuf";

    pub fn parse(value: &str) -> Result<Self, TypedError> {
        let mime = value.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case(Self::JSON) {
            Ok(Self::Json)
        } else if mime.eq_ignore_ascii_case(Self::PROTOBUF) {
            Ok(Self::Protobuf)
        } else {
            Err(TypedError::unsupported_media_type(format!(
                "content type {value} is not supported"
            )))
        }
    }

    /// Reads `Content-Type` (any casing); JSON when absent.
    pub fn from_headers(headers: &HashMap<String, String>) -> Result<Self, TypedError> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map_or(Ok(Self::Json), |(_, v)| Self::parse(v))
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::Protobuf)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Binary(Vec<u8>),
    Empty,
}

/// A successful handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Body { status_code: u16, body: ResponseBody },
    /// Sent to the host unchanged.
    Raw(ResponseEnvelope),
}

impl Reply {
    pub fn json(status_code: u16, body: Value) -> Self {
        Self::Body {
            status_code,
            body: ResponseBody::Json(body),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn binary(status_code: u16, bytes: Vec<u8>) -> Self {
        Self::Body {
            status_code,
            body: ResponseBody::Binary(bytes),
        }
    }

    pub fn empty(status_code: u16) -> Self {
        Self::Body {
            status_code,
            body: ResponseBody::Empty,
        }
    }

    pub fn raw(envelope: ResponseEnvelope) -> Self {
        Self::Raw(envelope)
    }
}

fn encoding_error(message: &str) -> TypedError {
    TypedError::new(500, "RESPONSE_ENCODING", message, None)
}

/// Encodes a reply per the negotiated content type. JSON bodies are
/// serialized, binary bodies base64-encoded.
pub fn encode_reply(reply: Reply, content_type: ContentType) -> Result<ResponseEnvelope, TypedError> {
    let (status_code, body) = match reply {
        Reply::Raw(envelope) => return Ok(envelope),
        Reply::Body { status_code, body } => (status_code, body),
    };
    let mut envelope = ResponseEnvelope::new(status_code, "");
    match (body, content_type) {
        (ResponseBody::Empty, _) => {}
        (ResponseBody::Json(value), ContentType::Json) => {
            envelope.body = serde_json::to_string(&value)
                .map_err(|err| encoding_error(&format!("response processing failed : {err}")))?;
        }
        (ResponseBody::Binary(bytes), ContentType::Protobuf) => {
            envelope.body = STANDARD.encode(bytes);
            envelope.is_base64_encoded = true;
        }
        (ResponseBody::Binary(_), ContentType::Json) => {
            return Err(encoding_error("response processing failed : binary body for json content"));
        }
        (ResponseBody::Json(_), ContentType::Protobuf) => {
            return Err(encoding_error("response processing failed : expected bytes for binary content"));
        }
    }
    Ok(envelope)
}

pub fn error_envelope(err: &TypedError) -> ResponseEnvelope {
    ResponseEnvelope::new(err.status_code(), err.to_body())
}

pub fn fault_envelope() -> ResponseEnvelope {
    ResponseEnvelope::new(500, GENERIC_FAULT_BODY)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_content_type_negotiation() {
        assert_eq!(ContentType::from_headers(&HashMap::new()).unwrap(), ContentType::Json);
        let headers = HashMap::from([(
            "content-type".to_string(),
            "Application/JSON; charset=utf-8".to_string(),
        )]);
        assert_eq!(ContentType::from_headers(&headers).unwrap(), ContentType::Json);
        assert!(ContentType::parse("application/x-protobuf").unwrap().is_binary());
        let err = ContentType::parse("text/csv").unwrap_err();
        assert_eq!(err.status_code(), 415);
    }

    #[test]
    fn test_json_encoding() {
        let env = encode_reply(Reply::ok(json!({"a": "<b>"})), ContentType::Json).unwrap();
        assert_eq!(env.status_code, 200);
        assert_eq!(env.body, r#"{"a":"<b>"}"#);
        assert!(!env.is_base64_encoded);
    }

    #[test]
    fn test_binary_encoding() {
        let env = encode_reply(Reply::binary(200, vec![1, 2, 3]), ContentType::Protobuf).unwrap();
        assert_eq!(env.body, "AQID");
        assert!(env.is_base64_encoded);
    }

    #[test]
    fn test_mismatched_bodies_are_typed_errors() {
        let err = encode_reply(Reply::ok(json!(1)), ContentType::Protobuf).unwrap_err();
        assert_eq!((err.status_code(), err.code()), (500, "RESPONSE_ENCODING"));
        assert!(encode_reply(Reply::binary(200, vec![]), ContentType::Json).is_err());
    }

    #[test]
    fn test_raw_and_empty_replies() {
        let raw = ResponseEnvelope::new(302, "moved");
        assert_eq!(encode_reply(Reply::raw(raw.clone()), ContentType::Protobuf).unwrap(), raw);
        assert_eq!(encode_reply(Reply::empty(204), ContentType::Json).unwrap().body, "");
    }

    #[test]
    fn test_fault_envelope_is_generic() {
        let env = fault_envelope();
        assert_eq!(env.status_code, 500);
        let body: Value = serde_json::from_str(&env.body).unwrap();
        assert!(body["error"].is_string());
    }
}
