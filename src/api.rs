//! Local invocation harness: feeds raw trigger events to the dispatcher
//! over HTTP, the way the Lambda service would.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::types::{ResponseEnvelope, TriggerEvent, TriggerKind};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_message: String,
    pub error_type: String,
}

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

type Rejection = (StatusCode, Json<ErrorResponse>);

fn reject(error_type: &str, error_message: String) -> Rejection {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error_message,
            error_type: error_type.to_string(),
        }),
    )
}

// curl localhost:9001/invoke/cron --json '{"actionName": "NIGHTLY_REPORT"}'
pub async fn invoke(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(raw): Json<Value>,
) -> Result<Json<ResponseEnvelope>, Rejection> {
    let kind: TriggerKind = kind
        .parse()
        .map_err(|err: crate::types::UnknownTriggerKind| reject("UnknownTriggerKind", err.to_string()))?;
    let event = TriggerEvent::from_value(kind, raw)
        .map_err(|err| reject("InvalidEvent", format!("{kind} event: {err}")))?;
    log::debug!("invoking {} event", event.kind());
    Ok(Json(state.dispatcher.dispatch(event).await))
}

pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "OK".to_string(),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invoke/{kind}", post(invoke))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::demo;

    fn state() -> AppState {
        let config = DispatcherConfig {
            stage: "dev".into(),
            ..DispatcherConfig::default()
        };
        let routes = demo::routes(&config.stage).unwrap();
        AppState::new(Arc::new(Dispatcher::from_config(&config, routes)))
    }

    #[tokio::test]
    async fn test_invoke_dispatches_by_kind() {
        let Json(envelope) = invoke(
            State(state()),
            Path("cron".to_string()),
            Json(json!({"isCron": true, "actionName": "NIGHTLY_REPORT", "payload": {}})),
        )
        .await
        .unwrap();
        assert_eq!(envelope.status_code, 200);
        assert_eq!(envelope.body, r#"{"ACTION":"NIGHTLY_REPORT"}"#);
    }

    #[tokio::test]
    async fn test_invoke_rejects_unknown_kind() {
        let (status, Json(err)) = invoke(State(state()), Path("ftp".to_string()), Json(json!({})))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type, "UnknownTriggerKind");
    }

    #[tokio::test]
    async fn test_invoke_rejects_malformed_event() {
        let (status, Json(err)) = invoke(
            State(state()),
            Path("s3".to_string()),
            Json(json!({"Records": [{"eventName": 5}]})),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type, "InvalidEvent");
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await.0.status, "OK");
    }
}
