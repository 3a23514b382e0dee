//! A small orders service wired through every trigger kind.
//!
//! Both binaries serve these routes, which makes them handy for trying the
//! dispatcher locally with `POST /invoke/{kind}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::coerce::{BodyShape, FieldType, Shape};
use crate::error::{RouteTableError, TypedError};
use crate::response::Reply;
use crate::route::{ApiRequest, ApiRoute, Event, RouteTable, action_handler, event_handler};
use crate::types::{S3Event, SqsEvent};

pub const ORDERS_BUCKET: &str = "orders-data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_id: String,
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPath {
    order_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderQuery {
    #[serde(default)]
    status: Vec<String>,
    limit: Option<i64>,
    #[serde(default)]
    expand: bool,
}

fn order_query_shape() -> Shape {
    Shape::new()
        .field("status", FieldType::StringList)
        .field("limit", FieldType::Int)
        .field("expand", FieldType::Bool)
}

async fn get_order(req: ApiRequest) -> Result<Reply, crate::HandlerError> {
    let path: OrderPath = req.path_params.parse()?;
    let query: OrderQuery = req.query_params.parse()?;
    req.log.info("PathParams", req.path_params.as_map());
    if path.order_id.is_empty() || path.order_id == "unknown" {
        return Err(TypedError::not_found(format!("order {} not found", path.order_id), None).into());
    }
    let mut order = json!({
        "orderId": path.order_id,
        "status": query.status.first().cloned().unwrap_or_else(|| "OPEN".to_string()),
        "limit": query.limit,
    });
    if query.expand {
        order["lines"] = json!([{ "sku": "SKU-1", "quantity": 1 }]);
    }
    Ok(Reply::ok(order))
}

async fn create_order(req: ApiRequest) -> Result<Reply, crate::HandlerError> {
    let order: NewOrder = req.body.parse()?;
    if order.quantity == 0 {
        return Err(TypedError::new(422, "INVALID_QUANTITY", "quantity must be positive", None).into());
    }
    req.log.info("Body", &order);
    Ok(Reply::json(
        201,
        json!({ "orderId": format!("ord_{}", uuid::Uuid::new_v4().simple()), "order": order }),
    ))
}

async fn order_receipt(req: ApiRequest) -> Result<Reply, crate::HandlerError> {
    let path: OrderPath = req.path_params.parse()?;
    Ok(Reply::binary(200, path.order_id.into_bytes()))
}

async fn transaction_event(event: Event<Value>) -> Result<(), crate::HandlerError> {
    event.log.info("Transaction", &event.payload);
    Ok(())
}

async fn order_message(event: Event<SqsEvent>) -> Result<(), crate::HandlerError> {
    for record in &event.payload.records {
        event.log.info("Order message", &record.body);
    }
    Ok(())
}

async fn document_uploaded(event: Event<S3Event>) -> Result<(), crate::HandlerError> {
    for record in &event.payload.records {
        event.log.info("Document uploaded", &record.s3.object.key);
    }
    Ok(())
}

async fn nightly_report(event: Event<Value>) -> Result<Reply, crate::HandlerError> {
    event.log.info("Nightly report", &event.payload);
    Ok(Reply::ok(json!({ "ACTION": "NIGHTLY_REPORT" })))
}

async fn recalculate(event: Event<Value>) -> Result<Reply, crate::HandlerError> {
    event.log.info("Recalculate", &event.payload);
    Ok(Reply::ok(json!({ "ACTION": "RECALCULATE", "payload": event.payload })))
}

/// Registers the orders service for the given deployment stage.
pub fn routes(stage: &str) -> Result<RouteTable, RouteTableError> {
    let order_path = Shape::new().field("orderId", FieldType::String);
    RouteTable::builder(stage)
        .api(
            "/orders/{orderId}",
            "GET",
            ApiRoute::new(get_order)
                .path_params(order_path.clone())
                .query_params(order_query_shape()),
        )
        .api(
            "/orders",
            "POST",
            ApiRoute::new(create_order).body(BodyShape::of::<NewOrder>()),
        )
        .api(
            "/orders/{orderId}/receipt",
            "GET",
            ApiRoute::new(order_receipt).path_params(order_path),
        )
        .topic(&format!("{stage}_PAYMENTS"), "transaction.confirmed", event_handler(transaction_event))
        .topic(&format!("{stage}_PAYMENTS"), "transaction.rejected", event_handler(transaction_event))
        .queue("ORDERS", event_handler(order_message))
        .storage(ORDERS_BUCKET, "ObjectCreated:Put", "/temp", event_handler(document_uploaded))
        .storage(ORDERS_BUCKET, "ObjectCreated:Put", "/perm", event_handler(document_uploaded))
        .schedule("NIGHTLY_REPORT", action_handler(nightly_report))
        .invocation("RECALCULATE", action_handler(recalculate))
        .build()
}
