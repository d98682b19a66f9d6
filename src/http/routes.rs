//! Route handlers.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::extract::Payload;
use super::{AppError, AppState};
use crate::relay::channel::validate_name;
use crate::relay::payload::timestamp_now;
use crate::utils::RelayError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/notifications/publish", post(publish))
        .route("/api/notifications/chat", post(chat))
        .route("/api/notifications/order", post(order))
        .route("/api/notifications/system", post(system))
        .route("/api/notifications/channels", get(channels))
        .fallback(not_found)
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub channel: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user: Option<String>,
    pub message: Option<String>,
    pub room: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_id: Option<Value>,
    pub status: Option<String>,
    pub customer_id: Option<Value>,
    pub details: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SystemRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: Option<String>,
    pub severity: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatPayload {
    user: String,
    message: String,
    room: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    order_id: Value,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct SystemPayload {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    timestamp: String,
}

async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "PostgreSQL NOTIFY/LISTEN relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "websocket": format!("ws://<host>:{}{}", state.ws_port, state.ws_path),
            "api": {
                "publish": "POST /api/notifications/publish",
                "chat": "POST /api/notifications/chat",
                "order": "POST /api/notifications/order",
                "system": "POST /api/notifications/system",
                "channels": "GET /api/notifications/channels"
            }
        },
        "documentation": {
            "websocket": {
                "subscribe": { "type": "subscribe", "channel": "channel_name" },
                "unsubscribe": { "type": "unsubscribe", "channel": "channel_name" },
                "publish": { "type": "publish", "channel": "channel_name", "payload": {} },
                "list": { "type": "list" }
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> Response {
    match state.relay.health_check().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "timestamp": timestamp_now(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "database": "disconnected",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn publish(
    State(state): State<AppState>,
    Payload(request): Payload<PublishRequest>,
) -> Result<Json<Value>, AppError> {
    let channel = request
        .channel
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Channel is required".into()))?;
    validate_name(&channel).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let payload = request.payload.unwrap_or_else(|| json!({}));
    state
        .relay
        .publish(&channel, &payload)
        .await
        .map_err(|e| AppError::relay("Failed to publish notification", e))?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Notification published to {channel}"),
        "channel": channel,
        "payload": payload,
    })))
}

async fn chat(
    State(state): State<AppState>,
    Payload(request): Payload<ChatRequest>,
) -> Result<Json<Value>, AppError> {
    let (Some(user), Some(message)) = (non_empty(request.user), non_empty(request.message)) else {
        return Err(AppError::BadRequest("User and message are required".into()));
    };

    let payload = ChatPayload {
        user,
        message,
        room: non_empty(request.room).unwrap_or_else(|| "general".to_string()),
        timestamp: timestamp_now(),
    };
    let payload = publish_shaped(&state, "chat", &payload, "Failed to send chat message").await?;

    Ok(Json(json!({
        "success": true,
        "message": "Chat message sent",
        "payload": payload,
    })))
}

async fn order(
    State(state): State<AppState>,
    Payload(request): Payload<OrderRequest>,
) -> Result<Json<Value>, AppError> {
    let order_id = request.order_id.filter(is_present);
    let (Some(order_id), Some(status)) = (order_id, non_empty(request.status)) else {
        return Err(AppError::BadRequest("Order ID and status are required".into()));
    };

    let payload = OrderPayload {
        order_id,
        status,
        customer_id: request.customer_id,
        details: request.details,
        timestamp: timestamp_now(),
    };
    let payload = publish_shaped(&state, "orders", &payload, "Failed to send order update").await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order update sent",
        "payload": payload,
    })))
}

async fn system(
    State(state): State<AppState>,
    Payload(request): Payload<SystemRequest>,
) -> Result<Json<Value>, AppError> {
    let (Some(kind), Some(message)) = (non_empty(request.kind), non_empty(request.message)) else {
        return Err(AppError::BadRequest("Type and message are required".into()));
    };

    let payload = SystemPayload {
        kind,
        message,
        severity: non_empty(request.severity).unwrap_or_else(|| "info".to_string()),
        metadata: request.metadata,
        timestamp: timestamp_now(),
    };
    let payload =
        publish_shaped(&state, "system", &payload, "Failed to send system notification").await?;

    Ok(Json(json!({
        "success": true,
        "message": "System notification sent",
        "payload": payload,
    })))
}

async fn channels(State(state): State<AppState>) -> Json<Value> {
    let mut channels = state.relay.active_channels();
    channels.sort();
    Json(json!({
        "count": channels.len(),
        "channels": channels,
    }))
}

async fn not_found(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not Found", "path": uri.path() })),
    )
}

/// Publish a shaped payload to a fixed channel and return it as JSON.
async fn publish_shaped<T: Serialize>(
    state: &AppState,
    channel: &str,
    payload: &T,
    context: &'static str,
) -> Result<Value, AppError> {
    let payload = serde_json::to_value(payload).map_err(|e| AppError::relay(context, RelayError::from(e)))?;
    state
        .relay
        .publish(channel, &payload)
        .await
        .map_err(|e| AppError::relay(context, e))?;
    Ok(payload)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
