use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::registry::{ClientConnection, NotificationRegistry, SocketHandle};
use super::sender::NOTIFY_PATH;

#[derive(Clone)]
pub struct NotifierState {
    registry: Arc<NotificationRegistry>,
}

pub fn router(registry: Arc<NotificationRegistry>) -> Router {
    Router::new()
        .route(NOTIFY_PATH, post(notify))
        .route("/ws/:client_id", get(connect))
        .with_state(NotifierState { registry })
}

fn bad_request(detail: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
}

/// Bridge endpoint: fans the body out to every socket of `target`. Having no
/// sockets is still a success.
async fn notify(State(state): State<NotifierState>, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let target = match request.get("target").and_then(Value::as_str) {
        Some(target) if !target.trim().is_empty() => target,
        _ => return bad_request("`target` must be a non-empty string"),
    };
    let body = match request.get("body") {
        Some(Value::String(body)) => body.as_str(),
        _ => return bad_request("`body` must be a string"),
    };

    let report = state.registry.broadcast(target, body);
    (
        StatusCode::OK,
        Json(json!({ "delivered": report.delivered, "pruned": report.pruned })),
    )
        .into_response()
}

async fn connect(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<NotifierState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, client_id, state.registry))
}

async fn serve_socket(socket: WebSocket, client_id: String, registry: Arc<NotificationRegistry>) {
    let (handle, mut outbox) = SocketHandle::new();
    let connection_id = handle.id();
    registry.connect(&client_id, Arc::new(handle));
    info!(client_id = %client_id, connection_id = %connection_id, "Client connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if sink.send(WsMessage::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Text(text)) => debug!(client_id = %client_id, "Ignoring client frame: {}", text),
            Ok(_) => {}
            Err(e) => {
                warn!(client_id = %client_id, "Socket error: {}", e);
                break;
            }
        }
    }

    registry.disconnect(&client_id, connection_id);
    writer.abort();
    info!(client_id = %client_id, connection_id = %connection_id, "Client disconnected");
}
