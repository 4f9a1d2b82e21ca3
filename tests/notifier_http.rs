use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

use patient_matching::notify::{
    self, ClientConnection, HttpMessageSender, MessageSender, NotificationRegistry, SocketHandle,
};
use patient_matching::Message;

fn notify_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/notify")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_notify_reaches_every_socket_of_the_client() {
    let registry = Arc::new(NotificationRegistry::new());
    let (first, mut first_rx) = SocketHandle::new();
    let (second, mut second_rx) = SocketHandle::new();
    let (other, mut other_rx) = SocketHandle::new();
    registry.connect("client-1", Arc::new(first));
    registry.connect("client-1", Arc::new(second));
    registry.connect("client-2", Arc::new(other));

    let response = notify::router(registry)
        .oneshot(notify_request(json!({ "target": "client-1", "body": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "delivered": 2, "pruned": 0 }));
    assert_eq!(first_rx.try_recv().unwrap(), "hello");
    assert_eq!(second_rx.try_recv().unwrap(), "hello");
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_notify_without_sockets_still_succeeds() {
    let registry = Arc::new(NotificationRegistry::new());

    let response = notify::router(registry.clone())
        .oneshot(notify_request(json!({ "target": "nobody", "body": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "delivered": 0, "pruned": 0 }));
    assert!(!registry.contains("nobody"));
}

#[tokio::test]
async fn test_closed_socket_is_pruned_on_notify() {
    let registry = Arc::new(NotificationRegistry::new());
    let (live, mut live_rx) = SocketHandle::new();
    let (closed, closed_rx) = SocketHandle::new();
    drop(closed_rx);
    registry.connect("client-1", Arc::new(live));
    registry.connect("client-1", Arc::new(closed));

    let response = notify::router(registry.clone())
        .oneshot(notify_request(json!({ "target": "client-1", "body": "hello" })))
        .await
        .unwrap();

    assert_eq!(json_body(response).await, json!({ "delivered": 1, "pruned": 1 }));
    assert_eq!(live_rx.try_recv().unwrap(), "hello");
    assert_eq!(registry.connection_count("client-1"), 1);
}

#[tokio::test]
async fn test_malformed_notify_is_rejected() {
    let registry = Arc::new(NotificationRegistry::new());
    let router = notify::router(registry);

    let response = router
        .clone()
        .oneshot(notify_request(json!({ "body": "hello" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(notify_request(json!({ "target": "client-1", "body": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unparseable_notify_is_a_bad_request() {
    let router = notify::router(Arc::new(NotificationRegistry::new()));

    let not_json = Request::builder()
        .method("POST")
        .uri("/api/v1/notify")
        .header("content-type", "application/json")
        .body(Body::from("target=client-1"))
        .unwrap();
    let response = router.clone().oneshot(not_json).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let empty = Request::builder()
        .method("POST")
        .uri("/api/v1/notify")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(empty).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_sender_delivers_through_the_bridge() {
    let registry = Arc::new(NotificationRegistry::new());
    let (socket, mut socket_rx) = SocketHandle::new();
    let socket_id = socket.id();
    registry.connect("client-1", Arc::new(socket));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = notify::router(registry.clone());
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let sender = HttpMessageSender::new(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
    sender
        .send(&Message::new("client-1", json!("Found 1 patient matching your symptoms")))
        .await
        .unwrap();

    assert_eq!(
        socket_rx.recv().await.unwrap(),
        "Found 1 patient matching your symptoms"
    );
    assert!(registry.disconnect("client-1", socket_id));
    server.abort();
}

#[tokio::test]
async fn test_websocket_connections_follow_the_socket_lifecycle() {
    let registry = Arc::new(NotificationRegistry::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = notify::router(registry.clone());
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let url = format!("ws://{}/ws/client-1", addr);
    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    let (mut second, _) = connect_async(url.as_str()).await.unwrap();
    assert!(wait_for(|| registry.connection_count("client-1") == 2).await);

    let report = registry.broadcast("client-1", "hello");
    assert_eq!(report.delivered, 2);
    assert_eq!(first.next().await.unwrap().unwrap(), WsMessage::Text("hello".into()));
    assert_eq!(second.next().await.unwrap().unwrap(), WsMessage::Text("hello".into()));

    drop(first);
    assert!(wait_for(|| registry.connection_count("client-1") == 1).await);

    second.close(None).await.unwrap();
    assert!(wait_for(|| !registry.contains("client-1")).await);

    server.abort();
}
