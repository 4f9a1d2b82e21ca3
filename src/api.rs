//! Client-facing endpoint that accepts search requests and queues them.

use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use crate::matching::PatientMatcher;
use crate::rabbitmq::ErrorKind;

pub const SEARCH_PATH: &str = "/api/v1/patients/search";
pub const ACCEPTED: &str = "Request accepted for processing";

pub fn router(matcher: Arc<PatientMatcher>) -> Router {
    Router::new()
        .route(SEARCH_PATH, post(request_search))
        .with_state(matcher)
}

/// The body is parsed here rather than by an extractor so that any malformed
/// request, whatever its content type, is answered with 400.
async fn request_search(State(matcher): State<Arc<PatientMatcher>>, body: Bytes) -> impl IntoResponse {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let client_id = match request.get("client_id").and_then(Value::as_str) {
        Some(client_id) if !client_id.trim().is_empty() => client_id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "`client_id` is required" })),
            )
        }
    };

    match matcher.publish_request_for_search_patients(client_id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!(ACCEPTED))),
        Err(e) => {
            error!(client_id, "Could not queue search request: {}", e);
            let status = match e.kind() {
                ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(json!({ "detail": "search could not be queued" })))
        }
    }
}
