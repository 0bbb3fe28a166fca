//! Intake of l2met formatted log lines.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, post};
use shuttle_metrics::ParseOptions;

use crate::services::ReceiveError;
use crate::service::ServiceState;

/// Returns the credential token from the `Authorization` header, if present.
fn header_auth(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn handle(
    State(state): State<ServiceState>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let received_at = state.clock().now();
    let pairs = query.iter().map(|(key, value)| (key.as_str(), value.as_str()));
    let mut options = ParseOptions::from_query(pairs, received_at);

    if let Some(auth) = header_auth(&headers) {
        options.auth = auth.to_owned();
    }

    if options.auth.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing credentials");
    }

    match state.receiver().receive(body, options).await {
        Ok(()) => (StatusCode::ACCEPTED, ""),
        Err(ReceiveError::ShuttingDown) => (StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
        Err(error @ ReceiveError::Closed) => {
            shuttle_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to receive log payload"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

pub fn route() -> MethodRouter<ServiceState> {
    post(handle)
}
