//! A simple health check endpoint for the pipeline.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, get};
use serde::Serialize;

use crate::service::ServiceState;

#[derive(Serialize)]
struct Status {
    is_healthy: bool,
    in_flight: usize,
}

async fn handle(State(state): State<ServiceState>) -> impl IntoResponse {
    let receiver = state.receiver();
    let status = Status {
        is_healthy: !receiver.is_shutting_down(),
        in_flight: receiver.in_flight(),
    };

    let code = match status.is_healthy {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    };

    (code, axum::Json(status))
}

pub fn route() -> MethodRouter<ServiceState> {
    get(handle)
}
