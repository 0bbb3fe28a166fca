//! Helpers for testing the pipeline and its services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`shuttle_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - To test delivery over HTTP, spawn a [`MiniDatadog`] and point the outlet at its URL.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     shuttle_test::setup();
//!
//!     shuttle_log::debug!("hello, world!");
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    shuttle_log::init_test!();
}

/// A request received by [`MiniDatadog`].
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    /// The value of the `DD-API-KEY` header.
    pub api_key: Option<String>,
    /// The parsed JSON body, `Value::Null` if the body was not valid JSON.
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    failures: Arc<AtomicUsize>,
}

async fn series(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let api_key = headers
        .get("DD-API-KEY")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    state.requests.lock().push(CapturedRequest {
        api_key,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let failing = state
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::ACCEPTED
    }
}

/// A local stand-in for the Datadog series API.
///
/// Records every request and answers with `202 Accepted`, unless told to fail. The server stops
/// when this value is dropped.
pub struct MiniDatadog {
    addr: SocketAddr,
    state: MockState,
    handle: JoinHandle<()>,
}

impl MiniDatadog {
    /// The path of the series endpoint.
    pub const PATH: &'static str = "/api/v1/series";

    /// Binds to a free local port and starts serving.
    pub async fn spawn() -> Self {
        let state = MockState::default();
        let router = Router::new()
            .route(Self::PATH, post(series))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// The full URL of the series endpoint.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, Self::PATH)
    }

    /// Answers the next `count` requests with `503 Service Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().clone()
    }
}

impl Drop for MiniDatadog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
