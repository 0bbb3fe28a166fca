//! Web server endpoints.
//!
//! The server exposes the log intake and a health check. Everything else responds with `404`.

use crate::service::ServiceState;

mod health_check;
mod logs;

/// Returns the router with all endpoints, bound to the given state.
pub fn routes(state: ServiceState) -> axum::Router {
    axum::Router::new()
        .route("/logs", logs::route())
        .route("/health", health_check::route())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use shuttle_common::{ManualClock, UnixTimestamp};
    use shuttle_config::Config;
    use shuttle_metrics::LogParser;
    use tower::ServiceExt;

    use crate::service::Components;
    use crate::testutils::{TestStore, TestUpstream};

    use super::*;

    const NOW: u64 = 1370554890;

    fn start() -> (ServiceState, Arc<TestStore>) {
        let store = Arc::new(TestStore::default());
        let components = Components {
            parser: Arc::new(LogParser),
            store: store.clone(),
            upstream: Arc::new(TestUpstream::default()),
            clock: Arc::new(ManualClock::new(UnixTimestamp::from_secs(NOW))),
        };

        (ServiceState::start(Arc::new(Config::default()), components), store)
    }

    fn post_logs(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_logs_query_auth() {
        shuttle_test::setup();
        let (state, store) = start();

        let request = post_logs(
            "/logs?auth=key-1&source=web.1&tags=env:prod",
            "measure#db.latency=20ms",
        );
        let response = routes(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(state.receiver().shutdown(Duration::from_secs(5)).await);

        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        let id = puts[0].id();
        assert_eq!(id.name(), "db.latency");
        assert_eq!(id.auth(), "key-1");
        assert_eq!(id.source(), "web.1");
        assert_eq!(id.units(), "ms");
        assert_eq!(id.time(), UnixTimestamp::from_secs(NOW).truncate(60));
        assert!(id.tags().contains("env:prod"));
    }

    #[tokio::test]
    async fn test_logs_header_auth() {
        shuttle_test::setup();
        let (state, store) = start();

        let request = Request::builder()
            .method("POST")
            .uri("/logs?auth=ignored")
            .header(header::AUTHORIZATION, "key-2")
            .body(Body::from("count#requests"))
            .unwrap();
        let response = routes(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(state.receiver().shutdown(Duration::from_secs(5)).await);
        assert_eq!(store.puts()[0].id().auth(), "key-2");
    }

    #[tokio::test]
    async fn test_logs_missing_auth() {
        shuttle_test::setup();
        let (state, store) = start();

        let response = routes(state.clone())
            .oneshot(post_logs("/logs", "count#requests"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(state.receiver().shutdown(Duration::from_secs(5)).await);
        assert!(store.puts().is_empty());
        assert_eq!(state.stats().snapshot().requests, 0);
    }

    #[tokio::test]
    async fn test_logs_during_shutdown() {
        shuttle_test::setup();
        let (state, _store) = start();
        assert!(state.receiver().shutdown(Duration::from_secs(5)).await);

        let response = routes(state.clone())
            .oneshot(post_logs("/logs?auth=key-1", "count#requests"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_check() {
        shuttle_test::setup();
        let (state, _store) = start();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = routes(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status, serde_json::json!({"is_healthy": true, "in_flight": 0}));

        assert!(state.receiver().shutdown(Duration::from_secs(5)).await);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = routes(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
