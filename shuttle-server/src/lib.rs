//! The shuttle metrics pipeline server.
//!
//! This crate contains the [`run`] function which starts the HTTP intake together with both
//! halves of the pipeline. Log lines posted to `/logs` are parsed into measurements, aggregated
//! into time buckets, persisted to a store, and finally delivered to the Datadog series API in
//! batches grouped by credential token.
//!
//! # Pipeline
//!
//! ```text
//! POST /logs
//!     -> Receiver: accept workers -> register -> transfer -> persist workers
//!     -> Store
//!     -> Outlet: reader -> convert workers -> batcher -> delivery workers
//!     -> Upstream
//! ```
//!
//! The [`Receiver`](services::Receiver) admits measurements no older than `deadline` resolution
//! units and merges all measurements of the same bucket in memory, so the store receives at most
//! one write per bucket and flush. The [`Outlet`](services::Outlet) reads buckets from the store
//! once the deadline has passed for their window according to the store's clock, converts them into series, and
//! delivers them with a bounded number of retries.
//!
//! On shutdown, the receiver stops intake as soon as the signal arrives, so `/logs` and `/health`
//! respond with `503` while the HTTP server closes its connections. Afterwards the receiver drains
//! all received data into the store. Data already handed to the outlet is not drained.
#![warn(missing_docs)]

use std::sync::Arc;

use shuttle_config::Config;
use tokio::net::TcpListener;

mod endpoints;
mod service;
pub mod services;
mod stats;
mod statsd;
mod utils;

#[cfg(test)]
mod testutils;

pub use self::endpoints::routes;
pub use self::service::*;
pub use self::stats::*;

/// Runs the pipeline server.
///
/// This boots the entire server application and blocks the current thread until a shutdown
/// signal is received or a fatal error happens. Behavior of the server is determined by the
/// `config` passed into this function.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("shuttle-server")
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    runtime.block_on(serve(Arc::new(config)))
}

async fn serve(config: Arc<Config>) -> Result<(), ServerError> {
    let components = Components::from_config(&config)?;
    let state = ServiceState::start(config.clone(), components);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(ServerError::BindFailed)?;
    shuttle_log::info!("spawning http server on {addr}");

    axum::serve(listener, routes(state.clone()))
        .with_graceful_shutdown(stop_intake(state.clone(), shutdown_signal()))
        .await
        .map_err(ServerError::Serve)?;

    if state.receiver().shutdown(config.shutdown_timeout()).await {
        shuttle_log::info!("shutdown complete");
    }

    Ok(())
}

/// Waits for `signal` and stops intake before the HTTP server starts closing connections.
async fn stop_intake(state: ServiceState, signal: impl Future<Output = ()>) {
    signal.await;
    state.receiver().begin_shutdown();
}

/// Resolves once the process receives `SIGINT` or `SIGTERM`.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            shuttle_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to listen for interrupt signal"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                shuttle_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for terminate signal"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => (),
        _ = terminate => (),
    }

    shuttle_log::info!("received shutdown signal, stopping http server");
}
