use std::io;
use std::sync::Arc;

use shuttle_common::{Clock, SystemClock};
use shuttle_config::Config;
use shuttle_metrics::{LogParser, Parser};

use crate::services::{
    DeliveryError, HttpUpstream, MemoryStore, Outlet, OutletConfig, Receiver, ReceiverConfig,
    Store, Upstream,
};
use crate::stats::PipelineStats;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The async runtime could not be created.
    #[error("failed to start the runtime")]
    Runtime(#[source] io::Error),

    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] io::Error),

    /// The upstream HTTP client could not be created.
    #[error("failed to create the upstream client")]
    Upstream(#[from] DeliveryError),

    /// The HTTP server terminated with an error.
    #[error("http server failed")]
    Serve(#[source] io::Error),
}

/// The pluggable parts of the pipeline.
#[derive(Clone, Debug)]
pub struct Components {
    /// Converts request payloads into buckets.
    pub parser: Arc<dyn Parser>,
    /// Intermediate persistence shared by the receiver and the outlet.
    pub store: Arc<dyn Store>,
    /// Destination of delivered batches.
    pub upstream: Arc<dyn Upstream>,
    /// Clock used for admission and request timestamps.
    pub clock: Arc<dyn Clock>,
}

impl Components {
    /// Creates the default components for the given configuration.
    ///
    /// Uses the log line parser, an in-memory store, the system clock, and delivers over HTTP to
    /// the configured outlet URL.
    pub fn from_config(config: &Config) -> Result<Self, DeliveryError> {
        let upstream = HttpUpstream::new(config.outlet_url().clone(), config.delivery_timeout())?;

        Ok(Self {
            parser: Arc::new(LogParser),
            store: Arc::new(MemoryStore::new(config.deadline())),
            upstream: Arc::new(upstream),
            clock: Arc::new(SystemClock),
        })
    }
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    receiver: Receiver,
    outlet: Outlet,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
}

/// Server state, shared by all endpoints.
///
/// Starting the state spawns the receiver and outlet tasks on the current runtime. The tasks are
/// aborted once the last clone of the state is dropped.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Starts the pipeline.
    pub fn start(config: Arc<Config>, components: Components) -> Self {
        let stats = Arc::new(PipelineStats::default());

        let receiver = Receiver::start(
            ReceiverConfig::from_config(&config),
            components.parser,
            components.store.clone(),
            components.clock.clone(),
            stats.clone(),
        );

        let outlet = Outlet::start(
            OutletConfig::from_config(&config),
            components.store,
            components.upstream,
            stats.clone(),
        );

        Self {
            inner: Arc::new(StateInner {
                config,
                receiver,
                outlet,
                clock: components.clock,
                stats,
            }),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the ingest half of the pipeline.
    pub fn receiver(&self) -> &Receiver {
        &self.inner.receiver
    }

    /// Returns the delivery half of the pipeline.
    pub fn outlet(&self) -> &Outlet {
        &self.inner.outlet
    }

    /// Returns the clock used to timestamp requests.
    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    /// Returns the cumulative pipeline counters.
    pub fn stats(&self) -> &PipelineStats {
        &self.inner.stats
    }
}
