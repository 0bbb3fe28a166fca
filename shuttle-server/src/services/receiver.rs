//! The ingest half of the pipeline.
//!
//! Requests flow through three stages, connected by bounded queues:
//!
//! ```text
//! receive -> [inbox] -> accept workers -> register -> transfer -> [outbox] -> persist workers -> store
//! ```
//!
//! Accept workers parse requests and add the buckets that pass the admission deadline to the
//! [`Register`]. The transfer task periodically drains the whole register into the outbox, and
//! persist workers write the buckets to the [`Store`]. Every stage applies back pressure to the
//! previous one through the bounded queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use shuttle_common::Clock;
use shuttle_config::Config;
use shuttle_metrics::{Bucket, ParseOptions, Parser};
use shuttle_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::register::{AddOutcome, Register};
use crate::services::store::Store;
use crate::statsd::{PipelineCounters, PipelineGauges, PipelineHistograms, PipelineTimers};
use crate::stats::PipelineStats;
use crate::utils::InFlight;

/// Interval of the self-report loop.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Interval of extra transfers while draining on shutdown.
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters of the [`Receiver`].
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Capacity of the inbox and the outbox.
    pub buffer_size: usize,
    /// Interval between two register transfers.
    pub flush_interval: Duration,
    /// Number of accept workers.
    pub accept_workers: usize,
    /// Number of persist workers.
    pub outlet_workers: usize,
    /// Maximum admitted window age in resolution units.
    pub deadline: u64,
}

impl ReceiverConfig {
    /// Extracts the receiver parameters from the global configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.receiver_buffer_size(),
            flush_interval: config.flush_interval(),
            accept_workers: config.accept_workers(),
            outlet_workers: config.outlet_workers(),
            deadline: config.deadline(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An error returned by [`Receiver::receive`].
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// Shutdown has begun, no further requests are accepted.
    #[error("receiver is shutting down")]
    ShuttingDown,
    /// The accept workers are gone.
    #[error("receiver inbox is closed")]
    Closed,
}

/// A raw payload together with its request options.
#[derive(Debug)]
pub struct LogRequest {
    /// The unparsed request body.
    pub payload: Bytes,
    /// Options applied to every measurement in the payload.
    pub options: ParseOptions,
}

/// State shared by all receiver tasks.
#[derive(Debug)]
struct Shared {
    register: Register,
    in_flight: Arc<InFlight>,
    parser: Arc<dyn Parser>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
    deadline: u64,
}

impl Shared {
    /// Parses a request and adds every admitted bucket to the register.
    fn accept(&self, request: &LogRequest) {
        let now = self.clock.now();

        for bucket in self.parser.parse(&request.payload, &request.options) {
            if bucket.id().delay(now) > self.deadline {
                shuttle_log::trace!(
                    name = bucket.id().name(),
                    time = %bucket.id().time(),
                    "dropping bucket past the deadline"
                );
                metric!(counter(PipelineCounters::AdmissionDrop) += 1);
                self.stats.admission_drop();
                continue;
            }

            match self.register.add(bucket) {
                AddOutcome::Inserted => {
                    metric!(counter(PipelineCounters::AddBucket) += 1);
                    self.stats.bucket_added();
                }
                AddOutcome::Merged => {
                    metric!(counter(PipelineCounters::MergeBucket) += 1);
                    self.stats.bucket_merged();
                }
            }
        }
    }

    /// Drains the register into the outbox.
    async fn transfer(&self, outbox: &flume::Sender<Bucket>) {
        let buckets = metric!(timer(PipelineTimers::Transfer), { self.register.take() });
        if buckets.is_empty() {
            return;
        }

        metric!(histogram(PipelineHistograms::BucketsTransferred) = buckets.len() as u64);
        shuttle_log::trace!("transferring {} buckets to the outbox", buckets.len());

        for bucket in buckets.into_values() {
            if outbox.send_async(bucket).await.is_err() {
                shuttle_log::error!("receiver outbox closed, dropping bucket");
                self.in_flight.done(1);
            }
        }
    }

    /// Writes a bucket to the store. Failures are logged and the bucket is dropped.
    async fn persist(&self, bucket: Bucket) {
        let result = metric!(timer(PipelineTimers::Persist), {
            self.store.put(bucket).await
        });

        if let Err(error) = result {
            shuttle_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to persist bucket"
            );
            metric!(counter(PipelineCounters::PutError) += 1);
            self.stats.persist_error();
        }

        self.in_flight.done(1);
    }
}

/// The ingest half of the pipeline.
///
/// All tasks are spawned on the current tokio runtime and aborted when the receiver is dropped.
#[derive(Debug)]
pub struct Receiver {
    shared: Arc<Shared>,
    inbox: flume::Sender<LogRequest>,
    outbox: flume::Sender<Bucket>,
    shutting_down: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl Receiver {
    /// Starts all receiver tasks.
    pub fn start(
        config: ReceiverConfig,
        parser: Arc<dyn Parser>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let in_flight = Arc::new(InFlight::new());
        let shared = Arc::new(Shared {
            register: Register::new(in_flight.clone()),
            in_flight,
            parser,
            store,
            clock,
            stats,
            deadline: config.deadline,
        });

        let (inbox, inbox_rx) = flume::bounded::<LogRequest>(config.buffer_size);
        let (outbox, outbox_rx) = flume::bounded::<Bucket>(config.buffer_size);

        let mut tasks = Vec::new();

        for _ in 0..config.accept_workers {
            let shared = shared.clone();
            let inbox_rx = inbox_rx.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(request) = inbox_rx.recv_async().await {
                    metric!(timer(PipelineTimers::Accept), { shared.accept(&request) });
                    shared.in_flight.done(1);
                }
            }));
        }

        for _ in 0..config.outlet_workers {
            let shared = shared.clone();
            let outbox_rx = outbox_rx.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(bucket) = outbox_rx.recv_async().await {
                    shared.persist(bucket).await;
                }
            }));
        }

        tasks.push(tokio::spawn({
            let shared = shared.clone();
            let outbox = outbox.clone();
            let mut ticker = tokio::time::interval(config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            async move {
                loop {
                    ticker.tick().await;
                    shared.transfer(&outbox).await;
                }
            }
        }));

        tasks.push(tokio::spawn(report(
            shared.clone(),
            inbox_rx,
            outbox_rx,
        )));

        Self {
            shared,
            inbox,
            outbox,
            shutting_down: AtomicBool::new(false),
            tasks,
        }
    }

    /// Enqueues a payload for parsing and aggregation.
    ///
    /// Waits while the inbox is full. Fails once [`shutdown`](Self::shutdown) has been called.
    pub async fn receive(
        &self,
        payload: Bytes,
        options: ParseOptions,
    ) -> Result<(), ReceiveError> {
        // Counted before the check, so a concurrent shutdown either refuses or waits for it.
        self.shared.in_flight.add(1);
        if self.shutting_down.load(Ordering::SeqCst) {
            self.shared.in_flight.done(1);
            return Err(ReceiveError::ShuttingDown);
        }

        let request = LogRequest { payload, options };
        if self.inbox.send_async(request).await.is_err() {
            self.shared.in_flight.done(1);
            return Err(ReceiveError::Closed);
        }

        metric!(counter(PipelineCounters::Request) += 1);
        self.shared.stats.request();
        Ok(())
    }

    /// Stops intake and waits until all received data has reached the store.
    ///
    /// Transfers the register immediately instead of waiting for the next flush, and keeps
    /// transferring while requests that were queued before the shutdown are still being accepted.
    /// Returns `false` if data was still in flight when the timeout elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.begin_shutdown();

        let drain = async {
            loop {
                self.shared.transfer(&self.outbox).await;
                tokio::select! {
                    _ = self.shared.in_flight.wait_idle() => break,
                    _ = tokio::time::sleep(DRAIN_INTERVAL) => (),
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                shuttle_log::error!(
                    in_flight = self.in_flight(),
                    "receiver shutdown timed out, dropping in-flight data"
                );
                false
            }
        }
    }

    /// Stops intake without waiting for the drain.
    ///
    /// From here on, [`receive`](Self::receive) fails and the receiver reports itself as shutting
    /// down. Calling this more than once has no further effect.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            shuttle_log::info!(
                in_flight = self.in_flight(),
                "shutting down receiver, draining in-flight data"
            );
        }
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns the number of requests and buckets that have not been persisted yet.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.get()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Periodically reports queue lengths and throughput.
async fn report(
    shared: Arc<Shared>,
    inbox: flume::Receiver<LogRequest>,
    outbox: flume::Receiver<Bucket>,
) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    let mut last = shared.stats.snapshot();

    loop {
        ticker.tick().await;

        metric!(gauge(PipelineGauges::ReceiverInbox) = inbox.len() as u64);
        metric!(gauge(PipelineGauges::ReceiverOutbox) = outbox.len() as u64);
        metric!(gauge(PipelineGauges::RegisterBuckets) = shared.register.len() as u64);
        metric!(gauge(PipelineGauges::InFlight) = shared.in_flight.get() as u64);

        let current = shared.stats.snapshot();
        if current != last {
            shuttle_log::debug!(
                requests = current.requests - last.requests,
                buckets = current.buckets_added - last.buckets_added,
                merged = current.buckets_merged - last.buckets_merged,
                dropped = current.admission_drops - last.admission_drops,
                "receiver report"
            );
        }
        last = current;
    }
}
