//! The delivery half of the pipeline.
//!
//! ```text
//! store -> reader -> [inbox] -> convert workers -> [conversion] -> batcher -> [outbox] -> delivery workers -> upstream
//! ```
//!
//! The reader periodically asks the store for buckets that are settled according to the store's
//! clock, see [`Store::scan`]. Convert workers expand buckets into [`DatadogSeries`], and a single batcher
//! groups series by credential token. Batches are flushed when they reach capacity or on the
//! next batch tick, whatever comes first. Delivery workers post batches with a bounded number of
//! retries and drop them once all attempts failed.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use hashbrown::HashMap;
use shuttle_common::UnixTimestamp;
use shuttle_config::Config;
use shuttle_metrics::{Bucket, DatadogRequest, DatadogSeries};
use shuttle_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::store::{Store, StoreError};
use crate::services::upstream::{DeliveryError, Upstream};
use crate::statsd::{PipelineCounters, PipelineGauges, PipelineHistograms, PipelineTimers};
use crate::stats::PipelineStats;

/// Interval of the self-report loop.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Parameters of the [`Outlet`].
#[derive(Clone, Debug)]
pub struct OutletConfig {
    /// Capacity of the inbox, the conversion queue, and the outbox.
    pub buffer_size: usize,
    /// Interval between two store scans.
    pub read_interval: Duration,
    /// Number of convert workers.
    pub convert_workers: usize,
    /// Number of delivery workers.
    pub delivery_workers: usize,
    /// Number of retries after the first failed attempt.
    pub delivery_retries: u32,
    /// Maximum number of series per batch.
    pub batch_capacity: usize,
    /// Interval after which pending batches are flushed.
    pub batch_interval: Duration,
}

impl OutletConfig {
    /// Extracts the outlet parameters from the global configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_size: config.outlet_buffer_size(),
            read_interval: config.read_interval(),
            convert_workers: config.convert_workers(),
            delivery_workers: config.delivery_workers(),
            delivery_retries: config.delivery_retries(),
            batch_capacity: config.batch_capacity(),
            batch_interval: config.batch_interval(),
        }
    }
}

impl Default for OutletConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Series of a single account, delivered in one request.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// The credential token shared by all series.
    pub auth: String,
    /// The series to deliver.
    pub series: Vec<DatadogSeries>,
}

/// Groups series by credential token.
#[derive(Debug)]
struct Batcher {
    groups: HashMap<String, Vec<DatadogSeries>>,
    capacity: usize,
}

impl Batcher {
    fn new(capacity: usize) -> Self {
        Self {
            groups: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Adds a series and returns its group if the group reached capacity.
    fn push(&mut self, series: DatadogSeries) -> Option<Batch> {
        let capacity = self.capacity;
        let group = self
            .groups
            .entry_ref(series.auth.as_str())
            .or_insert_with(|| Vec::with_capacity(capacity));

        group.push(series);
        if group.len() < capacity {
            return None;
        }

        let series = std::mem::replace(group, Vec::with_capacity(capacity));
        Some(Batch {
            auth: group_key(&series).to_owned(),
            series,
        })
    }

    /// Removes and returns all pending groups.
    fn flush(&mut self) -> Vec<Batch> {
        self.groups
            .drain()
            .filter(|(_, series)| !series.is_empty())
            .map(|(auth, series)| Batch { auth, series })
            .collect()
    }
}

/// Returns the credential token of a non-empty group.
fn group_key(group: &[DatadogSeries]) -> &str {
    group.first().map_or("", |series| series.auth.as_str())
}

/// The delivery half of the pipeline.
///
/// All tasks are spawned on the current tokio runtime and aborted when the outlet is dropped.
/// Data in the outlet's queues is not drained on shutdown.
#[derive(Debug)]
pub struct Outlet {
    tasks: Vec<JoinHandle<()>>,
}

impl Outlet {
    /// Starts all outlet tasks.
    pub fn start(
        config: OutletConfig,
        store: Arc<dyn Store>,
        upstream: Arc<dyn Upstream>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (inbox, inbox_rx) = flume::bounded::<Bucket>(config.buffer_size);
        let (conversion, conversion_rx) = flume::bounded::<DatadogSeries>(config.buffer_size);
        let (outbox, outbox_rx) = flume::bounded::<Batch>(config.buffer_size);

        let mut tasks = vec![tokio::spawn(read(store, config.read_interval, inbox))];

        for _ in 0..config.convert_workers {
            let inbox_rx = inbox_rx.clone();
            let conversion = conversion.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(bucket) = inbox_rx.recv_async().await {
                    for series in convert(&bucket, UnixTimestamp::now()) {
                        if conversion.send_async(series).await.is_err() {
                            return;
                        }
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(batch(
            conversion_rx.clone(),
            outbox,
            Batcher::new(config.batch_capacity),
            config.batch_interval,
        )));

        for _ in 0..config.delivery_workers {
            let outbox_rx = outbox_rx.clone();
            let upstream = upstream.clone();
            let stats = stats.clone();
            let retries = config.delivery_retries;
            tasks.push(tokio::spawn(async move {
                while let Ok(batch) = outbox_rx.recv_async().await {
                    deliver(batch, upstream.as_ref(), retries, &stats).await;
                }
            }));
        }

        tasks.push(tokio::spawn(report(inbox_rx, conversion_rx, outbox_rx)));

        Self { tasks }
    }
}

impl Drop for Outlet {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Periodically moves ready buckets from the store into the inbox.
async fn read(store: Arc<dyn Store>, interval: Duration, inbox: flume::Sender<Bucket>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match scan_ready(store.as_ref(), &inbox).await {
            Ok(0) => (),
            Ok(count) => shuttle_log::trace!("read {count} ready buckets from the store"),
            Err(error) => {
                shuttle_log::error!(
                    error = &error as &dyn Error,
                    "failed to read ready buckets"
                );
                metric!(counter(PipelineCounters::ScanError) += 1);
            }
        }

        if inbox.is_disconnected() {
            return;
        }
    }
}

/// Performs a single scan with the store's clock and returns the number of buckets read.
async fn scan_ready(store: &dyn Store, inbox: &flume::Sender<Bucket>) -> Result<usize, StoreError> {
    let now = store.now().await?;
    let mut buckets = store.scan(now).await?;

    let mut count = 0;
    while let Some(bucket) = buckets.next().await {
        if inbox.send_async(bucket).await.is_err() {
            break;
        }
        count += 1;
    }

    Ok(count)
}

/// Converts a ready bucket into series.
fn convert(bucket: &Bucket, now: UnixTimestamp) -> Vec<DatadogSeries> {
    metric!(histogram(PipelineHistograms::OutletDelay) = bucket.id().delay(now));

    DatadogSeries::from_bucket(bucket)
}

/// Groups series into batches, flushing on capacity and on every tick.
async fn batch(
    conversion: flume::Receiver<DatadogSeries>,
    outbox: flume::Sender<Batch>,
    mut batcher: Batcher,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (ready, closed): (Vec<Batch>, bool) = tokio::select! {
            biased;

            _ = ticker.tick() => (batcher.flush(), false),
            series = conversion.recv_async() => match series {
                Ok(series) => (batcher.push(series).into_iter().collect(), false),
                Err(_) => (batcher.flush(), true),
            },
        };

        for batch in ready {
            if outbox.send_async(batch).await.is_err() {
                return;
            }
        }

        if closed {
            return;
        }
    }
}

/// Serializes and posts a batch. Batches that cannot be delivered are dropped.
async fn deliver(batch: Batch, upstream: &dyn Upstream, retries: u32, stats: &PipelineStats) {
    if batch.series.is_empty() {
        shuttle_log::error!("dropping empty metrics batch");
        metric!(counter(PipelineCounters::EmptyBatch) += 1);
        return;
    }

    let series = batch.series.len();
    metric!(histogram(PipelineHistograms::BatchSize) = series as u64);

    let body = match DatadogRequest::new(&batch.series).to_json() {
        Ok(body) => Bytes::from(body),
        Err(error) => {
            shuttle_log::error!(
                error = &error as &dyn Error,
                series,
                "failed to serialize metrics batch"
            );
            metric!(counter(PipelineCounters::DeliveryDrop) += 1, reason = "serialize");
            stats.delivery_drop();
            return;
        }
    };

    match post_with_retry(upstream, &batch.auth, body, retries).await {
        Ok(()) => stats.batch_delivered(),
        Err(error) => {
            shuttle_log::error!(
                error = &error as &dyn Error,
                series,
                attempts = retries + 1,
                "dropping metrics batch after failed delivery"
            );
            metric!(counter(PipelineCounters::DeliveryDrop) += 1, reason = "retries");
            stats.delivery_drop();
        }
    }
}

/// Posts a body, retrying up to `retries` times after the first failed attempt.
///
/// All errors are retried alike and immediately. Returns the error of the last attempt.
pub async fn post_with_retry(
    upstream: &dyn Upstream,
    auth: &str,
    body: Bytes,
    retries: u32,
) -> Result<(), DeliveryError> {
    let mut attempt = 0;

    loop {
        let result = metric!(timer(PipelineTimers::Post), {
            upstream.post(auth, body.clone()).await
        });

        match result {
            Ok(()) => return Ok(()),
            Err(error) if attempt < retries => {
                attempt += 1;
                shuttle_log::debug!(
                    error = &error as &dyn Error,
                    attempt,
                    "delivery attempt failed, retrying"
                );
                metric!(counter(PipelineCounters::DeliveryRetry) += 1);
            }
            Err(error) => return Err(error),
        }
    }
}

/// Periodically reports queue lengths.
async fn report(
    inbox: flume::Receiver<Bucket>,
    conversion: flume::Receiver<DatadogSeries>,
    outbox: flume::Receiver<Batch>,
) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);

    loop {
        ticker.tick().await;

        metric!(gauge(PipelineGauges::OutletInbox) = inbox.len() as u64);
        metric!(gauge(PipelineGauges::OutletConversion) = conversion.len() as u64);
        metric!(gauge(PipelineGauges::OutletOutbox) = outbox.len() as u64);
    }
}
