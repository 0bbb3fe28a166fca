use shuttle_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Gauge metrics used by the pipeline.
pub enum PipelineGauges {
    /// The number of requests waiting in the receiver inbox.
    ReceiverInbox,
    /// The number of buckets waiting in the receiver outbox to be persisted.
    ReceiverOutbox,
    /// The number of distinct buckets in the register.
    RegisterBuckets,
    /// The number of units of data that have been received but not persisted yet.
    InFlight,
    /// The number of ready buckets waiting for conversion.
    OutletInbox,
    /// The number of converted series waiting to be batched.
    OutletConversion,
    /// The number of batches waiting for delivery.
    OutletOutbox,
}

impl GaugeMetric for PipelineGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::ReceiverInbox => "receiver.buffer.inbox",
            Self::ReceiverOutbox => "receiver.buffer.outbox",
            Self::RegisterBuckets => "receiver.register.buckets",
            Self::InFlight => "receiver.in_flight",
            Self::OutletInbox => "outlet.buffer.inbox",
            Self::OutletConversion => "outlet.buffer.conversion",
            Self::OutletOutbox => "outlet.buffer.outbox",
        }
    }
}

/// Counter metrics used by the pipeline.
pub enum PipelineCounters {
    /// Incremented for every request accepted by the receiver.
    Request,
    /// Incremented for every bucket that was rejected because its window was too old.
    AdmissionDrop,
    /// Incremented for every bucket that created a new register entry.
    AddBucket,
    /// Incremented for every bucket that was merged into an existing register entry.
    MergeBucket,
    /// Incremented for every bucket that could not be written to the store.
    ///
    /// The bucket is lost, persistence is not retried.
    PutError,
    /// Incremented for every failed scan of the store.
    ScanError,
    /// Incremented for every batch that could not be delivered after all retries.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `retries` if all attempts failed, `serialize` if the body could not be built.
    DeliveryDrop,
    /// Incremented for every failed delivery attempt that is retried.
    DeliveryRetry,
    /// Incremented for every empty batch that reached a delivery worker.
    EmptyBatch,
}

impl CounterMetric for PipelineCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Request => "receiver.request",
            Self::AdmissionDrop => "receiver.drop",
            Self::AddBucket => "receiver.add-bucket",
            Self::MergeBucket => "receiver.merge-bucket",
            Self::PutError => "receiver.put.error",
            Self::ScanError => "outlet.scan.error",
            Self::DeliveryDrop => "outlet.drop",
            Self::DeliveryRetry => "outlet.retry",
            Self::EmptyBatch => "outlet.empty-batch",
        }
    }
}

/// Timer metrics used by the pipeline.
pub enum PipelineTimers {
    /// Time spent parsing a request and adding its buckets to the register.
    Accept,
    /// Time spent writing a single bucket to the store.
    Persist,
    /// Time spent taking the register and handing all buckets to the outbox.
    Transfer,
    /// Time spent on a single delivery attempt.
    Post,
}

impl TimerMetric for PipelineTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::Accept => "receiver.accept",
            Self::Persist => "receiver.outlet",
            Self::Transfer => "receiver.transfer",
            Self::Post => "outlet.post",
        }
    }
}

/// Histogram metrics used by the pipeline.
pub enum PipelineHistograms {
    /// The number of buckets moved to the outbox in one transfer.
    BucketsTransferred,
    /// Age of a bucket's window at conversion, in whole resolution units since the window start.
    OutletDelay,
    /// The number of series in a delivered batch.
    BatchSize,
}

impl HistogramMetric for PipelineHistograms {
    fn name(&self) -> &'static str {
        match self {
            Self::BucketsTransferred => "receiver.transfer.buckets",
            Self::OutletDelay => "outlet.delay",
            Self::BatchSize => "outlet.batch.size",
        }
    }
}
