//! Counters shared by the pipeline stages.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters of the pipeline.
///
/// The same counters are also emitted through statsd. These exist so that callers can observe
/// the pipeline without a metrics client, for example in health reports and tests.
#[derive(Debug, Default)]
pub struct PipelineStats {
    requests: AtomicU64,
    buckets_added: AtomicU64,
    buckets_merged: AtomicU64,
    admission_drops: AtomicU64,
    persist_errors: AtomicU64,
    batches_delivered: AtomicU64,
    delivery_drops: AtomicU64,
}

/// A point-in-time copy of [`PipelineStats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    /// Requests accepted by the receiver.
    pub requests: u64,
    /// Buckets that created a new register entry.
    pub buckets_added: u64,
    /// Buckets merged into an existing register entry.
    pub buckets_merged: u64,
    /// Buckets rejected by the admission deadline.
    pub admission_drops: u64,
    /// Buckets that failed to persist.
    pub persist_errors: u64,
    /// Batches accepted by the upstream.
    pub batches_delivered: u64,
    /// Batches dropped after exhausting all delivery attempts.
    pub delivery_drops: u64,
}

impl PipelineStats {
    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bucket_added(&self) {
        self.buckets_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bucket_merged(&self) {
        self.buckets_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn admission_drop(&self) {
        self.admission_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivery_drop(&self) {
        self.delivery_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current values of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            buckets_added: self.buckets_added.load(Ordering::Relaxed),
            buckets_merged: self.buckets_merged.load(Ordering::Relaxed),
            admission_drops: self.admission_drops.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            delivery_drops: self.delivery_drops.load(Ordering::Relaxed),
        }
    }
}
