use std::borrow::Cow;

use shuttle_common::time::UnixTimestamp;

use crate::bucket::{Bucket, MetricType};

/// How a view's value is reported to the provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ViewKind {
    /// A point-in-time value.
    Gauge,
    /// An amount accumulated over the window.
    Count,
}

/// A single statistic derived from a bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketView<'a> {
    /// The metric name including the statistic suffix, for example `db.latency.perc95`.
    pub name: Cow<'a, str>,
    /// The value of the statistic.
    pub value: f64,
    /// How the statistic is reported.
    pub kind: ViewKind,
    /// The start of the bucket's window.
    pub time: UnixTimestamp,
}

/// Statistics emitted for measurement buckets, in emission order.
const MEASUREMENT_VIEWS: &[(&str, ViewKind, fn(&Bucket) -> Option<f64>)] = &[
    ("min", ViewKind::Gauge, Bucket::min),
    ("median", ViewKind::Gauge, Bucket::median),
    ("perc95", ViewKind::Gauge, Bucket::p95),
    ("perc99", ViewKind::Gauge, Bucket::p99),
    ("max", ViewKind::Gauge, Bucket::max),
    ("mean", ViewKind::Gauge, Bucket::mean),
    ("last", ViewKind::Gauge, Bucket::last),
    ("count", ViewKind::Count, count),
    ("sum", ViewKind::Count, sum),
];

fn count(bucket: &Bucket) -> Option<f64> {
    Some(bucket.count() as f64)
}

fn sum(bucket: &Bucket) -> Option<f64> {
    Some(bucket.sum())
}

impl Bucket {
    /// Returns the statistical views of this bucket.
    ///
    /// Counters yield their sum, samples their last value, and measurements a full set of
    /// aggregates suffixed to the metric name. Empty buckets yield no views.
    pub fn views(&self) -> Vec<BucketView<'_>> {
        if self.count() == 0 {
            return Vec::new();
        }

        let id = self.id();
        let time = id.time();

        match id.ty() {
            MetricType::Counter => vec![BucketView {
                name: Cow::Borrowed(id.name()),
                value: self.sum(),
                kind: ViewKind::Count,
                time,
            }],
            MetricType::Sample => self
                .last()
                .map(|value| BucketView {
                    name: Cow::Borrowed(id.name()),
                    value,
                    kind: ViewKind::Gauge,
                    time,
                })
                .into_iter()
                .collect(),
            MetricType::Measurement => MEASUREMENT_VIEWS
                .iter()
                .filter_map(|(suffix, kind, stat)| {
                    Some(BucketView {
                        name: Cow::Owned(format!("{}.{suffix}", id.name())),
                        value: stat(self)?,
                        kind: *kind,
                        time,
                    })
                })
                .collect(),
        }
    }
}
