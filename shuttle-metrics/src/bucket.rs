use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shuttle_common::time::UnixTimestamp;

/// The default bucket width in seconds.
pub const DEFAULT_RESOLUTION: u64 = 60;

/// The kind of measurement a bucket aggregates.
///
/// The type decides which statistical views are emitted for a bucket, see [`Bucket::views`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Values are summed up, reported as a single count.
    Counter,
    /// Only the last value is of interest, reported as a gauge.
    Sample,
    /// Full distribution, reported as a set of percentiles and aggregates.
    Measurement,
}

impl MetricType {
    /// Returns the name of this type as it appears in logs and tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Sample => "sample",
            MetricType::Measurement => "measurement",
        }
    }

    /// Returns the type for an l2met key prefix, such as `measure` in `measure#db.latency`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "count" => MetricType::Counter,
            "sample" => MetricType::Sample,
            "measure" => MetricType::Measurement,
            _ => return None,
        })
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity of a bucket.
///
/// Two measurements are aggregated into the same bucket if and only if all fields of their
/// identities are equal. The identity is immutable once created; `ready_at` is derived from the
/// window start and the resolution.
#[derive(Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct BucketId {
    name: String,
    units: String,
    source: String,
    #[serde(rename = "type")]
    ty: MetricType,
    auth: String,
    tags: BTreeSet<String>,
    time: UnixTimestamp,
    resolution: u64,
    ready_at: UnixTimestamp,
}

impl BucketId {
    /// Creates the identity for a measurement taken at `time`.
    ///
    /// The time is truncated to the start of its window. A resolution of `0` is treated as `1`
    /// second.
    pub fn new(
        name: impl Into<String>,
        ty: MetricType,
        time: UnixTimestamp,
        resolution: u64,
    ) -> Self {
        let resolution = resolution.max(1);
        let time = time.truncate(resolution);

        Self {
            name: name.into(),
            units: String::new(),
            source: String::new(),
            ty,
            auth: String::new(),
            tags: BTreeSet::new(),
            time,
            resolution,
            ready_at: time + Duration::from_secs(resolution),
        }
    }

    /// Sets the unit of the measured values, such as `ms`.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Sets the origin of the measurement, usually a host name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the credential token of the destination account.
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = auth.into();
        self
    }

    /// Sets the tags of the bucket, replacing previous ones.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit of the values, empty if unknown.
    pub fn units(&self) -> &str {
        &self.units
    }

    /// The origin of the measurement, empty if unknown.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The kind of aggregation.
    pub fn ty(&self) -> MetricType {
        self.ty
    }

    /// The credential token. Buckets are batched and delivered per token.
    pub fn auth(&self) -> &str {
        &self.auth
    }

    /// The ordered set of tags.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Start of the aggregation window.
    pub fn time(&self) -> UnixTimestamp {
        self.time
    }

    /// Width of the aggregation window in seconds.
    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    /// The earliest time at which the window is closed.
    pub fn ready_at(&self) -> UnixTimestamp {
        self.ready_at
    }

    /// Returns the age of the window at `now` in whole resolution units.
    ///
    /// Windows that start after `now` have a delay of `0`.
    ///
    /// # Example
    ///
    /// ```
    /// use shuttle_common::UnixTimestamp;
    /// use shuttle_metrics::{BucketId, MetricType};
    ///
    /// let id = BucketId::new("db.latency", MetricType::Measurement, UnixTimestamp::from_secs(60), 60);
    /// assert_eq!(id.delay(UnixTimestamp::from_secs(119)), 0);
    /// assert_eq!(id.delay(UnixTimestamp::from_secs(180)), 2);
    /// ```
    pub fn delay(&self, now: UnixTimestamp) -> u64 {
        (now - self.time).as_secs() / self.resolution
    }

    /// The earliest time at which admission with the given `deadline` rejects data for this
    /// window.
    ///
    /// From this point on, the delay of the window exceeds `deadline` resolution units.
    pub fn settled_at(&self, deadline: u64) -> UnixTimestamp {
        self.ready_at + Duration::from_secs(deadline.saturating_mul(self.resolution))
    }
}

impl fmt::Debug for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The credential token must not end up in logs.
        f.debug_struct("BucketId")
            .field("name", &self.name)
            .field("units", &self.units)
            .field("source", &self.source)
            .field("ty", &self.ty)
            .field("auth", &"[redacted]")
            .field("tags", &self.tags)
            .field("time", &self.time)
            .field("resolution", &self.resolution)
            .finish()
    }
}

/// An error returned by [`Bucket::merge`].
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The other bucket has a different identity.
    #[error("cannot merge buckets with different identities")]
    IdMismatch,
}

/// Aggregated values of one metric in one time window.
///
/// # Example
///
/// ```
/// use shuttle_common::UnixTimestamp;
/// use shuttle_metrics::{Bucket, BucketId, MetricType};
///
/// let id = BucketId::new("db.latency", MetricType::Measurement, UnixTimestamp::from_secs(0), 60);
/// let mut bucket = Bucket::with_value(id.clone(), 2.0);
/// bucket.merge(Bucket::with_value(id, 4.0)).unwrap();
///
/// assert_eq!(bucket.sum(), 6.0);
/// assert_eq!(bucket.count(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Bucket {
    id: BucketId,
    sum: f64,
    values: Vec<f64>,
}

impl Bucket {
    /// Creates an empty bucket.
    pub fn new(id: BucketId) -> Self {
        Self {
            id,
            sum: 0.0,
            values: Vec::new(),
        }
    }

    /// Creates a bucket holding a single value.
    pub fn with_value(id: BucketId, value: f64) -> Self {
        let mut bucket = Self::new(id);
        bucket.insert(value);
        bucket
    }

    /// Adds a value to the bucket.
    pub fn insert(&mut self, value: f64) {
        self.sum += value;
        self.values.push(value);
    }

    /// Merges another bucket of the same identity into this one.
    ///
    /// Values are appended and sums are added, so the result does not depend on merge order
    /// apart from the order of values. On error, `self` is left unchanged.
    pub fn merge(&mut self, other: Bucket) -> Result<(), MergeError> {
        if self.id != other.id {
            return Err(MergeError::IdMismatch);
        }

        self.sum += other.sum;
        self.values.extend(other.values);
        Ok(())
    }

    /// The identity of this bucket.
    pub fn id(&self) -> &BucketId {
        &self.id
    }

    /// The raw values in insertion order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The sum of all values.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// The number of values.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// The smallest value, `None` for an empty bucket.
    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    /// The largest value, `None` for an empty bucket.
    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// The arithmetic mean, `None` for an empty bucket.
    pub fn mean(&self) -> Option<f64> {
        match self.count() {
            0 => None,
            count => Some(self.sum / count as f64),
        }
    }

    /// The most recently inserted value.
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// The 50th percentile.
    pub fn median(&self) -> Option<f64> {
        self.percentile(0.5)
    }

    /// The 95th percentile.
    pub fn p95(&self) -> Option<f64> {
        self.percentile(0.95)
    }

    /// The 99th percentile.
    pub fn p99(&self) -> Option<f64> {
        self.percentile(0.99)
    }

    /// Returns the nearest-rank percentile for `quantile` in `0.0..=1.0`.
    pub fn percentile(&self, quantile: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }

        let mut sorted = self.values.clone();
        sorted.sort_unstable_by(f64::total_cmp);

        let rank = (quantile.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn id(name: &str) -> BucketId {
        BucketId::new(
            name,
            MetricType::Measurement,
            UnixTimestamp::from_secs(1370554882),
            60,
        )
        .with_source("web.1")
        .with_auth("secret")
    }

    fn bucket(values: &[f64]) -> Bucket {
        let mut bucket = Bucket::new(id("db.latency"));
        for value in values {
            bucket.insert(*value);
        }
        bucket
    }

    fn sorted(bucket: &Bucket) -> Vec<f64> {
        let mut values = bucket.values().to_vec();
        values.sort_by(f64::total_cmp);
        values
    }

    #[test]
    fn test_id_truncates_time() {
        let id = id("db.latency");
        assert_eq!(id.time(), UnixTimestamp::from_secs(1370554860));
        assert_eq!(id.ready_at(), UnixTimestamp::from_secs(1370554920));
    }

    #[test]
    fn test_id_zero_resolution() {
        let id = BucketId::new("x", MetricType::Counter, UnixTimestamp::from_secs(5), 0);
        assert_eq!(id.resolution(), 1);
        assert_eq!(id.delay(UnixTimestamp::from_secs(8)), 3);
    }

    #[test]
    fn test_delay() {
        let id = id("db.latency");
        let start = id.time().as_secs();

        assert_eq!(id.delay(UnixTimestamp::from_secs(start - 100)), 0);
        assert_eq!(id.delay(UnixTimestamp::from_secs(start)), 0);
        assert_eq!(id.delay(UnixTimestamp::from_secs(start + 59)), 0);
        assert_eq!(id.delay(UnixTimestamp::from_secs(start + 60)), 1);
        assert_eq!(id.delay(UnixTimestamp::from_secs(start + 179)), 2);
    }

    #[test]
    fn test_settled_at() {
        let id = id("db.latency");
        let start = id.time().as_secs();

        assert_eq!(id.settled_at(0), id.ready_at());
        assert_eq!(id.settled_at(2), UnixTimestamp::from_secs(start + 180));
        assert_eq!(id.delay(id.settled_at(2) - Duration::from_secs(1)), 2);
        assert_eq!(id.delay(id.settled_at(2)), 3);
    }

    #[test]
    fn test_id_equality_covers_tags() {
        let a = id("db.latency").with_tags(["env:prod", "app:web"]);
        let b = id("db.latency").with_tags(["app:web", "env:prod"]);
        let c = id("db.latency").with_tags(["env:dev"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_debug_redacts_auth() {
        let debug = format!("{:?}", id("db.latency"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_merge_mismatch() {
        let mut a = bucket(&[1.0]);
        let b = Bucket::with_value(id("other"), 2.0);

        assert!(matches!(a.merge(b), Err(MergeError::IdMismatch)));
        assert_eq!(a.values(), [1.0].as_slice());
        assert_eq!(a.sum(), 1.0);
    }

    #[test]
    fn test_merge_associative() {
        let (a, b, c) = (bucket(&[1.0, 2.0]), bucket(&[3.0]), bucket(&[4.0, 5.0, 6.0]));

        let mut left = a.clone();
        left.merge(b.clone()).unwrap();
        left.merge(c.clone()).unwrap();

        let mut bc = b;
        bc.merge(c).unwrap();
        let mut right = a;
        right.merge(bc).unwrap();

        assert_eq!(left.sum(), right.sum());
        assert_eq!(sorted(&left), sorted(&right));
    }

    #[test]
    fn test_merge_commutative() {
        let (a, b) = (bucket(&[1.5, 2.5]), bucket(&[10.0]));

        let mut ab = a.clone();
        ab.merge(b.clone()).unwrap();
        let mut ba = b;
        ba.merge(a).unwrap();

        assert_eq!(ab.sum(), ba.sum());
        assert_eq!(sorted(&ab), sorted(&ba));
    }

    #[test]
    fn test_stats() {
        let bucket = bucket(&[5.0, 1.0, 3.0, 2.0, 4.0]);

        assert_eq!(bucket.count(), 5);
        assert_eq!(bucket.sum(), 15.0);
        assert_eq!(bucket.min(), Some(1.0));
        assert_eq!(bucket.max(), Some(5.0));
        assert_eq!(bucket.mean(), Some(3.0));
        assert_eq!(bucket.last(), Some(4.0));
        assert_eq!(bucket.median(), Some(3.0));
        assert_eq!(bucket.p95(), Some(5.0));
        assert_eq!(bucket.p99(), Some(5.0));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let bucket = bucket(&(1..=100).map(f64::from).collect::<Vec<_>>());

        assert_eq!(bucket.percentile(0.0), Some(1.0));
        assert_eq!(bucket.median(), Some(50.0));
        assert_eq!(bucket.p95(), Some(95.0));
        assert_eq!(bucket.p99(), Some(99.0));
        assert_eq!(bucket.percentile(1.0), Some(100.0));
    }

    #[test]
    fn test_stats_empty() {
        let bucket = Bucket::new(id("db.latency"));

        assert_eq!(bucket.count(), 0);
        assert_eq!(bucket.min(), None);
        assert_eq!(bucket.mean(), None);
        assert_eq!(bucket.median(), None);
    }
}
