use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::Mutex;
use shuttle_common::{Clock, SystemClock, UnixTimestamp};
use shuttle_metrics::{Bucket, BucketId, MergeError};

/// An error returned by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    /// A bucket could not be merged with the stored bucket of the same identity.
    #[error("failed to merge bucket")]
    Merge(#[from] MergeError),
    /// The window of the bucket has already been handed out for delivery.
    #[error("window of the bucket was already read")]
    Settled,
}

/// Intermediate persistence for closed and open buckets.
///
/// Buckets written with the same identity are merged by the store. Reading removes the returned
/// buckets, so every bucket is read at most once.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Writes a bucket, merging it with a stored bucket of the same identity.
    async fn put(&self, bucket: Bucket) -> Result<(), StoreError>;

    /// Removes and streams all buckets that are settled at `ready_before`.
    ///
    /// A bucket is settled once its window is closed and admission no longer accepts data for
    /// it. Buckets that are closed but not yet settled stay in the store, so that late data still
    /// merges into them.
    async fn scan(
        &self,
        ready_before: UnixTimestamp,
    ) -> Result<BoxStream<'static, Bucket>, StoreError>;

    /// Returns the current time as seen by the store.
    ///
    /// Readers use this clock to decide which buckets are ready, so that a fleet of readers
    /// agrees on readiness regardless of local clock skew.
    async fn now(&self) -> Result<UnixTimestamp, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryBuckets {
    /// Buckets waiting to be read.
    pending: HashMap<BucketId, Bucket>,
    /// Identities that were read, mapped to the time at which they are forgotten.
    settled: HashMap<BucketId, UnixTimestamp>,
}

/// A [`Store`] that keeps all buckets in process memory.
///
/// Buckets are held back until admission with the configured deadline rejects data for their
/// window. Identities that were read are remembered for one more resolution, and puts for them
/// fail with [`StoreError::Settled`]. This covers data that was admitted just before the deadline
/// and is still on its way to the store.
pub struct MemoryStore {
    buckets: Mutex<MemoryBuckets>,
    deadline: u64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store for the given admission deadline using the system clock.
    pub fn new(deadline: u64) -> Self {
        Self::with_clock(deadline, Arc::new(SystemClock))
    }

    /// Creates an empty store for the given admission deadline using the given clock.
    pub fn with_clock(deadline: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Mutex::new(MemoryBuckets::default()),
            deadline,
            clock,
        }
    }

    /// Returns the number of stored buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().pending.len()
    }

    /// Returns `true` if no buckets are stored.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().pending.is_empty()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("buckets", &self.len())
            .field("deadline", &self.deadline)
            .field("clock", &self.clock)
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, bucket: Bucket) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock();
        if buckets.settled.contains_key(bucket.id()) {
            return Err(StoreError::Settled);
        }

        match buckets.pending.entry(bucket.id().clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(bucket)?,
            Entry::Vacant(entry) => {
                entry.insert(bucket);
            }
        }

        Ok(())
    }

    async fn scan(
        &self,
        ready_before: UnixTimestamp,
    ) -> Result<BoxStream<'static, Bucket>, StoreError> {
        let mut guard = self.buckets.lock();
        let buckets = &mut *guard;

        buckets.settled.retain(|_, forget_at| *forget_at > ready_before);

        let mut ready = Vec::new();
        for (id, bucket) in buckets
            .pending
            .extract_if(|id, _| id.settled_at(self.deadline) <= ready_before)
        {
            let forget_at = id.settled_at(self.deadline) + Duration::from_secs(id.resolution());
            buckets.settled.insert(id, forget_at);
            ready.push(bucket);
        }

        Ok(futures::stream::iter(ready).boxed())
    }

    async fn now(&self) -> Result<UnixTimestamp, StoreError> {
        Ok(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use shuttle_common::ManualClock;
    use shuttle_metrics::MetricType;

    use super::*;

    fn bucket(time: u64, value: f64) -> Bucket {
        let id = BucketId::new(
            "db.latency",
            MetricType::Measurement,
            UnixTimestamp::from_secs(time),
            60,
        );
        Bucket::with_value(id, value)
    }

    async fn scan(store: &MemoryStore, ready_before: u64) -> Vec<Bucket> {
        store
            .scan(UnixTimestamp::from_secs(ready_before))
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_put_merges() {
        let store = MemoryStore::new(2);
        store.put(bucket(0, 1.0)).await.unwrap();
        store.put(bucket(30, 2.0)).await.unwrap();
        store.put(bucket(60, 3.0)).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_removes_ready() {
        let store = MemoryStore::new(0);
        store.put(bucket(0, 1.0)).await.unwrap();
        store.put(bucket(60, 2.0)).await.unwrap();

        let ready = scan(&store, 60).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id().time(), UnixTimestamp::from_secs(0));
        assert_eq!(store.len(), 1);

        assert!(scan(&store, 60).await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_holds_back_until_deadline() {
        let store = MemoryStore::new(2);
        store.put(bucket(0, 1.0)).await.unwrap();

        // Closed at 60, but admission accepts data for the window until 180.
        assert!(scan(&store, 60).await.is_empty());
        assert!(scan(&store, 179).await.is_empty());

        store.put(bucket(10, 2.0)).await.unwrap();

        let ready = scan(&store, 180).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].values(), &[1.0, 2.0]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_after_read_is_rejected() {
        let store = MemoryStore::new(2);
        store.put(bucket(0, 1.0)).await.unwrap();
        assert_eq!(scan(&store, 180).await.len(), 1);

        let result = store.put(bucket(30, 2.0)).await;
        assert!(matches!(result, Err(StoreError::Settled)));
        assert!(scan(&store, 200).await.is_empty());

        // The identity is forgotten one resolution after it settled.
        assert!(scan(&store, 240).await.is_empty());
        store.put(bucket(30, 3.0)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_now_uses_clock() {
        let clock = Arc::new(ManualClock::new(UnixTimestamp::from_secs(42)));
        let store = MemoryStore::with_clock(2, clock.clone());

        assert_eq!(store.now().await.unwrap(), UnixTimestamp::from_secs(42));
        clock.set(UnixTimestamp::from_secs(100));
        assert_eq!(store.now().await.unwrap(), UnixTimestamp::from_secs(100));
    }
}
