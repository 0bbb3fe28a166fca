use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::StatusCode;
use shuttle_common::UnixTimestamp;
use shuttle_metrics::Bucket;

use crate::services::{DeliveryError, MemoryStore, Store, StoreError, Upstream};

/// A store that records every put and delegates to a [`MemoryStore`].
#[derive(Debug)]
pub struct TestStore {
    inner: MemoryStore,
    puts: Mutex<Vec<Bucket>>,
    failing: bool,
}

impl Default for TestStore {
    fn default() -> Self {
        Self {
            inner: MemoryStore::new(2),
            puts: Mutex::default(),
            failing: false,
        }
    }
}

impl TestStore {
    /// Creates a store that rejects every put.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// Returns all buckets written so far, in order.
    pub fn puts(&self) -> Vec<Bucket> {
        self.puts.lock().clone()
    }
}

#[async_trait]
impl Store for TestStore {
    async fn put(&self, bucket: Bucket) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("test store is failing".to_owned()));
        }

        self.puts.lock().push(bucket.clone());
        self.inner.put(bucket).await
    }

    async fn scan(
        &self,
        ready_before: UnixTimestamp,
    ) -> Result<BoxStream<'static, Bucket>, StoreError> {
        self.inner.scan(ready_before).await
    }

    async fn now(&self) -> Result<UnixTimestamp, StoreError> {
        self.inner.now().await
    }
}

/// An upstream that fails a configurable number of times and records accepted bodies.
#[derive(Debug, Default)]
pub struct TestUpstream {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<(String, serde_json::Value)>>,
}

impl TestUpstream {
    /// Creates an upstream that fails the first `failures` attempts.
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    /// Returns the number of post attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the credential and parsed body of every accepted post.
    pub fn accepted(&self) -> Vec<(String, serde_json::Value)> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl Upstream for TestUpstream {
    async fn post(&self, auth: &str, body: Bytes) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            return Err(DeliveryError::Status(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        self.accepted.lock().push((auth.to_owned(), body));
        Ok(())
    }
}
