use std::sync::Arc;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::Mutex;
use shuttle_metrics::{Bucket, BucketId};

use crate::utils::InFlight;

/// The result of adding a bucket to the [`Register`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddOutcome {
    /// The bucket created a new entry.
    Inserted,
    /// The bucket was merged into an existing entry.
    Merged,
}

/// The in-memory table of open buckets.
///
/// All access goes through a single lock. Adding a bucket with a new identity registers one unit
/// with the shared [`InFlight`] counter, which is released once the bucket was persisted.
#[derive(Debug)]
pub struct Register {
    buckets: Mutex<HashMap<BucketId, Bucket>>,
    in_flight: Arc<InFlight>,
}

impl Register {
    /// Creates an empty register.
    pub fn new(in_flight: Arc<InFlight>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            in_flight,
        }
    }

    /// Inserts the bucket or merges it into the entry with the same identity.
    pub fn add(&self, bucket: Bucket) -> AddOutcome {
        let mut buckets = self.buckets.lock();

        match buckets.entry(bucket.id().clone()) {
            Entry::Occupied(mut entry) => {
                if let Err(error) = entry.get_mut().merge(bucket) {
                    shuttle_log::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to merge bucket into register",
                    );
                }
                AddOutcome::Merged
            }
            Entry::Vacant(entry) => {
                // Counted under the lock, so a concurrent take cannot persist the bucket first.
                self.in_flight.add(1);
                entry.insert(bucket);
                AddOutcome::Inserted
            }
        }
    }

    /// Atomically removes and returns all buckets.
    pub fn take(&self) -> HashMap<BucketId, Bucket> {
        std::mem::take(&mut *self.buckets.lock())
    }

    /// Returns the number of buckets in the register.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Returns `true` if the register holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}
