use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts units of data accepted by the receiver that have not reached the store yet.
///
/// A unit is either a request that has not been fully accepted, or a bucket that was created in
/// the register and has not been persisted. Merging into an existing bucket adds no unit.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` units.
    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    /// Releases `n` units, waking up waiters if the counter reaches zero.
    pub fn done(&self, n: usize) {
        let previous = self.count.fetch_sub(n, Ordering::SeqCst);
        debug_assert!(previous >= n, "in-flight counter underflow");

        if previous == n {
            self.idle.notify_waiters();
        }
    }

    /// Returns the current number of units.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once the counter is zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.get() == 0 {
                return;
            }

            notified.await;
        }
    }
}
