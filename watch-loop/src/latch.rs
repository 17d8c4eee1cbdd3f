//! Countdown latch decremented by the loop once per processed batch.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A countdown that lets external threads block until the loop has handled a
/// number of batches.
///
/// Clones share the same count. Counting down past zero is a no-op.
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug)]
struct LatchInner {
    count: Mutex<usize>,
    released: Condvar,
}

impl CountdownLatch {
    /// Create a latch that releases after `count` batches.
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                count: Mutex::new(count),
                released: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.inner
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrement the count, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.inner.released.notify_all();
            }
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let guard = self.lock();
        let _guard = self
            .inner
            .released
            .wait_while(guard, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the count reaches zero or `timeout` elapses. Returns
    /// whether the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .released
            .wait_timeout_while(guard, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }
}
