//! Counting semaphore
//!
//! The decoding and event threads park on counting semaphores rather than
//! bare condition variables: producers of work (API calls, the render
//! callback via the event thread) signal without blocking, and a signal
//! delivered before the wait is never lost.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A counting semaphore built on `parking_lot` primitives.
///
/// `signal` never blocks the caller beyond the non-sleeping lock; `wait`
/// blocks until a permit is available.
pub struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    /// Add one permit and wake a waiter if any.
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.condvar.notify_one();
    }

    /// Consume one permit, blocking until one is available.
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Consume one permit, waiting at most `timeout`.
    ///
    /// Returns `true` if a permit was consumed, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.condvar.wait_until(&mut permits, deadline).timed_out() {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Consume one permit without blocking.
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Semaphore::new(0)
    }
}
