// src/cancel.rs
//
// Shared cancellation signal for the capture activities.
// Raised once, observed everywhere, never reset. Sleeps taken through the
// token wake as soon as it is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    lock: Mutex<bool>,
    wake: Condvar,
}

/// Cloneable handle to a single cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns true only for the call that actually raised it.
    pub fn cancel(&self) -> bool {
        let mut raised = match self.inner.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *raised {
            return false;
        }
        *raised = true;
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless the signal is raised first.
    /// Returns true if the full duration elapsed, false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        !self.wait_timeout(duration)
    }

    /// Block until the signal is raised or `timeout` elapses.
    /// Returns true if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = match self.inner.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            raised = match self.inner.wake.wait_timeout(raised, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
