//! FIFO counting semaphore for bounding file and database I/O.
//!
//! Waiters are served strictly in arrival order: each acquirer takes a ticket
//! and blocks until its ticket comes up and a permit is free. Permits release
//! on guard drop, so a panicking holder cannot leak capacity.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct LimiterState {
    available: usize,
    next_ticket: u64,
    now_serving: u64,
}

struct Inner {
    state: Mutex<LimiterState>,
    condvar: Condvar,
    capacity: usize,
}

/// Bounded-concurrency limiter shared across threads.
#[derive(Clone)]
pub struct IoLimiter {
    inner: Arc<Inner>,
}

impl IoLimiter {
    /// Create a limiter with `capacity` permits (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LimiterState {
                    available: capacity,
                    next_ticket: 0,
                    now_serving: 0,
                }),
                condvar: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Block until a permit is available, in FIFO order.
    pub fn acquire(&self) -> IoPermit {
        let mut state = self.inner.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        while state.now_serving != ticket || state.available == 0 {
            self.inner.condvar.wait(&mut state);
        }

        state.available -= 1;
        state.now_serving += 1;
        // Wake the next ticket holder; it may still have to wait for a permit.
        self.inner.condvar.notify_all();

        IoPermit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run `f` while holding a permit.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _permit = self.acquire();
        f()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits currently available (diagnostic only).
    pub fn available(&self) -> usize {
        self.inner.state.lock().available
    }
}

/// RAII permit; dropping releases the slot.
pub struct IoPermit {
    inner: Arc<Inner>,
}

impl Drop for IoPermit {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.available += 1;
        self.inner.condvar.notify_all();
    }
}
