//! Bounded worker dispatcher and the per-thread handle remote operators
//! use to yield their slot around blocking I/O.
//!
//! `block()`/`unblock()` is not a mutex: it is a resource-ticket yield.
//! A worker about to block on a synchronous peer request releases its slot
//! so the dispatcher can schedule other work, and reacquires one after the
//! response arrives.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A bounded pool of worker slots.
pub struct WorkDispatcher {
    available: Mutex<usize>,
    total: usize,
    slot_freed: Condvar,
}

impl WorkDispatcher {
    pub fn new(slots: usize) -> Arc<Self> {
        Arc::new(WorkDispatcher {
            available: Mutex::new(slots),
            total: slots,
            slot_freed: Condvar::new(),
        })
    }

    pub fn total_slots(&self) -> usize {
        self.total
    }

    pub fn available_slots(&self) -> usize {
        *self.available.lock()
    }

    fn acquire(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.slot_freed.wait(&mut available);
        }
        *available -= 1;
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.slot_freed.notify_one();
    }

    /// Register the calling thread as a dispatcher worker, acquiring a
    /// slot. While the returned registration lives,
    /// `DispatcherThread::current()` resolves on this thread. Blocks until
    /// a slot is free.
    pub fn register_current(self: &Arc<Self>) -> DispatcherRegistration {
        self.acquire();
        let thread = DispatcherThread {
            dispatcher: Arc::clone(self),
        };
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(thread);
        });
        DispatcherRegistration {
            dispatcher: Arc::clone(self),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<DispatcherThread>> = const { RefCell::new(None) };
}

/// Handle to the dispatcher slot held by the current thread.
#[derive(Clone)]
pub struct DispatcherThread {
    dispatcher: Arc<WorkDispatcher>,
}

impl DispatcherThread {
    /// The dispatcher handle of the calling thread, if it is a registered
    /// worker.
    pub fn current() -> Option<DispatcherThread> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Release the slot before blocking on external I/O.
    pub fn block(&self) {
        self.dispatcher.release();
    }

    /// Reacquire a slot after the I/O finished. Blocks until one is free.
    pub fn unblock(&self) {
        self.dispatcher.acquire();
    }
}

/// Keeps the calling thread registered; dropping it returns the slot and
/// clears the thread-local handle.
pub struct DispatcherRegistration {
    dispatcher: Arc<WorkDispatcher>,
}

impl Drop for DispatcherRegistration {
    fn drop(&mut self) {
        CURRENT.with(|current| {
            *current.borrow_mut() = None;
        });
        self.dispatcher.release();
    }
}
