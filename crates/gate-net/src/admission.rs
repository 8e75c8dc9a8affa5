//! Lock-free admission control.
//!
//! # How it works (for beginners)
//!
//! The counter holds *remaining capacity*, not a live count.  It starts at
//! the configured maximum.  Admitting a link subtracts one with a
//! compare-and-swap that refuses to go below zero; the returned
//! [`AdmissionPermit`] adds the one back when it is dropped.
//!
//! Because the permit is the only way to give capacity back, a link that was
//! admitted exactly once releases exactly once, no matter which task ends up
//! dropping it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared remaining-capacity counter for one listening server.
#[derive(Debug, Clone)]
pub struct Admission {
    remaining: Arc<AtomicUsize>,
    capacity: usize,
}

impl Admission {
    pub fn new(capacity: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(capacity)),
            capacity,
        }
    }

    /// Claims one slot, or returns `None` if capacity is exhausted.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| AdmissionPermit {
                remaining: Arc::clone(&self.remaining),
            })
    }

    /// Slots currently free.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// The configured maximum.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One admitted slot.  Dropping it returns the slot to the counter.
#[derive(Debug)]
pub struct AdmissionPermit {
    remaining: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.remaining.fetch_add(1, Ordering::AcqRel);
    }
}
