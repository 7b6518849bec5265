//! Two-party barrier that carries one negotiated value.

use crate::sync::barrier::{Barrier, Meet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Publishes a value from one thread to another at a rendezvous.
///
/// The publisher stores the value and meets; the receiver meets and takes
/// it. Either side blocks until the other arrives. If the publisher fails
/// it forces the barrier with [`abandon`](Handoff::abandon) and the
/// receiver gets `None`.
#[derive(Debug)]
pub struct Handoff<T> {
    barrier: Arc<Barrier>,
    slot: Mutex<Option<T>>,
}

impl<T> Handoff<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            barrier: Arc::new(Barrier::pair(name)),
            slot: Mutex::new(None),
        }
    }

    /// Stores `value` and waits for the receiver.
    pub fn publish(&self, value: T) -> Meet {
        *self.slot.lock() = Some(value);
        self.barrier.meet()
    }

    /// Waits for the publisher and takes the value.
    pub fn receive(&self) -> Option<T> {
        match self.barrier.meet() {
            Meet::Complete => self.slot.lock().take(),
            Meet::Forced => {
                self.slot.lock().take();
                None
            }
        }
    }

    /// Releases the other side without a value.
    pub fn abandon(&self) {
        self.barrier.force();
    }

    /// The underlying barrier, for forcing during a drain.
    pub fn barrier(&self) -> Arc<Barrier> {
        Arc::clone(&self.barrier)
    }
}
