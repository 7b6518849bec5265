//! Lossy, most-recent-wins side channel for publishing encoded data.
//!
//! A single slot: the writer never blocks, and an update is dropped while the
//! reader has not yet taken the previous one. Payloads larger than the slot
//! are truncated.

use crate::error::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Non-blocking publisher used by the writer stage.
pub trait SideChannel: Send + Sync + std::fmt::Debug {
    /// Offers `data` to the reader.
    ///
    /// Returns `Ok(true)` if it was published, `Ok(false)` if dropped
    /// because the slot was still occupied.
    fn publish(&self, data: &[u8]) -> Result<bool>;
}

/// Writer end of an in-process snapshot slot.
#[derive(Debug, Clone)]
pub struct SnapshotSlot {
    tx: Sender<Vec<u8>>,
    capacity: usize,
}

/// Reader end of an in-process snapshot slot.
#[derive(Debug)]
pub struct SnapshotReader {
    rx: Receiver<Vec<u8>>,
}

/// Creates a slot whose payloads are capped at `capacity` bytes.
pub fn snapshot_slot(capacity: usize) -> (SnapshotSlot, SnapshotReader) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (SnapshotSlot { tx, capacity }, SnapshotReader { rx })
}

impl SideChannel for SnapshotSlot {
    fn publish(&self, data: &[u8]) -> Result<bool> {
        let len = data.len().min(self.capacity);
        match self.tx.try_send(data[..len].to_vec()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            // Nobody is listening any more; treat like a busy slot.
            Err(TrySendError::Disconnected(_)) => Ok(false),
        }
    }
}

impl SnapshotReader {
    /// Takes the pending snapshot, if any.
    pub fn try_take(&self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for a snapshot.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(data) => Some(data),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_take() {
        let (slot, reader) = snapshot_slot(16);
        assert!(slot.publish(b"frame").unwrap());
        assert_eq!(reader.try_take(), Some(b"frame".to_vec()));
        assert_eq!(reader.try_take(), None);
    }

    #[test]
    fn busy_slot_drops_update() {
        let (slot, reader) = snapshot_slot(16);
        assert!(slot.publish(b"first").unwrap());
        assert!(!slot.publish(b"second").unwrap());
        assert_eq!(reader.try_take(), Some(b"first".to_vec()));
        assert!(slot.publish(b"third").unwrap());
    }

    #[test]
    fn payload_truncated_to_capacity() {
        let (slot, reader) = snapshot_slot(3);
        slot.publish(b"abcdef").unwrap();
        assert_eq!(reader.try_take(), Some(b"abc".to_vec()));
    }

    #[test]
    fn publish_without_reader_is_dropped() {
        let (slot, reader) = snapshot_slot(8);
        drop(reader);
        assert!(!slot.publish(b"x").unwrap());
    }

    #[test]
    fn take_timeout_expires() {
        let (_slot, reader) = snapshot_slot(8);
        assert_eq!(reader.take_timeout(Duration::from_millis(10)), None);
    }
}
