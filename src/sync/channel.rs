//! Ordered, blocking, flushable handoff between one producer and one consumer.
//!
//! Built on an unbounded crossbeam channel. The channel itself never applies
//! backpressure: the finite supply of pool buffers bounds how many items can
//! ever be in flight.
//!
//! Besides plain `put`/`get`, the producer side can end the stream in two ways:
//!
//! * [`ChannelControl::flush`] discards everything queued; every blocked and
//!   future `get` returns [`Fetch::Flushed`]. Used to unwind on quit or failure.
//! * [`ChannelControl::close`] lets the consumer take what is already queued,
//!   after which `get` returns [`Fetch::Closed`]. Used when a source runs dry.
//!
//! Both wake a blocked consumer by dropping the only sender of an internal
//! signal channel, which makes it permanently ready.

use crate::error::FramepipeError;
use crossbeam_channel::{Receiver, Sender, TryRecvError, select};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of [`Consumer::get`].
#[derive(Debug, PartialEq, Eq)]
pub enum Fetch<T> {
    /// Next item in FIFO order.
    Item(T),
    /// The channel was flushed; queued items were discarded.
    Flushed,
    /// The producer finished and everything it sent has been delivered.
    Closed,
}

/// Returned by [`Producer::put`] when the consumer no longer exists.
///
/// Gives the item back to the caller.
pub struct PutError<T> {
    pub item: T,
    pub channel: String,
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutError")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<T> From<PutError<T>> for FramepipeError {
    fn from(err: PutError<T>) -> Self {
        let message = format!("put on channel '{}' after its consumer was destroyed", err.channel);
        tracing::error!("{message}");
        FramepipeError::protocol(message)
    }
}

struct Shared<T> {
    name: String,
    flushed: AtomicBool,
    closed: AtomicBool,
    consumer_alive: AtomicBool,
    /// Second handle on the queue so a flush can drain it from any thread.
    queue: Receiver<T>,
    /// Never sent on; dropping it wakes every `select` on the signal receiver.
    signal: Mutex<Option<Sender<()>>>,
}

impl<T> Shared<T> {
    fn wake_consumer(&self) {
        self.signal.lock().take();
    }

    fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Creates a channel named `name` (used in logs and errors).
pub fn channel<T>(name: impl Into<String>) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (signal_tx, signal_rx) = crossbeam_channel::bounded(0);
    let shared = Arc::new(Shared {
        name: name.into(),
        flushed: AtomicBool::new(false),
        closed: AtomicBool::new(false),
        consumer_alive: AtomicBool::new(true),
        queue: rx.clone(),
        signal: Mutex::new(Some(signal_tx)),
    });
    let producer = Producer {
        tx,
        control: ChannelControl {
            shared: Arc::clone(&shared),
        },
    };
    let consumer = Consumer {
        rx,
        signal_rx,
        shared,
    };
    (producer, consumer)
}

/// Flush/close handle that can be cloned and held away from the producer.
pub struct ChannelControl<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ChannelControl<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ChannelControl<T> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Discards queued items and wakes the consumer. Idempotent.
    ///
    /// Returns the drained items; dropping them is how pool buffers find
    /// their way home.
    pub fn flush(&self) -> Vec<T> {
        self.shared.flushed.store(true, Ordering::SeqCst);
        self.shared.wake_consumer();
        let drained: Vec<T> = self.shared.queue.try_iter().collect();
        tracing::trace!(channel = %self.shared.name, drained = drained.len(), "flushed");
        drained
    }

    /// Ends the stream after the items already queued. Idempotent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake_consumer();
        tracing::trace!(channel = %self.shared.name, "closed");
    }

    pub fn is_flushed(&self) -> bool {
        self.shared.is_flushed()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }
}

/// Type-erased view of a channel's producer side, for draining at shutdown.
pub trait OutputPort: Send + Sync {
    fn name(&self) -> &str;

    /// Flushes and drops whatever was queued; returns how many items that was.
    fn flush_discard(&self) -> usize;

    fn close(&self);
}

impl<T: Send> OutputPort for ChannelControl<T> {
    fn name(&self) -> &str {
        ChannelControl::name(self)
    }

    fn flush_discard(&self) -> usize {
        self.flush().len()
    }

    fn close(&self) {
        ChannelControl::close(self)
    }
}

/// Sending half. Exactly one per channel.
pub struct Producer<T> {
    tx: Sender<T>,
    control: ChannelControl<T>,
}

impl<T> Producer<T> {
    /// Appends an item and wakes the consumer.
    ///
    /// After a flush the item is dropped instead. Fails only when the
    /// consumer has been destroyed.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        let shared = &self.control.shared;
        if !shared.consumer_alive.load(Ordering::SeqCst) {
            return Err(PutError {
                item,
                channel: shared.name.clone(),
            });
        }
        if shared.is_flushed() {
            drop(item);
            return Ok(());
        }
        // The shared queue handle keeps the receiving side connected.
        self.tx.send(item).map_err(|e| PutError {
            item: e.0,
            channel: shared.name.clone(),
        })
    }

    pub fn flush(&self) -> Vec<T> {
        self.control.flush()
    }

    pub fn close(&self) {
        self.control.close()
    }

    /// A handle that can flush or close this channel from another thread.
    pub fn control(&self) -> ChannelControl<T> {
        self.control.clone()
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }
}

/// Receiving half. Exactly one per channel.
pub struct Consumer<T> {
    rx: Receiver<T>,
    signal_rx: Receiver<()>,
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Blocks until an item arrives or the stream ends.
    ///
    /// Returns [`FramepipeError::ChannelDestroyed`] if the producer went away
    /// without flushing or closing.
    pub fn get(&self) -> Result<Fetch<T>, FramepipeError> {
        if self.shared.is_flushed() {
            return Ok(Fetch::Flushed);
        }

        select! {
            recv(self.rx) -> msg => match msg {
                Ok(item) => Ok(self.deliver(item)),
                Err(_) => self.disconnected(),
            },
            recv(self.signal_rx) -> _ => {
                if self.shared.is_flushed() {
                    Ok(Fetch::Flushed)
                } else {
                    match self.rx.try_recv() {
                        Ok(item) => Ok(self.deliver(item)),
                        Err(TryRecvError::Empty) => Ok(Fetch::Closed),
                        Err(TryRecvError::Disconnected) => self.disconnected(),
                    }
                }
            },
        }
    }

    fn deliver(&self, item: T) -> Fetch<T> {
        // Raced with a flush: the item belongs to the discarded backlog.
        if self.shared.is_flushed() {
            drop(item);
            return Fetch::Flushed;
        }
        Fetch::Item(item)
    }

    fn disconnected(&self) -> Result<Fetch<T>, FramepipeError> {
        if self.shared.is_flushed() {
            Ok(Fetch::Flushed)
        } else if self.shared.is_closed() {
            Ok(Fetch::Closed)
        } else {
            Err(FramepipeError::ChannelDestroyed {
                channel: self.shared.name.clone(),
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.shared.consumer_alive.store(false, Ordering::SeqCst);
    }
}
