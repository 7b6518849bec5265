//! Fixed-size pools of reusable frame buffers.
//!
//! A [`BufferPool`] allocates all of its buffers up front. Handing one out
//! moves a [`Buffer`] to the caller; whoever holds the handle owns the bytes.
//! Dropping a [`Buffer`] puts its slot back on the free list of the pool it
//! came from, so a buffer can never be leaked or owned twice.

use crate::error::{FramepipeError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pool, used to detect buffers released to the wrong pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

struct Slot {
    index: usize,
    data: Box<[u8]>,
}

struct PoolShared {
    id: PoolId,
    name: String,
    capacity: usize,
    buffer_size: usize,
    free_tx: Sender<Slot>,
    free_rx: Receiver<Slot>,
    destroyed: AtomicBool,
}

impl PoolShared {
    fn reclaim(&self, slot: Slot) {
        if self.destroyed.load(Ordering::Acquire) {
            // Pool is gone, let the memory go with the slot.
            return;
        }
        if self.free_tx.try_send(slot).is_err() {
            tracing::error!(
                pool = %self.name,
                "free list rejected a returning buffer"
            );
        }
    }
}

/// Move-only handle to one buffer of a [`BufferPool`].
pub struct Buffer {
    slot: Option<Slot>,
    used: usize,
    home: Arc<PoolShared>,
}

impl Buffer {
    /// Slot index within the owning pool.
    pub fn index(&self) -> usize {
        self.slot.as_ref().map_or(0, |s| s.index)
    }

    pub fn pool_id(&self) -> PoolId {
        self.home.id
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &str {
        &self.home.name
    }

    /// Size of the underlying region in bytes.
    pub fn capacity(&self) -> usize {
        self.slot.as_ref().map_or(0, |s| s.data.len())
    }

    /// Number of bytes holding valid data.
    pub fn bytes_used(&self) -> usize {
        self.used
    }

    /// Records how many bytes hold valid data, clamped to the capacity.
    pub fn set_bytes_used(&mut self, used: usize) {
        debug_assert!(used <= self.capacity(), "bytes_used beyond capacity");
        self.used = used.min(self.capacity());
    }

    /// The whole region, regardless of `bytes_used`.
    pub fn as_slice(&self) -> &[u8] {
        match self.slot.as_ref() {
            Some(slot) => &slot.data[..],
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.slot.as_mut() {
            Some(slot) => &mut slot.data[..],
            None => &mut [],
        }
    }

    /// The valid bytes, `&as_slice()[..bytes_used()]`.
    pub fn filled(&self) -> &[u8] {
        &self.as_slice()[..self.used]
    }

    /// Copies the valid bytes of `src` into this buffer.
    ///
    /// Copies at most `capacity()` bytes and returns the number copied.
    pub fn copy_from(&mut self, src: &Buffer) -> usize {
        let n = src.bytes_used().min(self.capacity());
        self.as_mut_slice()[..n].copy_from_slice(&src.filled()[..n]);
        self.used = n;
        n
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.home.reclaim(slot);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("pool", &self.home.name)
            .field("index", &self.index())
            .field("capacity", &self.capacity())
            .field("bytes_used", &self.used)
            .finish()
    }
}

/// Fixed set of same-sized buffers allocated once at configuration time.
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocates `capacity` buffers of `buffer_size` bytes each.
    ///
    /// Fails with [`FramepipeError::ResourceExhaustion`] if the memory cannot
    /// be reserved, and with a configuration error for zero sizes.
    pub fn create(name: impl Into<String>, capacity: usize, buffer_size: usize) -> Result<Self> {
        let name = name.into();
        if capacity == 0 || buffer_size == 0 {
            return Err(FramepipeError::configuration(format!(
                "buffer pool '{name}' needs a non-zero capacity and buffer size \
                 (got {capacity} x {buffer_size})"
            )));
        }

        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        for index in 0..capacity {
            let mut data = Vec::new();
            data.try_reserve_exact(buffer_size)
                .map_err(|e| FramepipeError::ResourceExhaustion {
                    pool: name.clone(),
                    message: format!("allocating buffer {index} of {buffer_size} bytes: {e}"),
                })?;
            data.resize(buffer_size, 0);
            let slot = Slot {
                index,
                data: data.into_boxed_slice(),
            };
            free_tx
                .try_send(slot)
                .map_err(|_| FramepipeError::ResourceExhaustion {
                    pool: name.clone(),
                    message: "free list full during allocation".to_string(),
                })?;
        }

        tracing::debug!(pool = %name, capacity, buffer_size, "buffer pool created");

        Ok(Self {
            shared: Arc::new(PoolShared {
                id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
                name,
                capacity,
                buffer_size,
                free_tx,
                free_rx,
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Takes a free buffer, or `None` when every buffer is outstanding.
    ///
    /// Never blocks and never allocates.
    pub fn get_free(&self) -> Option<Buffer> {
        let slot = self.shared.free_rx.try_recv().ok()?;
        Some(Buffer {
            slot: Some(slot),
            used: 0,
            home: Arc::clone(&self.shared),
        })
    }

    /// Takes `count` free buffers at once, for seeding a device or a peer.
    pub fn take_free(&self, count: usize) -> Result<Vec<Buffer>> {
        let mut taken = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = self
                .get_free()
                .ok_or_else(|| FramepipeError::ResourceExhaustion {
                    pool: self.shared.name.clone(),
                    message: format!("needed {count} free buffers, only {} available", taken.len()),
                })?;
            taken.push(buffer);
        }
        Ok(taken)
    }

    /// Returns a buffer to this pool.
    ///
    /// A buffer from another pool is a protocol violation; it still goes back
    /// to the pool it came from.
    pub fn release(&self, buffer: Buffer) -> Result<()> {
        if buffer.pool_id() != self.shared.id {
            let message = format!(
                "buffer {} of pool '{}' released to pool '{}'",
                buffer.index(),
                buffer.pool_name(),
                self.shared.name
            );
            tracing::error!("{message}");
            return Err(FramepipeError::protocol(message));
        }
        drop(buffer);
        Ok(())
    }

    pub fn id(&self) -> PoolId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Buffers currently available from [`get_free`](Self::get_free).
    pub fn free_count(&self) -> usize {
        self.shared.free_rx.len()
    }

    /// Buffers currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        self.shared.capacity - self.free_count()
    }

    /// Releases the pool's memory.
    ///
    /// Buffers still outstanding are forcibly reclaimed: a warning is logged
    /// and their memory is freed when their holders drop them. Returns the
    /// number of such buffers.
    pub fn destroy(self) -> usize {
        let outstanding = self.outstanding();
        self.shared.destroyed.store(true, Ordering::Release);
        let freed = self.shared.free_rx.try_iter().count();
        if outstanding > 0 {
            tracing::warn!(
                pool = %self.shared.name,
                outstanding,
                "buffer pool destroyed with buffers still outstanding"
            );
        }
        tracing::debug!(pool = %self.shared.name, freed, "buffer pool destroyed");
        outstanding
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("buffer_size", &self.shared.buffer_size)
            .field("free", &self.free_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use proptest::prelude::*;

    #[test]
    fn get_free_hands_out_at_most_capacity() {
        let pool = BufferPool::create("test", 3, 16).unwrap();
        let a = pool.get_free().unwrap();
        let b = pool.get_free().unwrap();
        let c = pool.get_free().unwrap();
        assert!(pool.get_free().is_none());
        assert_eq!(pool.outstanding(), 3);

        let mut indices = vec![a.index(), b.index(), c.index()];
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn dropping_a_buffer_returns_it() {
        let pool = BufferPool::create("test", 1, 8).unwrap();
        let buf = pool.get_free().unwrap();
        assert!(pool.get_free().is_none());
        drop(buf);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.get_free().is_some());
    }

    #[test]
    fn release_to_own_pool_succeeds() {
        let pool = BufferPool::create("test", 2, 8).unwrap();
        let buf = pool.get_free().unwrap();
        pool.release(buf).unwrap();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn release_to_foreign_pool_is_protocol_violation() {
        let a = BufferPool::create("a", 1, 8).unwrap();
        let b = BufferPool::create("b", 1, 8).unwrap();
        let buf = a.get_free().unwrap();

        let err = b.release(buf).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
        // Still found its way home.
        assert_eq!(a.free_count(), 1);
        assert_eq!(b.free_count(), 1);
    }

    #[test]
    fn zero_capacity_is_configuration_error() {
        let err = BufferPool::create("empty", 0, 8).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        let err = BufferPool::create("tiny", 2, 0).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn bytes_used_and_copy() {
        let pool = BufferPool::create("test", 2, 4).unwrap();
        let mut src = pool.get_free().unwrap();
        src.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        src.set_bytes_used(3);
        assert_eq!(src.filled(), &[1, 2, 3]);

        let mut dst = pool.get_free().unwrap();
        assert_eq!(dst.copy_from(&src), 3);
        assert_eq!(dst.filled(), &[1, 2, 3]);
    }

    #[test]
    fn copy_truncates_to_capacity() {
        let big = BufferPool::create("big", 1, 8).unwrap();
        let small = BufferPool::create("small", 1, 2).unwrap();
        let mut src = big.get_free().unwrap();
        src.as_mut_slice().copy_from_slice(&[9; 8]);
        src.set_bytes_used(8);
        let mut dst = small.get_free().unwrap();
        assert_eq!(dst.copy_from(&src), 2);
        assert_eq!(dst.bytes_used(), 2);
    }

    #[test]
    fn take_free_is_all_or_nothing() {
        let pool = BufferPool::create("test", 3, 8).unwrap();
        assert_eq!(pool.take_free(2).unwrap().len(), 2);
        // The two taken above were dropped and came back.
        let err = pool.take_free(4).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ResourceExhaustion);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn destroy_with_nothing_outstanding() {
        let pool = BufferPool::create("test", 4, 8).unwrap();
        assert_eq!(pool.destroy(), 0);
    }

    #[test]
    fn destroy_reclaims_outstanding_buffers() {
        let pool = BufferPool::create("test", 2, 8).unwrap();
        let held = pool.get_free().unwrap();
        assert_eq!(pool.destroy(), 1);
        // Holder can still use the memory safely, then drop it.
        assert_eq!(held.capacity(), 8);
        drop(held);
    }

    #[test]
    fn pools_have_distinct_ids() {
        let a = BufferPool::create("a", 1, 1).unwrap();
        let b = BufferPool::create("b", 1, 1).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.get_free().unwrap().pool_id(), a.id());
    }

    proptest! {
        /// `true` takes a buffer, `false` drops the oldest one held.
        #[test]
        fn outstanding_never_exceeds_capacity(
            capacity in 1usize..8,
            ops in prop::collection::vec(any::<bool>(), 0..100),
        ) {
            let pool = BufferPool::create("prop", capacity, 4).unwrap();
            let mut held = Vec::new();
            for take in ops {
                if take {
                    match pool.get_free() {
                        Some(buffer) => held.push(buffer),
                        None => prop_assert_eq!(held.len(), capacity),
                    }
                } else if !held.is_empty() {
                    held.remove(0);
                }
                prop_assert!(held.len() <= capacity);
                prop_assert_eq!(pool.outstanding(), held.len());
                prop_assert_eq!(pool.free_count(), capacity - held.len());
            }
        }
    }
}
