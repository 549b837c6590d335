//! Single-producer/single-consumer ring of fixed-length PCM blocks.
//!
//! Built on a [`ringbuf::HeapRb`] of `capacity * block_len` samples. A block
//! is only ever pushed or popped whole: the producer writes a block with one
//! `push_slice` when at least `block_len` samples are vacant, and the
//! consumer reads one with `pop_slice` when at least `block_len` samples are
//! occupied. The occupied length is therefore always a multiple of
//! `block_len` and a reader never sees a torn block.
//!
//! `ringbuf` has no notion of a refused push, so the drop counter is an
//! `AtomicU64` shared by both halves.
//!
//! Both halves are `Send` but not `Clone`, and every mutating method takes
//! `&mut self`, so the single-writer/single-reader discipline is enforced
//! by the type system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use super::block::AudioBlock;
use crate::error::{LevelcapError, Result};

/// Create a matched producer/consumer pair with `capacity` slots of
/// `block_len` samples each. All sample memory is allocated here, up front.
///
/// # Errors
/// `LevelcapError::InvalidConfig` if `capacity` is zero or not a power of two,
/// if `block_len` is zero, or if the total sample count overflows `usize`.
pub fn create_block_ring(
    capacity: usize,
    block_len: usize,
) -> Result<(BlockProducer, BlockConsumer)> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(LevelcapError::InvalidConfig(format!(
            "ring capacity must be a non-zero power of two, got {capacity}"
        )));
    }
    if block_len == 0 {
        return Err(LevelcapError::InvalidConfig(
            "block length must be at least one sample".into(),
        ));
    }
    let samples = capacity.checked_mul(block_len).ok_or_else(|| {
        LevelcapError::InvalidConfig(format!(
            "ring of {capacity} blocks of {block_len} samples is too large"
        ))
    })?;

    let (producer, consumer) = HeapRb::<i16>::new(samples).split();
    let dropped = Arc::new(AtomicU64::new(0));

    Ok((
        BlockProducer {
            inner: producer,
            block_len,
            dropped: Arc::clone(&dropped),
        },
        BlockConsumer {
            inner: consumer,
            block_len,
            dropped,
        },
    ))
}

/// Producer half. Held by whatever delivers periods (device callback or
/// pull driver).
pub struct BlockProducer {
    inner: HeapProd<i16>,
    block_len: usize,
    dropped: Arc<AtomicU64>,
}

impl BlockProducer {
    /// Enqueue one block by copying `samples` into the ring.
    ///
    /// Returns `false` when the ring is full; the block is lost and the
    /// dropped counter is incremented exactly once. Never blocks and never
    /// allocates.
    ///
    /// `samples` must be exactly [`block_len`](Self::block_len) long. A
    /// slice of any other length is refused with `false` and does not count
    /// as a drop.
    pub fn push(&mut self, samples: &[i16]) -> bool {
        if samples.len() != self.block_len {
            return false;
        }
        if self.inner.vacant_len() < self.block_len {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.inner.push_slice(samples) == self.block_len
    }

    /// Enqueue a prepared block. See [`push`](Self::push).
    pub fn push_block(&mut self, block: &AudioBlock) -> bool {
        self.push(block.samples())
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Capacity in blocks.
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get() / self.block_len
    }

    /// Blocks refused because the ring was full, since creation.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half. Held by the session thread.
pub struct BlockConsumer {
    inner: HeapCons<i16>,
    block_len: usize,
    dropped: Arc<AtomicU64>,
}

impl BlockConsumer {
    /// Dequeue the oldest block into `out`.
    ///
    /// Returns `false` when the ring is empty, in which case the ring
    /// indices are not modified and `out` is left untouched.
    pub fn pop(&mut self, out: &mut AudioBlock) -> bool {
        if self.inner.occupied_len() < self.block_len {
            return false;
        }
        if out.len() != self.block_len {
            *out = self.new_block();
        }
        self.inner.pop_slice(out.samples_mut()) == self.block_len
    }

    /// Allocating convenience around [`pop`](Self::pop).
    pub fn pop_block(&mut self) -> Option<AudioBlock> {
        let mut block = self.new_block();
        self.pop(&mut block).then_some(block)
    }

    /// Discard every block currently queued and return how many were
    /// discarded. Used at shutdown after the producer has been stopped.
    pub fn discard_all(&mut self) -> usize {
        self.inner.clear() / self.block_len
    }

    /// A zeroed block of the ring's block length, for use as a pop target.
    pub fn new_block(&self) -> AudioBlock {
        AudioBlock::zeroed(self.block_len)
    }

    /// Blocks currently queued.
    pub fn len(&self) -> usize {
        self.inner.occupied_len() / self.block_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current `(write, read)` sample indices of the underlying ring.
    pub fn positions(&self) -> (usize, usize) {
        (self.inner.write_index(), self.inner.read_index())
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Capacity in blocks.
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get() / self.block_len
    }

    /// Blocks refused by the producer because the ring was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
