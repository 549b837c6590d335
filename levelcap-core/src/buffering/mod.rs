//! Buffers shared by the capture path.
//!
//! - [`ring`]: lock-free SPSC queue of fixed-length PCM blocks on `ringbuf`, the only
//!   structure touched by both the real-time producer and the consumer.
//! - [`history`]: consumer-owned trailing window of normalized samples.

pub mod block;
pub mod history;
pub mod ring;

pub use history::MAX_HISTORY_SECONDS;
pub use ring::{create_block_ring, BlockConsumer, BlockProducer};

/// Samples per block when nothing else is configured.
pub const DEFAULT_BLOCK_LEN: usize = 512;

/// Ring slots when nothing else is configured.
/// 64 blocks of 512 samples ≈ 0.7 s at 48 kHz, ≈ 2 s at 16 kHz.
pub const DEFAULT_RING_CAPACITY: usize = 64;
