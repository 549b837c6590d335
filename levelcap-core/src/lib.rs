//! # levelcap-core
//!
//! Live input capture with a running loudness estimate.
//!
//! ## Architecture
//!
//! ```text
//! Device callback ─┐                                 ┌─► RMS per block
//!                  ├─► CaptureProducer ─► BlockRing ─┤
//! Pull source ─────┘   (RT, wait-free)    (SPSC)     ├─► HistoryBuffer (trailing window)
//!                                                    └─► LevelReport every status interval
//! ```
//!
//! The producer side never blocks, allocates or logs. All heap work and
//! all I/O happen on the session thread that runs the consumer loop.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod level;

// Convenience re-exports for downstream crates
pub use audio::SourceSpec;
pub use buffering::{block::AudioBlock, history::HistoryBuffer};
pub use engine::{IdlePolicy, LevelEngine, SessionConfig};
pub use error::LevelcapError;
pub use events::{LevelReport, SessionStatus, SessionStatusEvent, SessionSummary, StopReason};
