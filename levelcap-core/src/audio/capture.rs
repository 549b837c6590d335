//! Real-time side of the pipeline: one call per delivered period.
//!
//! # Design constraints
//!
//! [`CaptureProducer::on_period`] runs on the backend's audio thread (or the
//! pull driver's thread, which has the same contract). It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O, including logging
//!
//! It only copies into a pre-allocated ring slot and bumps relaxed atomics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::buffering::BlockProducer;
use crate::engine::consumer::SessionDiagnostics;

/// What happened to one delivered period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    /// Copied into the ring.
    Queued,
    /// Ring was full; the block is lost and counted as dropped.
    Dropped,
    /// No input, or a sample count other than the block length. Nothing
    /// was written to the ring.
    Skipped,
}

/// Turns backend periods into ring blocks.
pub struct CaptureProducer {
    ring: BlockProducer,
    diagnostics: Arc<SessionDiagnostics>,
}

impl CaptureProducer {
    pub fn new(ring: BlockProducer, diagnostics: Arc<SessionDiagnostics>) -> Self {
        Self { ring, diagnostics }
    }

    /// Handle one period delivered by the backend.
    ///
    /// - `samples`: `None` when the backend had no input for this period.
    /// - `overflow`: the backend detected an overrun before this delivery.
    ///   The period is still forwarded on a best-effort basis.
    pub fn on_period(&mut self, samples: Option<&[i16]>, overflow: bool) -> PeriodOutcome {
        let diag = &*self.diagnostics;
        diag.periods_received.fetch_add(1, Ordering::Relaxed);
        if overflow {
            diag.overflow_periods.fetch_add(1, Ordering::Relaxed);
        }

        let samples = match samples {
            Some(s) if s.len() == self.ring.block_len() => s,
            _ => {
                diag.periods_skipped.fetch_add(1, Ordering::Relaxed);
                return PeriodOutcome::Skipped;
            }
        };

        if self.ring.push(samples) {
            diag.blocks_queued.fetch_add(1, Ordering::Relaxed);
            PeriodOutcome::Queued
        } else {
            PeriodOutcome::Dropped
        }
    }

    pub fn block_len(&self) -> usize {
        self.ring.block_len()
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.ring.dropped_blocks()
    }
}
