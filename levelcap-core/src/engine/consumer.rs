//! Blocking consumer loop.
//!
//! ## Per iteration
//!
//! ```text
//! 0. Check stop conditions (cancel flag, backend failure, session deadline)
//! 1. Pop one block from the ring; on empty, finish if the source is done,
//!    otherwise idle
//! 2. RMS over the popped block
//! 3. Append the block's normalized samples to the history window
//! 4. Every status interval, publish a LevelReport
//! ```
//!
//! This loop runs on the session thread. It is the only place where
//! captured audio is allocated, logged or published.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{idle::IdleStrategy, SessionConfig};
use crate::{
    audio::SourceHealth,
    buffering::{history::HistoryBuffer, BlockConsumer},
    events::{LevelReport, SessionSummary, StopReason},
    level::{compute_rms, rms_to_dbfs},
};

/// Counters shared by the producer (wait-free increments) and the consumer.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub periods_received: AtomicU64,
    pub periods_skipped: AtomicU64,
    pub overflow_periods: AtomicU64,
    pub blocks_queued: AtomicU64,
    pub blocks_consumed: AtomicU64,
    pub blocks_discarded: AtomicU64,
    pub reports_emitted: AtomicU64,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.periods_received.store(0, Ordering::Relaxed);
        self.periods_skipped.store(0, Ordering::Relaxed);
        self.overflow_periods.store(0, Ordering::Relaxed);
        self.blocks_queued.store(0, Ordering::Relaxed);
        self.blocks_consumed.store(0, Ordering::Relaxed);
        self.blocks_discarded.store(0, Ordering::Relaxed);
        self.reports_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            periods_received: self.periods_received.load(Ordering::Relaxed),
            periods_skipped: self.periods_skipped.load(Ordering::Relaxed),
            overflow_periods: self.overflow_periods.load(Ordering::Relaxed),
            blocks_queued: self.blocks_queued.load(Ordering::Relaxed),
            blocks_consumed: self.blocks_consumed.load(Ordering::Relaxed),
            blocks_discarded: self.blocks_discarded.load(Ordering::Relaxed),
            reports_emitted: self.reports_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub periods_received: u64,
    pub periods_skipped: u64,
    pub overflow_periods: u64,
    pub blocks_queued: u64,
    pub blocks_consumed: u64,
    pub blocks_discarded: u64,
    pub reports_emitted: u64,
}

/// Everything the consumer loop needs, passed as one struct so the session
/// closure stays tidy.
pub struct ConsumerContext {
    pub config: SessionConfig,
    pub consumer: BlockConsumer,
    pub history: HistoryBuffer,
    pub idle: Box<dyn IdleStrategy>,
    /// External cancellation: the loop exits once this reads `false`.
    pub running: Arc<AtomicBool>,
    pub health: Arc<SourceHealth>,
    pub report_tx: broadcast::Sender<LevelReport>,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub sample_rate: u32,
}

/// How the loop ended, handed to [`drain_and_summarize`].
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub stop_reason: StopReason,
    pub last_rms: Option<f64>,
    pub started: Instant,
}

/// Run until cancelled, the deadline passes, the backend fails, or a
/// finished source has been fully drained.
pub fn run(ctx: &mut ConsumerContext) -> LoopOutcome {
    let started = Instant::now();
    let deadline = ctx.config.session_duration().map(|d| started + d);
    let status_interval = ctx.config.status_interval();

    info!(
        sample_rate = ctx.sample_rate,
        block_len = ctx.consumer.block_len(),
        ring_capacity = ctx.consumer.capacity(),
        history_capacity = ctx.history.capacity(),
        deadline_ms = ctx.config.session_duration_ms,
        "consumer loop started"
    );

    // Pop target, reused every iteration.
    let mut block = ctx.consumer.new_block();
    let mut last_rms: Option<f64> = None;
    // The first consumed block always reports.
    let mut next_report_at = started;
    let mut reporter = Reporter::default();

    let stop_reason = loop {
        // ── 0. Stop conditions ────────────────────────────────────────────
        if !ctx.running.load(Ordering::Acquire) {
            break StopReason::Cancelled;
        }
        if ctx.health.has_failed() {
            let message = ctx
                .health
                .fatal_error()
                .unwrap_or_else(|| "audio backend failed".into());
            break StopReason::BackendFailed(message);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break StopReason::DurationElapsed;
        }

        // ── 1. Pop ────────────────────────────────────────────────────────
        if !ctx.consumer.pop(&mut block) {
            if ctx.health.is_finished() && ctx.consumer.is_empty() {
                break StopReason::SourceFinished;
            }
            ctx.idle.idle();
            continue;
        }
        ctx.idle.reset();

        // ── 2. RMS ────────────────────────────────────────────────────────
        let rms = compute_rms(block.samples());
        if last_rms.is_none() {
            info!(rms = format_args!("{:.4}", rms), "first block RMS");
        }
        last_rms = Some(rms);

        // ── 3. History ────────────────────────────────────────────────────
        ctx.history.append_pcm(block.samples());
        ctx.diagnostics
            .blocks_consumed
            .fetch_add(1, Ordering::Relaxed);

        // ── 4. Status cadence ─────────────────────────────────────────────
        let now = Instant::now();
        if now >= next_report_at {
            reporter.emit(ctx, rms);
            next_report_at = now + status_interval;
        }
    };

    info!(reason = ?stop_reason, "consumer loop stopped");

    LoopOutcome {
        stop_reason,
        last_rms,
        started,
    }
}

/// Publishes reports and warns when loss counters advanced since the last one.
#[derive(Default)]
struct Reporter {
    seq: u64,
    seen_dropped: u64,
    seen_overflows: u64,
}

impl Reporter {
    fn emit(&mut self, ctx: &ConsumerContext, rms: f64) {
        let dropped_blocks = ctx.consumer.dropped_blocks();
        let overflow_periods = ctx.diagnostics.overflow_periods.load(Ordering::Relaxed);

        if dropped_blocks > self.seen_dropped {
            warn!(
                dropped = dropped_blocks - self.seen_dropped,
                total = dropped_blocks,
                "ring buffer full, blocks dropped"
            );
            self.seen_dropped = dropped_blocks;
        }
        if overflow_periods > self.seen_overflows {
            warn!(
                periods = overflow_periods - self.seen_overflows,
                total = overflow_periods,
                "input overflow reported by backend"
            );
            self.seen_overflows = overflow_periods;
        }

        let report = LevelReport {
            seq: self.seq,
            rms,
            dbfs: rms_to_dbfs(rms),
            history_samples: ctx.history.size(),
            history_ms: ctx.history.duration_ms(),
            blocks_consumed: ctx.diagnostics.blocks_consumed.load(Ordering::Relaxed),
            dropped_blocks,
            overflow_periods,
        };
        self.seq += 1;

        debug!(
            seq = report.seq,
            rms = format_args!("{:.6}", report.rms),
            history_samples = report.history_samples,
            history_ms = format_args!("{:.1}", report.history_ms),
            "status"
        );
        ctx.diagnostics
            .reports_emitted
            .fetch_add(1, Ordering::Relaxed);
        let _ = ctx.report_tx.send(report);
    }
}

/// Discard whatever is still queued and build the session summary.
///
/// Call only after the source has been stopped, so nothing is pushed
/// behind the drain.
pub fn drain_and_summarize(ctx: &mut ConsumerContext, outcome: LoopOutcome) -> SessionSummary {
    let discarded = ctx.consumer.discard_all() as u64;
    if discarded > 0 {
        debug!(discarded, "discarded queued blocks at shutdown");
    }
    ctx.diagnostics
        .blocks_discarded
        .fetch_add(discarded, Ordering::Relaxed);

    let snap = ctx.diagnostics.snapshot();
    SessionSummary {
        stop_reason: outcome.stop_reason,
        sample_rate: ctx.sample_rate,
        periods_received: snap.periods_received,
        periods_skipped: snap.periods_skipped,
        overflow_periods: snap.overflow_periods,
        blocks_consumed: snap.blocks_consumed,
        dropped_blocks: ctx.consumer.dropped_blocks(),
        discarded_blocks: snap.blocks_discarded,
        reports_emitted: snap.reports_emitted,
        last_rms: outcome.last_rms,
        history_samples: ctx.history.size(),
        history_ms: ctx.history.duration_ms(),
        elapsed_ms: duration_ms(outcome.started.elapsed()),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
