//! Event and report types published by a capture session.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` with camelCase
//! field names so the CLI can print them as JSON lines.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Level reports
// ---------------------------------------------------------------------------

/// Periodic status emitted by the consumer loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReport {
    /// Monotonically increasing report sequence number.
    pub seq: u64,
    /// RMS of the most recent block, normalized scale.
    pub rms: f64,
    /// `rms` in dBFS, floored at -120.
    pub dbfs: f64,
    /// Samples currently held in the history window.
    pub history_samples: usize,
    /// Duration of the history window in milliseconds.
    pub history_ms: f32,
    /// Blocks consumed since the session started.
    pub blocks_consumed: u64,
    /// Blocks dropped by the producer because the ring was full.
    pub dropped_blocks: u64,
    /// Periods the backend flagged as overrun.
    pub overflow_periods: u64,
}

impl fmt::Display for LevelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RMS: {:.6} | history: {} samples ({:.1} ms)",
            self.rms, self.history_samples, self.history_ms
        )
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Current state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Engine created, `start()` not yet called.
    Idle,
    /// Source open, consumer loop running.
    Capturing,
    /// Session ended normally; the engine may be restarted.
    Stopped,
    /// Session ended on a backend-fatal error.
    Error,
}

/// Published whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Why the consumer loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum StopReason {
    /// `stop()` was called.
    Cancelled,
    /// The configured session duration elapsed.
    DurationElapsed,
    /// A pull source ran out of periods and the ring was drained.
    SourceFinished,
    /// The backend reported a fatal error.
    BackendFailed(String),
}

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

/// Final accounting for one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub stop_reason: StopReason,
    pub sample_rate: u32,
    pub periods_received: u64,
    pub periods_skipped: u64,
    pub overflow_periods: u64,
    pub blocks_consumed: u64,
    /// Blocks lost because the ring was full.
    pub dropped_blocks: u64,
    /// Blocks still queued at shutdown and discarded unread.
    pub discarded_blocks: u64,
    pub reports_emitted: u64,
    pub last_rms: Option<f64>,
    pub history_samples: usize,
    pub history_ms: f32,
    pub elapsed_ms: u64,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "consumed blocks: {} | dropped blocks: {} | discarded at shutdown: {} | ",
            self.blocks_consumed, self.dropped_blocks, self.discarded_blocks,
        )?;
        write!(
            f,
            "overflow periods: {} | history: {} samples ({:.1} ms) | elapsed: {} ms",
            self.overflow_periods, self.history_samples, self.history_ms, self.elapsed_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> LevelReport {
        LevelReport {
            seq: 4,
            rms: 0.0123456,
            dbfs: -38.17,
            history_samples: 4_096,
            history_ms: 85.333,
            blocks_consumed: 8,
            dropped_blocks: 0,
            overflow_periods: 1,
        }
    }

    #[test]
    fn status_line_has_six_decimal_rms_and_history_depth() {
        assert_eq!(
            report().to_string(),
            "RMS: 0.012346 | history: 4096 samples (85.3 ms)"
        );
    }

    #[test]
    fn level_report_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(report()).expect("serialize report");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["historySamples"], 4_096);
        assert_eq!(json["droppedBlocks"], 0);
        assert_eq!(json["overflowPeriods"], 1);

        let round_trip: LevelReport = serde_json::from_value(json).expect("deserialize report");
        assert_eq!(round_trip.blocks_consumed, 8);
    }

    #[test]
    fn session_status_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::Capturing,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status");
        assert_eq!(json["status"], "capturing");
        assert!(json["detail"].is_null());
    }

    #[test]
    fn stop_reason_is_tagged() {
        let json = serde_json::to_value(StopReason::BackendFailed("gone".into()))
            .expect("serialize stop reason");
        assert_eq!(json["kind"], "backendFailed");
        assert_eq!(json["detail"], "gone");

        let json = serde_json::to_value(StopReason::Cancelled).expect("serialize stop reason");
        assert_eq!(json["kind"], "cancelled");
    }

    #[test]
    fn summary_line_reports_dropped_blocks() {
        let summary = SessionSummary {
            stop_reason: StopReason::DurationElapsed,
            sample_rate: 48_000,
            periods_received: 10,
            periods_skipped: 0,
            overflow_periods: 0,
            blocks_consumed: 9,
            dropped_blocks: 1,
            discarded_blocks: 0,
            reports_emitted: 3,
            last_rms: Some(0.1),
            history_samples: 4_608,
            history_ms: 96.0,
            elapsed_ms: 1_000,
        };
        assert!(summary.to_string().contains("dropped blocks: 1"));
    }
}
