//! `LevelEngine`: capture session lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! LevelEngine::new(config)
//!     └─► start(source)   → source open, consumer loop running, status = Capturing
//!         └─► stop()      → running=false (external cancellation)
//!             └─► wait()  → SessionSummary, status = Stopped | Error
//! ```
//!
//! A session also ends on its own when the configured duration elapses, a
//! pull source is exhausted, or the backend fails.
//!
//! ## Threading
//!
//! Each session owns one OS thread (`levelcap-session`). The source is
//! opened *on that thread* because `cpal::Stream` is `!Send`; a sync
//! oneshot carries the open result back to `start()`. The same thread runs
//! the consumer loop, stops the source and drains the ring, so the stream
//! is created and dropped on one thread.

pub mod consumer;
pub mod idle;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    audio::{capture::CaptureProducer, open_source, SourceHealth, SourceSpec},
    buffering::{
        create_block_ring, history::HistoryBuffer, DEFAULT_BLOCK_LEN, DEFAULT_RING_CAPACITY,
        MAX_HISTORY_SECONDS,
    },
    error::{LevelcapError, Result},
    events::{LevelReport, SessionStatus, SessionStatusEvent, SessionSummary, StopReason},
};
use consumer::{ConsumerContext, DiagnosticsSnapshot, SessionDiagnostics};

pub use idle::IdlePolicy;

/// Broadcast capacity for report and status channels.
const BROADCAST_CAP: usize = 256;

/// Per-session configuration. Read once by `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Samples per block. Default: 512.
    pub block_len: usize,
    /// Ring slots, a non-zero power of two. Default: 64.
    pub ring_capacity: usize,
    /// History window length, at most one hour. Default: 3.0 s.
    pub history_seconds: f32,
    /// Status report cadence. Default: 100 ms.
    pub status_interval_ms: u64,
    /// `None` runs until `stop()` is called.
    pub session_duration_ms: Option<u64>,
    pub idle: IdlePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_len: DEFAULT_BLOCK_LEN,
            ring_capacity: DEFAULT_RING_CAPACITY,
            history_seconds: 3.0,
            status_interval_ms: 100,
            session_duration_ms: None,
            idle: IdlePolicy::default(),
        }
    }
}

impl SessionConfig {
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.block_len == 0 {
            return Err(LevelcapError::InvalidConfig("blockLen must be > 0".into()));
        }
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err(LevelcapError::InvalidConfig(format!(
                "ringCapacity must be a non-zero power of two, got {}",
                self.ring_capacity
            )));
        }
        if !self.history_seconds.is_finite()
            || self.history_seconds <= 0.0
            || self.history_seconds > MAX_HISTORY_SECONDS
        {
            return Err(LevelcapError::InvalidConfig(format!(
                "historySeconds must be in (0, {MAX_HISTORY_SECONDS}], got {}",
                self.history_seconds
            )));
        }
        if self.status_interval_ms == 0 {
            return Err(LevelcapError::InvalidConfig(
                "statusIntervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn session_duration(&self) -> Option<Duration> {
        self.session_duration_ms.map(Duration::from_millis)
    }
}

/// Status slot plus its broadcast channel; cloned into the session thread.
#[derive(Clone)]
struct StatusPublisher {
    current: Arc<Mutex<SessionStatus>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StatusPublisher {
    fn set(&self, status: SessionStatus, detail: Option<String>) {
        *self.current.lock() = status;
        let _ = self.tx.send(SessionStatusEvent { status, detail });
    }
}

/// Resolves the session to `Error` if the session thread unwinds, so
/// subscribers waiting for a terminal status are released.
struct UnwindGuard {
    running: Arc<AtomicBool>,
    status: StatusPublisher,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.running.store(false, Ordering::SeqCst);
            error!("session thread panicked");
            self.status
                .set(SessionStatus::Error, Some("session thread panicked".into()));
        }
    }
}

/// The top-level session handle.
///
/// `Send + Sync`; all fields use interior mutability.
pub struct LevelEngine {
    config: SessionConfig,
    /// `true` while a session is capturing. Cleared by `stop()` or by the
    /// session itself when it ends.
    running: Arc<AtomicBool>,
    status: StatusPublisher,
    report_tx: broadcast::Sender<LevelReport>,
    diagnostics: Arc<SessionDiagnostics>,
    worker: Mutex<Option<JoinHandle<Result<SessionSummary>>>>,
}

impl LevelEngine {
    /// Create an idle engine. Nothing is opened until `start()`.
    pub fn new(config: SessionConfig) -> Self {
        let (report_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: StatusPublisher {
                current: Arc::new(Mutex::new(SessionStatus::Idle)),
                tx: status_tx,
            },
            report_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open `source` and start the consumer loop.
    ///
    /// Blocks until the source is confirmed open (or fails), then returns.
    /// Returns the source's sample rate.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session is active.
    /// - `InvalidConfig` if the config does not validate.
    /// - Device, stream or source errors from opening the source.
    pub fn start(&self, source: SourceSpec) -> Result<u32> {
        self.config.validate()?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LevelcapError::AlreadyRunning);
        }

        // Reap a session that ended on its own and was never waited on.
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        self.diagnostics.reset();
        let (ring, consumer) =
            match create_block_ring(self.config.ring_capacity, self.config.block_len) {
                Ok(halves) => halves,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let status = self.status.clone();
        let report_tx = self.report_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        // Session thread signals open success (with the sample rate) or failure.
        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        let spawned = thread::Builder::new()
            .name("levelcap-session".into())
            .spawn(move || -> Result<SessionSummary> {
                let _unwind = UnwindGuard {
                    running: Arc::clone(&running),
                    status: status.clone(),
                };
                let health = Arc::new(SourceHealth::default());
                let producer = CaptureProducer::new(ring, Arc::clone(&diagnostics));

                // ── Open source (must happen on THIS thread) ─────────────────
                let (mut source, sample_rate) =
                    match open_source(source, config.block_len, producer, Arc::clone(&health)) {
                        Ok(opened) => opened,
                        Err(e) => {
                            let message = e.to_string();
                            running.store(false, Ordering::SeqCst);
                            let _ = open_tx.send(Err(e));
                            return Err(LevelcapError::Source(message));
                        }
                    };
                let history =
                    match HistoryBuffer::with_duration(sample_rate, config.history_seconds) {
                        Ok(history) => history,
                        Err(e) => {
                            source.stop();
                            drop(source);
                            let message = e.to_string();
                            running.store(false, Ordering::SeqCst);
                            let _ = open_tx.send(Err(e));
                            return Err(LevelcapError::InvalidConfig(message));
                        }
                    };
                status.set(SessionStatus::Capturing, None);
                let _ = open_tx.send(Ok(sample_rate));

                // ── Consume ──────────────────────────────────────────────────
                let mut ctx = ConsumerContext {
                    history,
                    idle: config.idle.into_strategy(),
                    config,
                    consumer,
                    running: Arc::clone(&running),
                    health,
                    report_tx,
                    diagnostics,
                    sample_rate,
                };
                let outcome = consumer::run(&mut ctx);

                // ── Shutdown: stop production, then drain ────────────────────
                source.stop();
                drop(source);
                let summary = consumer::drain_and_summarize(&mut ctx, outcome);
                running.store(false, Ordering::SeqCst);

                match &summary.stop_reason {
                    StopReason::BackendFailed(message) => {
                        error!(error = message.as_str(), %summary, "session failed");
                        status.set(SessionStatus::Error, Some(message.clone()));
                        Err(LevelcapError::AudioStream(message.clone()))
                    }
                    reason => {
                        info!(?reason, %summary, "session stopped");
                        status.set(SessionStatus::Stopped, None);
                        Ok(summary)
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(LevelcapError::Io(e));
            }
        };

        // Block start() until the source open is confirmed.
        match open_rx.recv() {
            Ok(Ok(sample_rate)) => {
                *self.worker.lock() = Some(handle);
                info!(sample_rate, "engine started, capturing");
                Ok(sample_rate)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                self.status.set(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Sender dropped without a message: the session thread panicked.
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                self.status
                    .set(SessionStatus::Error, Some("session failed to start".into()));
                Err(LevelcapError::Other(anyhow::anyhow!(
                    "session thread died unexpectedly"
                )))
            }
        }
    }

    /// Request the running session to stop. Returns immediately; use
    /// `wait()` for the summary.
    ///
    /// # Errors
    /// `NotRunning` if no session is capturing.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(LevelcapError::NotRunning);
        }
        info!("engine stop requested");
        Ok(())
    }

    /// Join the current session and return its summary.
    ///
    /// # Errors
    /// `NotRunning` if there is no session to wait on, `AudioStream` if the
    /// session ended on a backend failure.
    pub fn wait(&self) -> Result<SessionSummary> {
        let handle = self.worker.lock().take().ok_or(LevelcapError::NotRunning)?;
        handle.join().map_err(|_| {
            self.status
                .set(SessionStatus::Error, Some("session thread panicked".into()));
            LevelcapError::Other(anyhow::anyhow!("session thread panicked"))
        })?
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.current.lock()
    }

    /// Subscribe to periodic level reports.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<LevelReport> {
        self.report_tx.subscribe()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status.tx.subscribe()
    }

    /// Counters of the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for LevelEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.get_mut().take() {
            let _ = handle.join();
        }
    }
}
