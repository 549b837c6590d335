use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use levelcap_core::audio::source::{BlockingSource, PeriodRead, ToneSource};
use levelcap_core::error::Result;
use levelcap_core::{
    IdlePolicy, LevelEngine, LevelcapError, SessionConfig, SessionStatus, SourceSpec, StopReason,
};
use tokio::sync::broadcast::error::TryRecvError;

/// Delivers a fixed script of periods as fast as it is read, then either
/// finishes or fails.
struct ScriptedSource {
    periods: Vec<Vec<i16>>,
    next: usize,
    fail_at_end: bool,
}

impl ScriptedSource {
    fn constant(value: i16, block_len: usize, count: usize) -> Self {
        Self {
            periods: vec![vec![value; block_len]; count],
            next: 0,
            fail_at_end: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    fn then(mut self, period: Vec<i16>) -> Self {
        self.periods.push(period);
        self
    }
}

impl BlockingSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        8_000
    }

    fn read_period(&mut self, buf: &mut [i16]) -> Result<PeriodRead> {
        let Some(period) = self.periods.get(self.next) else {
            if self.fail_at_end {
                return Err(LevelcapError::Source("scripted read failure".into()));
            }
            return Ok(PeriodRead::Exhausted);
        };
        self.next += 1;
        buf[..period.len()].copy_from_slice(period);
        Ok(PeriodRead::Period {
            frames: period.len(),
            overflow: false,
        })
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Delivers a few silent periods, then panics inside the read.
struct PanickingSource {
    reads_left: usize,
}

impl BlockingSource for PanickingSource {
    fn sample_rate(&self) -> u32 {
        8_000
    }

    fn read_period(&mut self, buf: &mut [i16]) -> Result<PeriodRead> {
        if self.reads_left == 0 {
            panic!("driver fault");
        }
        self.reads_left -= 1;
        buf.fill(0);
        Ok(PeriodRead::Period {
            frames: buf.len(),
            overflow: false,
        })
    }
}

fn test_config() -> SessionConfig {
    SessionConfig {
        block_len: 128,
        ring_capacity: 64,
        history_seconds: 0.5,
        status_interval_ms: 10,
        session_duration_ms: None,
        idle: IdlePolicy::Sleep { millis: 1 },
    }
}

fn paced_tone() -> SourceSpec {
    SourceSpec::Tone {
        frequency_hz: 440.0,
        amplitude: 0.5,
        sample_rate: 8_000,
    }
}

#[test]
fn finite_source_is_fully_consumed() {
    let engine = LevelEngine::new(test_config());
    let source = ScriptedSource::constant(i16::MIN, 128, 32);

    let sample_rate = engine
        .start(SourceSpec::Custom(Box::new(source)))
        .expect("start");
    assert_eq!(sample_rate, 8_000);

    let summary = engine.wait().expect("session summary");
    assert_eq!(summary.stop_reason, StopReason::SourceFinished);
    assert_eq!(summary.blocks_consumed, 32);
    assert_eq!(summary.dropped_blocks, 0);
    assert_eq!(summary.discarded_blocks, 0);
    assert_abs_diff_eq!(summary.last_rms.expect("rms"), 1.0, epsilon = 1e-12);

    // 0.5 s at 8 kHz caps the window at 4000 of the 4096 samples delivered.
    assert_eq!(summary.history_samples, 4_000);
    assert_eq!(engine.status(), SessionStatus::Stopped);
    assert!(!engine.is_running());
}

#[test]
fn short_tail_period_is_skipped() {
    let engine = LevelEngine::new(test_config());
    let source = ScriptedSource::constant(100, 128, 4).then(vec![100; 50]);

    engine
        .start(SourceSpec::Custom(Box::new(source)))
        .expect("start");
    let summary = engine.wait().expect("session summary");

    assert_eq!(summary.periods_received, 5);
    assert_eq!(summary.periods_skipped, 1);
    assert_eq!(summary.blocks_consumed, 4);
    assert_eq!(summary.history_samples, 4 * 128);
}

#[test]
fn stop_cancels_a_live_session_and_reports_flow() {
    let engine = LevelEngine::new(test_config());
    let mut reports = engine.subscribe_reports();
    let mut statuses = engine.subscribe_status();

    engine.start(paced_tone()).expect("start");
    assert_eq!(engine.status(), SessionStatus::Capturing);
    assert!(matches!(
        engine.start(paced_tone()),
        Err(LevelcapError::AlreadyRunning)
    ));

    thread::sleep(Duration::from_millis(200));
    engine.stop().expect("stop");
    let summary = engine.wait().expect("session summary");

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert!(summary.blocks_consumed > 0);
    assert!(summary.reports_emitted > 0);
    assert_eq!(engine.status(), SessionStatus::Stopped);

    let mut report_count = 0u64;
    let mut last_seq = None;
    loop {
        match reports.try_recv() {
            Ok(report) => {
                // A 0.5 amplitude sine has RMS ~0.354.
                assert_abs_diff_eq!(report.rms, 0.5 / 2f64.sqrt(), epsilon = 0.02);
                assert!(report.history_samples <= 4_000);
                if let Some(prev) = last_seq {
                    assert!(report.seq > prev);
                }
                last_seq = Some(report.seq);
                report_count += 1;
            }
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("unexpected receive error: {e:?}"),
        }
    }
    assert_eq!(report_count, summary.reports_emitted);

    let first = statuses.try_recv().expect("capturing status");
    assert_eq!(first.status, SessionStatus::Capturing);
    let last = statuses.try_recv().expect("stopped status");
    assert_eq!(last.status, SessionStatus::Stopped);
}

#[test]
fn session_duration_ends_the_session() {
    let config = SessionConfig {
        session_duration_ms: Some(100),
        ..test_config()
    };
    let engine = LevelEngine::new(config);

    let started = Instant::now();
    engine.start(paced_tone()).expect("start");
    let summary = engine.wait().expect("session summary");

    assert_eq!(summary.stop_reason, StopReason::DurationElapsed);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(engine.stop(), Err(LevelcapError::NotRunning)));
}

#[test]
fn failing_source_resolves_to_error_status() {
    let engine = LevelEngine::new(test_config());
    let mut statuses = engine.subscribe_status();
    let source = ScriptedSource::constant(0, 128, 2).failing();

    engine
        .start(SourceSpec::Custom(Box::new(source)))
        .expect("start");
    let result = engine.wait();

    match result {
        Err(LevelcapError::AudioStream(message)) => {
            assert!(message.contains("scripted read failure"));
        }
        other => panic!("expected backend failure, got {other:?}"),
    }
    assert_eq!(engine.status(), SessionStatus::Error);

    let mut saw_error = false;
    while let Ok(event) = statuses.try_recv() {
        if event.status == SessionStatus::Error {
            saw_error = true;
            assert!(event.detail.is_some());
        }
    }
    assert!(saw_error);
}

#[test]
fn panicking_source_resolves_to_error_status() {
    let engine = LevelEngine::new(test_config());
    let mut statuses = engine.subscribe_status();

    engine
        .start(SourceSpec::Custom(Box::new(PanickingSource { reads_left: 3 })))
        .expect("start");

    // The terminal status must arrive without anyone calling stop().
    let deadline = Instant::now() + Duration::from_secs(5);
    let terminal = loop {
        match statuses.try_recv() {
            Ok(event) if event.status == SessionStatus::Error => break event,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "no terminal status after panic");
                thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Closed) => panic!("status channel closed"),
        }
    };
    assert_eq!(terminal.detail.as_deref(), Some("pull source panicked"));

    match engine.wait() {
        Err(LevelcapError::AudioStream(message)) => assert_eq!(message, "pull source panicked"),
        other => panic!("expected backend failure, got {other:?}"),
    }
    assert!(!engine.is_running());
    assert_eq!(engine.status(), SessionStatus::Error);
}

#[test]
fn open_failure_is_returned_from_start() {
    let engine = LevelEngine::new(test_config());
    let missing = std::env::temp_dir().join("levelcap-does-not-exist.wav");

    let result = engine.start(SourceSpec::WavFile {
        path: missing,
        realtime: false,
    });

    assert!(result.is_err());
    assert!(!engine.is_running());
    assert_eq!(engine.status(), SessionStatus::Error);
    assert!(matches!(engine.wait(), Err(LevelcapError::NotRunning)));
}

#[test]
fn wav_file_session_consumes_whole_blocks() {
    let path = std::env::temp_dir().join(format!(
        "levelcap-session-{}.wav",
        std::process::id()
    ));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    {
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        for _ in 0..(10 * 128 + 30) {
            writer.write_sample(16_384i16).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    let engine = LevelEngine::new(test_config());
    let sample_rate = engine
        .start(SourceSpec::WavFile {
            path: path.clone(),
            realtime: false,
        })
        .expect("start");
    let summary = engine.wait().expect("session summary");
    let _ = std::fs::remove_file(&path);

    assert_eq!(sample_rate, 16_000);
    assert_eq!(summary.sample_rate, 16_000);
    assert_eq!(summary.stop_reason, StopReason::SourceFinished);
    assert_eq!(summary.blocks_consumed, 10);
    assert_eq!(summary.periods_skipped, 1);
    assert_abs_diff_eq!(summary.last_rms.expect("rms"), 0.5, epsilon = 1e-12);
}

#[test]
fn engine_restarts_after_a_session_ends() {
    let engine = LevelEngine::new(test_config());

    for _ in 0..2 {
        let tone = ToneSource::new(1_000.0, 0.25, 8_000)
            .unpaced()
            .with_period_limit(8);
        engine
            .start(SourceSpec::Custom(Box::new(tone)))
            .expect("start");
        let summary = engine.wait().expect("session summary");
        assert_eq!(summary.stop_reason, StopReason::SourceFinished);
        assert_eq!(summary.blocks_consumed + summary.dropped_blocks, 8);

        // Diagnostics are reset per session.
        let snapshot = engine.diagnostics_snapshot();
        assert_eq!(snapshot.periods_received, 8);
    }
}
