//! Pull-driven period sources.
//!
//! A [`BlockingSource`] is read one period at a time. [`PullDriver`] runs
//! it on a dedicated thread and hands every read to a
//! [`CaptureProducer`], so the ring and the consumer loop behave exactly as
//! they do for a push-driven device callback.

use std::f32::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use tracing::{debug, info, warn};

use super::capture::CaptureProducer;
use super::framing::f32_to_i16;
use super::SourceHealth;
use crate::error::{LevelcapError, Result};

/// Result of one blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodRead {
    /// `frames` samples were written to the front of the buffer.
    Period { frames: usize, overflow: bool },
    /// The source had no input for this period.
    Missing,
    /// The source has nothing more to deliver.
    Exhausted,
}

/// A source that delivers mono `i16` periods on demand.
pub trait BlockingSource: Send + 'static {
    /// Nominal sample rate of the delivered audio (Hz).
    fn sample_rate(&self) -> u32;

    /// Block until the next period is available and write it into `buf`.
    ///
    /// `buf.len()` is the configured block length. Returning fewer frames
    /// is allowed; such periods are skipped downstream.
    ///
    /// # Errors
    /// Any error is treated as fatal for the capture session.
    fn read_period(&mut self, buf: &mut [i16]) -> Result<PeriodRead>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String {
        "custom source".into()
    }
}

impl std::fmt::Debug for dyn BlockingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSource")
            .field("description", &self.describe())
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}

/// Marks the source failed if the pull thread unwinds out of a read.
struct FailOnUnwind(Arc<SourceHealth>);

impl Drop for FailOnUnwind {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail("pull source panicked");
        }
    }
}

/// Thread that repeatedly reads a [`BlockingSource`] into the capture producer.
pub struct PullDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PullDriver {
    /// Spawn the read loop.
    ///
    /// The loop ends when the source is exhausted (marked finished in
    /// `health`), when a read fails or panics (recorded as fatal in
    /// `health`), or when [`stop`](Self::stop) is called.
    pub fn spawn(
        mut source: Box<dyn BlockingSource>,
        mut producer: CaptureProducer,
        health: Arc<SourceHealth>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);
        let description = source.describe();

        let handle = thread::Builder::new()
            .name("levelcap-pull".into())
            .spawn(move || {
                let _unwind = FailOnUnwind(Arc::clone(&health));
                info!(source = %description, "pull driver started");
                let mut buf = vec![0i16; producer.block_len()];

                while loop_running.load(Ordering::Acquire) {
                    match source.read_period(&mut buf) {
                        Ok(PeriodRead::Period { frames, overflow }) => {
                            let frames = frames.min(buf.len());
                            producer.on_period(Some(&buf[..frames]), overflow);
                        }
                        Ok(PeriodRead::Missing) => {
                            producer.on_period(None, false);
                        }
                        Ok(PeriodRead::Exhausted) => {
                            debug!(source = %description, "source exhausted");
                            health.mark_finished();
                            break;
                        }
                        Err(e) => {
                            health.fail(e.to_string());
                            break;
                        }
                    }
                }

                info!(source = %description, "pull driver stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop reading and wait for the driver thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("pull driver thread panicked");
            }
        }
    }
}

impl Drop for PullDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleeps so that periods come out at the rate a device would deliver them.
struct Pacer {
    period: Duration,
    next: Option<Instant>,
}

impl Pacer {
    fn new(block_len: usize, sample_rate: u32) -> Self {
        Self {
            period: Duration::from_secs_f64(block_len as f64 / sample_rate.max(1) as f64),
            next: None,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        let due = match self.next {
            // Far behind schedule: resynchronise instead of bursting.
            Some(due) if now > due + self.period * 4 => now,
            Some(due) => due,
            None => now,
        };
        if due > now {
            thread::sleep(due - now);
        }
        self.next = Some(due + self.period);
    }
}

/// Reads periods from a WAV file.
///
/// Multi-channel files contribute their first channel only.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    path: String,
    pacer: Option<Pacer>,
    realtime: bool,
}

impl WavSource {
    /// Open `path`. With `realtime`, reads are paced to the file's sample
    /// rate; otherwise periods are delivered as fast as they are consumed.
    pub fn open(path: impl AsRef<Path>, realtime: bool) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => {}
            (SampleFormat::Int, 8 | 16 | 24 | 32) => {}
            (format, bits) => {
                return Err(LevelcapError::Source(format!(
                    "unsupported WAV sample layout: {format:?} {bits}-bit"
                )))
            }
        }
        if spec.sample_rate == 0 {
            return Err(LevelcapError::Source("WAV header has zero sample rate".into()));
        }

        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "opened WAV source"
        );

        Ok(Self {
            reader,
            path: path.display().to_string(),
            pacer: None,
            realtime,
        })
    }

    fn read_frames<S, F>(&mut self, buf: &mut [i16], convert: F) -> Result<usize>
    where
        S: hound::Sample,
        F: Fn(S) -> i16,
    {
        let channels = usize::from(self.reader.spec().channels.max(1));
        let mut samples = self.reader.samples::<S>();
        let mut frames = 0;
        'frames: while frames < buf.len() {
            for ch in 0..channels {
                match samples.next() {
                    Some(sample) => {
                        let sample = sample?;
                        if ch == 0 {
                            buf[frames] = convert(sample);
                        }
                    }
                    None => break 'frames,
                }
            }
            frames += 1;
        }
        Ok(frames)
    }
}

impl BlockingSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    fn read_period(&mut self, buf: &mut [i16]) -> Result<PeriodRead> {
        if self.realtime {
            let sample_rate = self.sample_rate();
            self.pacer
                .get_or_insert_with(|| Pacer::new(buf.len(), sample_rate))
                .wait();
        }

        let spec = self.reader.spec();
        let frames = match spec.sample_format {
            SampleFormat::Float => self.read_frames::<f32, _>(buf, f32_to_i16)?,
            SampleFormat::Int => {
                let bits = u32::from(spec.bits_per_sample);
                self.read_frames::<i32, _>(buf, move |v| {
                    if bits <= 16 {
                        (v << (16 - bits)) as i16
                    } else {
                        (v >> (bits - 16)) as i16
                    }
                })?
            }
        };

        if frames == 0 {
            Ok(PeriodRead::Exhausted)
        } else {
            Ok(PeriodRead::Period {
                frames,
                overflow: false,
            })
        }
    }

    fn describe(&self) -> String {
        format!("wav:{}", self.path)
    }
}

/// Sine test signal.
pub struct ToneSource {
    frequency_hz: f32,
    amplitude: f32,
    sample_rate: u32,
    phase: f32,
    pacer: Option<Pacer>,
    paced: bool,
    remaining_periods: Option<u64>,
}

impl ToneSource {
    /// A sine at `frequency_hz` with peak `amplitude` (clamped to `[0, 1]`),
    /// paced in real time and unbounded.
    pub fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate: sample_rate.max(1),
            phase: 0.0,
            pacer: None,
            paced: true,
            remaining_periods: None,
        }
    }

    /// Deliver periods as fast as they are read instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Stop after `periods` periods.
    pub fn with_period_limit(mut self, periods: u64) -> Self {
        self.remaining_periods = Some(periods);
        self
    }
}

impl BlockingSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_period(&mut self, buf: &mut [i16]) -> Result<PeriodRead> {
        if let Some(remaining) = self.remaining_periods.as_mut() {
            if *remaining == 0 {
                return Ok(PeriodRead::Exhausted);
            }
            *remaining -= 1;
        }
        if self.paced {
            let sample_rate = self.sample_rate;
            self.pacer
                .get_or_insert_with(|| Pacer::new(buf.len(), sample_rate))
                .wait();
        }

        let step = TAU * self.frequency_hz / self.sample_rate as f32;
        for sample in buf.iter_mut() {
            *sample = f32_to_i16(self.amplitude * self.phase.sin());
            self.phase = (self.phase + step) % TAU;
        }

        Ok(PeriodRead::Period {
            frames: buf.len(),
            overflow: false,
        })
    }

    fn describe(&self) -> String {
        format!("tone:{}Hz@{}", self.frequency_hz, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_block_ring;
    use crate::engine::consumer::SessionDiagnostics;
    use crate::level::compute_rms;
    use approx::assert_abs_diff_eq;

    fn temp_wav(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("levelcap-{}-{name}.wav", std::process::id()))
    }

    #[test]
    fn tone_rms_is_amplitude_over_sqrt_two() {
        // 1 kHz at 48 kHz: 48 samples per cycle, 480 = 10 whole cycles.
        let mut tone = ToneSource::new(1_000.0, 0.5, 48_000).unpaced();
        let mut buf = vec![0i16; 480];
        assert_eq!(
            tone.read_period(&mut buf).expect("read"),
            PeriodRead::Period {
                frames: 480,
                overflow: false
            }
        );
        assert_abs_diff_eq!(compute_rms(&buf), 0.5 / 2f64.sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn tone_period_limit_exhausts() {
        let mut tone = ToneSource::new(440.0, 0.1, 8_000)
            .unpaced()
            .with_period_limit(2);
        let mut buf = vec![0i16; 16];
        assert!(matches!(tone.read_period(&mut buf), Ok(PeriodRead::Period { .. })));
        assert!(matches!(tone.read_period(&mut buf), Ok(PeriodRead::Period { .. })));
        assert_eq!(tone.read_period(&mut buf).expect("read"), PeriodRead::Exhausted);
    }

    #[test]
    fn wav_source_reads_first_channel_and_reports_short_tail() {
        let path = temp_wav("stereo");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
            for i in 0..5i16 {
                writer.write_sample(i * 100).expect("left");
                writer.write_sample(-1i16).expect("right");
            }
            writer.finalize().expect("finalize");
        }

        let mut source = WavSource::open(&path, false).expect("open");
        assert_eq!(source.sample_rate(), 8_000);
        let mut buf = [0i16; 4];
        assert_eq!(
            source.read_period(&mut buf).expect("read"),
            PeriodRead::Period {
                frames: 4,
                overflow: false
            }
        );
        assert_eq!(buf, [0, 100, 200, 300]);
        assert_eq!(
            source.read_period(&mut buf).expect("read"),
            PeriodRead::Period {
                frames: 1,
                overflow: false
            }
        );
        assert_eq!(buf[0], 400);
        assert_eq!(source.read_period(&mut buf).expect("read"), PeriodRead::Exhausted);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_source_scales_24_bit_down_to_16() {
        let path = temp_wav("24bit");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
            writer.write_sample(0x40_0000i32).expect("sample");
            writer.write_sample(-0x80_0000i32).expect("sample");
            writer.finalize().expect("finalize");
        }

        let mut source = WavSource::open(&path, false).expect("open");
        let mut buf = [0i16; 2];
        source.read_period(&mut buf).expect("read");
        assert_eq!(buf, [0x4000, i16::MIN]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pull_driver_forwards_periods_and_marks_finish() {
        let (ring, mut consumer) = create_block_ring(8, 32).expect("ring");
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let health = Arc::new(SourceHealth::default());
        let producer = CaptureProducer::new(ring, Arc::clone(&diagnostics));
        let tone = ToneSource::new(440.0, 0.2, 8_000)
            .unpaced()
            .with_period_limit(3);

        let mut driver =
            PullDriver::spawn(Box::new(tone), producer, Arc::clone(&health)).expect("spawn");

        let deadline = Instant::now() + Duration::from_secs(2);
        while !health.is_finished() {
            assert!(Instant::now() < deadline, "driver never finished");
            thread::sleep(Duration::from_millis(1));
        }
        driver.stop();

        assert_eq!(consumer.len(), 3);
        assert!(consumer.pop_block().is_some());
        assert_eq!(diagnostics.snapshot().blocks_queued, 3);
        assert!(health.fatal_error().is_none());
    }
}
