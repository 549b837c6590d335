//! Period sources: where blocks come from.
//!
//! Two delivery strategies feed the same [`CaptureProducer`]:
//!
//! - **push-driven**: [`DeviceCapture`] registers a cpal input callback that
//!   re-frames each callback buffer into block-length periods.
//! - **pull-driven**: [`source::PullDriver`] reads a
//!   [`source::BlockingSource`] (WAV file, test tone, anything custom) on
//!   its own thread.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`ActiveSource`] therefore must be created and dropped on the
//! same thread; the engine does both on its session thread.

pub mod capture;
pub mod device;
pub mod framing;
pub mod source;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    BufferSize, SampleFormat, Stream, StreamConfig, SupportedBufferSize,
};
use parking_lot::Mutex;
#[cfg(feature = "audio-cpal")]
use tracing::{error, warn};
use tracing::info;

use crate::error::{LevelcapError, Result};
use capture::CaptureProducer;
#[cfg(feature = "audio-cpal")]
use framing::PeriodFramer;
use source::{BlockingSource, PullDriver, ToneSource, WavSource};

/// Which source a capture session reads from.
pub enum SourceSpec {
    /// An input device. `None` selects the system default.
    Device { preferred: Option<String> },
    /// A WAV file, optionally paced in real time.
    WavFile { path: PathBuf, realtime: bool },
    /// A sine test tone paced in real time.
    Tone {
        frequency_hz: f32,
        amplitude: f32,
        sample_rate: u32,
    },
    /// Any other pull-driven source.
    Custom(Box<dyn BlockingSource>),
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device { preferred } => f
                .debug_struct("Device")
                .field("preferred", preferred)
                .finish(),
            Self::WavFile { path, realtime } => f
                .debug_struct("WavFile")
                .field("path", path)
                .field("realtime", realtime)
                .finish(),
            Self::Tone {
                frequency_hz,
                amplitude,
                sample_rate,
            } => f
                .debug_struct("Tone")
                .field("frequency_hz", frequency_hz)
                .field("amplitude", amplitude)
                .field("sample_rate", sample_rate)
                .finish(),
            Self::Custom(source) => f.debug_tuple("Custom").field(source).finish(),
        }
    }
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self::Device { preferred: None }
    }
}

/// Out-of-band state reported by a source, read by the consumer loop.
///
/// Written only from non-real-time contexts (stream error callbacks, the
/// pull driver after a failed read), except for the overflow flag, which is
/// a plain atomic the audio callback may swap.
#[derive(Debug, Default)]
pub struct SourceHealth {
    fatal: Mutex<Option<String>>,
    failed: AtomicBool,
    finished: AtomicBool,
    overflow_pending: AtomicBool,
}

impl SourceHealth {
    /// Record a backend-fatal error. The first error wins.
    pub fn fail(&self, message: impl Into<String>) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            *slot = Some(message.into());
        }
        self.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// The source delivered its last period.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Flag an overrun to be attached to the next delivered period.
    pub fn raise_overflow(&self) {
        self.overflow_pending.store(true, Ordering::Relaxed);
    }

    /// Take the pending overrun flag. Wait-free.
    pub fn take_overflow(&self) -> bool {
        self.overflow_pending.swap(false, Ordering::Relaxed)
    }
}

/// A started source. Dropping it stops production.
pub enum ActiveSource {
    #[cfg(feature = "audio-cpal")]
    Device(DeviceCapture),
    Pull(PullDriver),
}

impl ActiveSource {
    /// Stop producing periods. After this returns the producer is idle.
    pub fn stop(&mut self) {
        match self {
            #[cfg(feature = "audio-cpal")]
            Self::Device(capture) => capture.stop(),
            Self::Pull(driver) => driver.stop(),
        }
    }
}

/// Open `spec` and start delivering periods into `producer`.
///
/// Returns the running source and its nominal sample rate.
///
/// # Errors
/// Device, stream and source-open failures. These are backend-fatal.
pub fn open_source(
    spec: SourceSpec,
    block_len: usize,
    producer: CaptureProducer,
    health: Arc<SourceHealth>,
) -> Result<(ActiveSource, u32)> {
    match spec {
        SourceSpec::Device { preferred } => {
            open_device(preferred.as_deref(), block_len, producer, health)
        }
        SourceSpec::WavFile { path, realtime } => {
            start_pull(Box::new(WavSource::open(path, realtime)?), producer, health)
        }
        SourceSpec::Tone {
            frequency_hz,
            amplitude,
            sample_rate,
        } => {
            info!(frequency_hz, amplitude, sample_rate, "using test tone source");
            start_pull(
                Box::new(ToneSource::new(frequency_hz, amplitude, sample_rate)),
                producer,
                health,
            )
        }
        SourceSpec::Custom(source) => start_pull(source, producer, health),
    }
}

fn start_pull(
    source: Box<dyn BlockingSource>,
    producer: CaptureProducer,
    health: Arc<SourceHealth>,
) -> Result<(ActiveSource, u32)> {
    let sample_rate = source.sample_rate();
    if sample_rate == 0 {
        return Err(LevelcapError::Source("source reports zero sample rate".into()));
    }
    let driver = PullDriver::spawn(source, producer, health)?;
    Ok((ActiveSource::Pull(driver), sample_rate))
}

#[cfg(feature = "audio-cpal")]
fn open_device(
    preferred: Option<&str>,
    block_len: usize,
    producer: CaptureProducer,
    health: Arc<SourceHealth>,
) -> Result<(ActiveSource, u32)> {
    let capture = DeviceCapture::open(preferred, block_len, producer, health)?;
    let sample_rate = capture.sample_rate;
    Ok((ActiveSource::Device(capture), sample_rate))
}

#[cfg(not(feature = "audio-cpal"))]
fn open_device(
    _preferred: Option<&str>,
    _block_len: usize,
    _producer: CaptureProducer,
    _health: Arc<SourceHealth>,
) -> Result<(ActiveSource, u32)> {
    Err(LevelcapError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}

/// Handle to an active device input stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
#[cfg(feature = "audio-cpal")]
pub struct DeviceCapture {
    stream: Stream,
    /// Cleared by `stop` so the callback no-ops from its next invocation.
    accepting: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
    pub device_name: String,
}

#[cfg(feature = "audio-cpal")]
impl DeviceCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available one.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no input exists, `AudioDevice` when the
    /// device cannot be queried, `AudioStream` when cpal fails to build or
    /// start the stream.
    pub fn open(
        preferred: Option<&str>,
        block_len: usize,
        mut producer: CaptureProducer,
        health: Arc<SourceHealth>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| LevelcapError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(LevelcapError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening input device");

        let (config, sample_format) = select_input_config(&device, block_len)?;
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        info!(
            sample_rate,
            channels,
            format = ?sample_format,
            buffer = ?config.buffer_size,
            "audio config selected"
        );

        let accepting = Arc::new(AtomicBool::new(true));
        let callback_accepting = Arc::clone(&accepting);
        let callback_health = Arc::clone(&health);
        let mut framer = PeriodFramer::new(block_len);

        let error_health = Arc::clone(&health);
        let on_error = move |err: cpal::StreamError| match err {
            cpal::StreamError::DeviceNotAvailable => {
                error!("input device is no longer available");
                error_health.fail("input device is no longer available");
            }
            other => {
                warn!("audio stream error, treating as overrun: {other}");
                error_health.raise_overflow();
            }
        };

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                    if !callback_accepting.load(Ordering::Relaxed) {
                        return;
                    }
                    framer.push_i16(data, channels, |period| {
                        let overflow = callback_health.take_overflow();
                        producer.on_period(Some(period), overflow);
                    });
                },
                on_error,
                None,
            ),

            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if !callback_accepting.load(Ordering::Relaxed) {
                        return;
                    }
                    framer.push_f32(data, channels, |period| {
                        let overflow = callback_health.take_overflow();
                        producer.on_period(Some(period), overflow);
                    });
                },
                on_error,
                None,
            ),

            fmt => {
                return Err(LevelcapError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| LevelcapError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| LevelcapError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            accepting,
            sample_rate,
            device_name,
        })
    }

    /// Signal the callback to no-op and pause the stream.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause input stream: {e}");
        }
    }
}

/// Pick the input configuration to open.
///
/// Preference order at the device's default sample rate: mono `i16`, mono
/// `f32`, then multi-channel `i16` / `f32` (first channel is captured).
/// Requests a fixed buffer of `block_len` frames when the device allows it.
#[cfg(feature = "audio-cpal")]
fn select_input_config(
    device: &cpal::Device,
    block_len: usize,
) -> Result<(StreamConfig, SampleFormat)> {
    let default = device
        .default_input_config()
        .map_err(|e| LevelcapError::AudioDevice(e.to_string()))?;
    let default_rate = default.sample_rate();

    let rank = |channels: u16, format: SampleFormat| -> Option<u8> {
        match (channels, format) {
            (1, SampleFormat::I16) => Some(0),
            (1, SampleFormat::F32) => Some(1),
            (_, SampleFormat::I16) => Some(2),
            (_, SampleFormat::F32) => Some(3),
            _ => None,
        }
    };

    let best = device
        .supported_input_configs()
        .map_err(|e| LevelcapError::AudioDevice(e.to_string()))?
        .filter(|r| r.min_sample_rate() <= default_rate && default_rate <= r.max_sample_rate())
        .filter_map(|r| rank(r.channels(), r.sample_format()).map(|k| (k, r.channels(), r)))
        .min_by_key(|(k, channels, _)| (*k, *channels))
        .map(|(_, _, r)| r.with_sample_rate(default_rate));

    let supported = best.unwrap_or(default);

    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&(block_len as u32)) =>
        {
            BufferSize::Fixed(block_len as u32)
        }
        _ => BufferSize::Default,
    };

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size,
    };
    Ok((config, supported.sample_format()))
}
