//! Command-line surface. Flags override the settings file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use levelcap_core::{IdlePolicy, SourceSpec};

use crate::settings::AppSettings;

#[derive(Debug, Parser)]
#[command(name = "levelcap")]
#[command(about = "Live input level meter with a lock-free capture path", long_about = None)]
pub struct Cli {
    /// Settings file to read instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List audio input devices
    Devices {
        /// Include output-only devices
        #[arg(long)]
        all: bool,
    },
    /// Capture from a device, WAV file or test tone and report levels
    Capture(CaptureArgs),
    /// Print the effective settings as JSON
    Config {
        /// Write the effective settings back to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdleKind {
    Sleep,
    Yield,
    Spin,
}

#[derive(Debug, Clone, Args)]
pub struct CaptureArgs {
    /// Input device name (default: settings, then system default)
    #[arg(short, long, conflicts_with_all = ["wav", "tone"])]
    pub device: Option<String>,

    /// Read from a WAV file instead of a device
    #[arg(long, value_name = "PATH", conflicts_with = "tone")]
    pub wav: Option<PathBuf>,

    /// Pace WAV playback in real time
    #[arg(long, requires = "wav")]
    pub realtime: bool,

    /// Generate a sine test tone at this frequency (Hz)
    #[arg(long, value_name = "HZ")]
    pub tone: Option<f32>,

    /// Test tone amplitude in [0, 1]
    #[arg(long, default_value_t = 0.5, requires = "tone")]
    pub amplitude: f32,

    /// Test tone sample rate (Hz)
    #[arg(long, default_value_t = 48_000, requires = "tone")]
    pub sample_rate: u32,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Samples per block
    #[arg(long)]
    pub block_len: Option<usize>,

    /// Ring slots (power of two)
    #[arg(long)]
    pub ring_capacity: Option<usize>,

    /// History window length in seconds
    #[arg(long)]
    pub history_seconds: Option<f32>,

    /// Milliseconds between status lines
    #[arg(long)]
    pub status_interval_ms: Option<u64>,

    /// How the consumer waits on an empty ring
    #[arg(long, value_enum)]
    pub idle: Option<IdleKind>,

    /// Print reports and the summary as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl CaptureArgs {
    /// Layer flags on top of file settings.
    pub fn apply(&self, settings: &mut AppSettings) {
        let session = &mut settings.session;
        if let Some(block_len) = self.block_len {
            session.block_len = block_len;
        }
        if let Some(capacity) = self.ring_capacity {
            session.ring_capacity = capacity;
        }
        if let Some(seconds) = self.history_seconds {
            session.history_seconds = seconds;
        }
        if let Some(interval) = self.status_interval_ms {
            session.status_interval_ms = interval;
        }
        if let Some(seconds) = self.duration {
            session.session_duration_ms = Some((seconds.max(0.0) * 1_000.0).round() as u64);
        }
        if let Some(kind) = self.idle {
            session.idle = match kind {
                IdleKind::Sleep => match session.idle {
                    sleep @ IdlePolicy::Sleep { .. } => sleep,
                    _ => IdlePolicy::default(),
                },
                IdleKind::Yield => IdlePolicy::Yield,
                IdleKind::Spin => IdlePolicy::Spin,
            };
        }
        if let Some(device) = &self.device {
            settings.preferred_input_device = Some(device.clone());
        }
        if self.json {
            settings.json_output = true;
        }
    }

    pub fn source_spec(&self, settings: &AppSettings) -> SourceSpec {
        if let Some(path) = &self.wav {
            SourceSpec::WavFile {
                path: path.clone(),
                realtime: self.realtime,
            }
        } else if let Some(frequency_hz) = self.tone {
            SourceSpec::Tone {
                frequency_hz,
                amplitude: self.amplitude.clamp(0.0, 1.0),
                sample_rate: self.sample_rate,
            }
        } else {
            SourceSpec::Device {
                preferred: settings.preferred_input_device.clone(),
            }
        }
    }
}
