use thiserror::Error;

/// All errors produced by levelcap-core.
///
/// Conditions on the real-time path (full ring, empty ring, backend overrun,
/// malformed period) are not represented here: they are reported through
/// return values and counters.
#[derive(Debug, Error)]
pub enum LevelcapError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio source error: {0}")]
    Source(String),

    #[error("capture session is already running")]
    AlreadyRunning,

    #[error("capture session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LevelcapError>;
