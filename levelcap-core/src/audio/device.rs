//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Name of the host API the device belongs to (ALSA, CoreAudio, WASAPI, ...).
    pub host: String,
    /// Whether this is the system default input device.
    pub is_default_input: bool,
    /// Channels of the default input configuration, 0 for output-only devices.
    pub input_channels: u16,
    /// Channels of the default output configuration, 0 for input-only devices.
    pub output_channels: u16,
    /// Default sample rate in Hz, if the device reports one.
    pub default_sample_rate: Option<u32>,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.input_channels > 0
    }
}

/// One aligned listing line, e.g.
/// `[ 0] Built-in Microphone | Api: CoreAudio | in: 1 out: 0 | default SR: 48000`.
pub fn format_device_line(index: usize, info: &DeviceInfo) -> String {
    let rate = info
        .default_sample_rate
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".into());
    let marker = if info.is_default_input { "*" } else { " " };
    format!(
        "[{index:2}]{marker}{:<36} | Api: {:<12} | in:{:2} out:{:2} | default SR: {rate}",
        info.name, info.host, info.input_channels, info.output_channels
    )
}

/// List every device of the default host with its input/output capabilities.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let host_name = host.id().name().to_string();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Device {}", idx + 1));
                let input = device.default_input_config().ok();
                let output = device.default_output_config().ok();
                DeviceInfo {
                    is_default_input: default_name.as_deref() == Some(name.as_str()),
                    host: host_name.clone(),
                    input_channels: input.as_ref().map(|c| c.channels()).unwrap_or(0),
                    output_channels: output.as_ref().map(|c| c.channels()).unwrap_or(0),
                    default_sample_rate: input
                        .as_ref()
                        .or(output.as_ref())
                        .map(|c| c.sample_rate().0),
                    name,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate audio devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

/// Input-capable subset of [`list_devices`].
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list_devices().into_iter().filter(DeviceInfo::is_input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mic() -> DeviceInfo {
        DeviceInfo {
            name: "USB Microphone".into(),
            host: "ALSA".into(),
            is_default_input: true,
            input_channels: 1,
            output_channels: 0,
            default_sample_rate: Some(48_000),
        }
    }

    #[test]
    fn formats_aligned_listing_line() {
        let line = format_device_line(3, &mic());
        assert!(line.starts_with("[ 3]*USB Microphone"));
        assert!(line.contains("| Api: ALSA         |"));
        assert!(line.contains("in: 1 out: 0"));
        assert!(line.ends_with("default SR: 48000"));
    }

    #[test]
    fn output_only_device_is_not_input() {
        let speakers = DeviceInfo {
            name: "Speakers".into(),
            input_channels: 0,
            output_channels: 2,
            is_default_input: false,
            default_sample_rate: None,
            ..mic()
        };
        assert!(!speakers.is_input());
        assert!(format_device_line(0, &speakers).ends_with("default SR: -"));
    }
}
