//! Persistent CLI settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use levelcap_core::SessionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Input device to open by name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Print reports and the summary as JSON lines.
    pub json_output: bool,
    pub session: SessionConfig,
}

impl AppSettings {
    /// Clamp hand-edited values into ranges the engine accepts.
    pub fn normalize(&mut self) {
        let defaults = SessionConfig::default();
        let session = &mut self.session;

        session.block_len = session.block_len.clamp(16, 16_384);
        session.ring_capacity = session
            .ring_capacity
            .clamp(2, 4_096)
            .next_power_of_two();
        if !session.history_seconds.is_finite() {
            session.history_seconds = defaults.history_seconds;
        }
        session.history_seconds = session.history_seconds.clamp(0.1, 600.0);
        session.status_interval_ms = session.status_interval_ms.clamp(10, 60_000);
        session.session_duration_ms = session.session_duration_ms.filter(|&ms| ms > 0);

        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("levelcap")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("levelcap")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "ignoring corrupt settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
