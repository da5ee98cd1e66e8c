// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where audio resources are fetched from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Base URL; a resource id is appended as the last path segment
    pub base_url: String,
    /// When set, resources are read from this directory instead of HTTP
    pub local_dir: Option<PathBuf>,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/lc/audio".to_string(),
            local_dir: None,
        }
    }
}

/// Playback engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Use the decoded-buffer engine when the buffer is ready
    pub precise_enabled: bool,
    /// Time-update interval of the streaming element and the precise
    /// engine's progress tick
    pub time_update_ms: u64,
    /// Resume a suspended output and retry once before falling back
    pub resume_retry: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            precise_enabled: true,
            time_update_ms: 250,
            resume_retry: true,
        }
    }
}

impl PlaybackSettings {
    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_ms.max(1))
    }
}

/// Audio output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub volume: f32, // 0.0-1.0
    /// Render without a device (nothing is audible)
    pub headless: bool,
    /// Size of the streaming ring in milliseconds
    pub stream_buffer_ms: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            headless: false,
            stream_buffer_ms: 250,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// tracing-subscriber filter directive, overridden by RUST_LOG
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub version: i32, // Settings schema version for future migrations
    pub resource: ResourceSettings,
    pub playback: PlaybackSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: 1,
            resource: ResourceSettings::default(),
            playback: PlaybackSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppSettings {
    /// Default settings directory for this application
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("segment-player"))
    }

    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from a directory, or return defaults if no file exists
    pub fn load(app_dir: &Path) -> Result<Self, SettingsError> {
        Self::load_file(&Self::get_settings_path(app_dir))
    }

    /// Load settings from an explicit file, or return defaults if it doesn't exist
    pub fn load_file(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: AppSettings = serde_json::from_str(&content)?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to a directory
    pub fn save(&self, app_dir: &Path) -> Result<(), SettingsError> {
        let path = Self::get_settings_path(app_dir);
        let write_error = |source| SettingsError::Write {
            path: path.clone(),
            source,
        };

        // Ensure directory exists
        fs::create_dir_all(app_dir).map_err(write_error)?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).map_err(write_error)?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.version, 1);
        assert!(settings.playback.precise_enabled);
        assert_eq!(settings.playback.time_update_ms, 250);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = AppSettings::default();
        settings.output.volume = 0.4;
        settings.resource.local_dir = Some(PathBuf::from("/srv/audio"));
        settings.save(dir.path()).unwrap();

        let loaded = AppSettings::load(dir.path()).unwrap();
        assert!((loaded.output.volume - 0.4).abs() < f32::EPSILON);
        assert_eq!(loaded.resource.local_dir, Some(PathBuf::from("/srv/audio")));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            AppSettings::get_settings_path(dir.path()),
            r#"{ "playback": { "precise_enabled": false } }"#,
        )
        .unwrap();

        let loaded = AppSettings::load(dir.path()).unwrap();
        assert!(!loaded.playback.precise_enabled);
        assert!(loaded.playback.resume_retry);
        assert_eq!(loaded.resource.base_url, "http://localhost:8000/lc/audio");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(AppSettings::get_settings_path(dir.path()), "{ not json").unwrap();
        assert!(matches!(AppSettings::load(dir.path()), Err(SettingsError::Parse(_))));
    }
}
