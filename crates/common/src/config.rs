//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DuetError, DuetResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where new camera recordings are written.
    pub recordings_dir: PathBuf,

    /// Capture-session defaults.
    pub recording: RecordingDefaults,

    /// Voice (audio-only) recorder settings.
    pub voice: VoiceRecorderConfig,

    /// Grid compositor settings.
    pub compositor: CompositorConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default capture-session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Camera frame rate.
    pub fps: u32,

    /// Camera frame width in pixels.
    pub width: u32,

    /// Camera frame height in pixels.
    pub height: u32,

    /// Microphone sample rate.
    pub audio_sample_rate: u32,

    /// Microphone channel count.
    pub audio_channels: u16,

    /// Samples the writer may hold back while interleaving tracks.
    pub max_buffered_samples: usize,

    /// Prefix for time-stamped recording file names.
    pub file_prefix: String,
}

/// How the voice recorder names its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileNaming {
    /// One fixed file, overwritten by every recording.
    #[default]
    Overwrite,
    /// A fresh time-stamped file per recording.
    Unique,
}

/// Voice recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceRecorderConfig {
    /// Directory holding the voice recording.
    pub directory: PathBuf,

    /// File name used with [`FileNaming::Overwrite`], and as the stem
    /// for unique names.
    pub file_name: String,

    /// Naming policy.
    pub naming: FileNaming,

    /// Output sample rate (mono, 16-bit).
    pub sample_rate: u32,
}

/// What the compositor does when an input has no video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoVideoPolicy {
    /// Fail the merge with `NoVideoTrack`.
    #[default]
    Fail,
    /// Leave the cell blank and keep the input's audio.
    BlankCell,
}

/// How the two inputs' audio becomes the single output track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioMixPolicy {
    /// Average both inputs where both have audio.
    #[default]
    Mix,
    /// Use only the first input's audio.
    First,
    /// Use only the second input's audio.
    Second,
    /// Write no audio track.
    None,
}

/// Grid compositor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Output frame rate.
    pub fps: u32,

    /// Letterbox fill colour (RGB).
    pub background: [u8; 3],

    /// Behaviour for inputs without video.
    pub no_video: NoVideoPolicy,

    /// Output audio policy.
    pub audio: AudioMixPolicy,

    /// Output audio sample rate (mono).
    pub audio_sample_rate: u32,

    /// PCM frames per output audio sample.
    pub audio_chunk_frames: u32,

    /// Directory for merged output files.
    pub output_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "duet=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            recordings_dir: data.join("recordings"),
            recording: RecordingDefaults::default(),
            voice: VoiceRecorderConfig {
                directory: data.join("voice"),
                ..VoiceRecorderConfig::default()
            },
            compositor: CompositorConfig {
                output_dir: data.join("merged"),
                ..CompositorConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 640,
            height: 480,
            audio_sample_rate: 44_100,
            audio_channels: 1,
            max_buffered_samples: 256,
            file_prefix: "capture".to_string(),
        }
    }
}

impl Default for VoiceRecorderConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            file_name: "recording.mov".to_string(),
            naming: FileNaming::Overwrite,
            sample_rate: 12_000,
        }
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            background: [0, 0, 0],
            no_video: NoVideoPolicy::Fail,
            audio: AudioMixPolicy::Mix,
            audio_sample_rate: 44_100,
            audio_chunk_frames: 1024,
            output_dir: std::env::temp_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %config_path.display(), error = %e, "Ignoring unreadable config");
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> DuetResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> DuetResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: &Path) -> DuetResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> DuetResult<()> {
        if self.recording.fps == 0 || self.compositor.fps == 0 {
            return Err(DuetError::config("fps must be greater than zero"));
        }
        if self.recording.width == 0 || self.recording.height == 0 {
            return Err(DuetError::config("capture size must be non-zero"));
        }
        if self.recording.audio_sample_rate == 0
            || self.voice.sample_rate == 0
            || self.compositor.audio_sample_rate == 0
        {
            return Err(DuetError::config("sample rates must be greater than zero"));
        }
        if self.recording.audio_channels == 0 {
            return Err(DuetError::config("audio_channels must be at least 1"));
        }
        if self.compositor.audio_chunk_frames == 0 {
            return Err(DuetError::config("audio_chunk_frames must be at least 1"));
        }
        if self.voice.file_name.trim().is_empty() {
            return Err(DuetError::config("voice.file_name must not be empty"));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("duet").join("config.json")
}

/// Default data directory.
fn data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("duet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.voice.naming, FileNaming::Overwrite);
        assert_eq!(config.voice.sample_rate, 12_000);
        assert_eq!(config.compositor.no_video, NoVideoPolicy::Fail);
    }

    #[test]
    fn partial_json_fills_missing_sections() {
        let json = r#"{ "compositor": { "fps": 24, "no_video": "blank_cell" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.compositor.fps, 24);
        assert_eq!(config.compositor.no_video, NoVideoPolicy::BlankCell);
        assert_eq!(config.compositor.audio, AudioMixPolicy::Mix);
        assert_eq!(config.recording.fps, 30);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("duet_config_test_{}", std::process::id()));
        let path = dir.join("config.json");
        let mut config = AppConfig::default();
        config.voice.naming = FileNaming::Unique;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.voice.naming, FileNaming::Unique);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_fps_is_rejected() {
        let mut config = AppConfig::default();
        config.compositor.fps = 0;
        assert!(matches!(config.validate(), Err(DuetError::Config { .. })));
    }
}
