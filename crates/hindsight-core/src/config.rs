//! Configuration management for hindsight.
//!
//! Configuration lives in a TOML file under the platform config
//! directory. Every field has a serde default so a partial file (or no
//! file at all) yields a working configuration; the file is written back
//! on startup so the operator always has something to edit.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::{cache_dir, config_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::APP_NAME;

/// Configuration rejected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("onset threshold ({onset} dB) must be above offset threshold ({offset} dB)")]
    ThresholdInversion { onset: f32, offset: f32 },

    #[error("buffer_seconds must be positive, got {0}")]
    NonPositiveBuffer(f32),

    #[error("live_queue_seconds must be positive, got {0}")]
    NonPositiveLiveQueue(f32),

    #[error("transcription.max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("transcription.max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Audio capture settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Seconds of pre-roll audio held in the rolling buffer.
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: f32,

    /// Input device name; `None` uses the system default input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,

    /// Seconds of audio the live queue can absorb before dropping blocks.
    #[serde(default = "default_live_queue_seconds")]
    pub live_queue_seconds: f32,
}

fn default_buffer_seconds() -> f32 {
    13.0
}

fn default_live_queue_seconds() -> f32 {
    8.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: default_buffer_seconds(),
            input_device: None,
            live_queue_seconds: default_live_queue_seconds(),
        }
    }
}

/// Voice-activity detection thresholds for auto-record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// RMS level that counts as voice onset, in dBFS.
    #[serde(default = "default_onset_threshold_db")]
    pub onset_threshold_db: f32,

    /// How long the RMS must stay above the onset threshold before a
    /// recording starts. Filters coughs and clicks.
    #[serde(default = "default_onset_sustain_secs")]
    pub onset_sustain_secs: f32,

    /// RMS level below which the signal counts as silence, in dBFS.
    /// Kept separate from the onset threshold for hysteresis.
    #[serde(default = "default_offset_threshold_db")]
    pub offset_threshold_db: f32,

    /// Continuous silence that ends an auto recording, in seconds.
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: f32,
}

fn default_onset_threshold_db() -> f32 {
    -35.0
}

fn default_onset_sustain_secs() -> f32 {
    0.5
}

fn default_offset_threshold_db() -> f32 {
    -45.0
}

fn default_silence_timeout_secs() -> f32 {
    10.0
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            onset_threshold_db: default_onset_threshold_db(),
            onset_sustain_secs: default_onset_sustain_secs(),
            offset_threshold_db: default_offset_threshold_db(),
            silence_timeout_secs: default_silence_timeout_secs(),
        }
    }
}

impl DetectorConfig {
    pub fn onset_sustain(&self) -> Duration {
        Duration::from_secs_f32(self.onset_sustain_secs.max(0.0))
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.silence_timeout_secs.max(0.0))
    }
}

/// Recording controller policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    /// Start in auto-record (armed) mode.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_record: bool,

    /// Recent-activity threshold consulted by the manual-start gate, dBFS.
    #[serde(default = "default_activity_threshold_db")]
    pub activity_threshold_db: f32,

    /// Look-back window for the activity gate, in seconds.
    #[serde(default = "default_activity_window_secs")]
    pub activity_window_secs: f32,

    /// Recordings whose average RMS falls below this floor are discarded.
    #[serde(default = "default_discard_floor_db")]
    pub discard_floor_db: f32,

    /// Keep the partial file when a recording fails mid-write.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub keep_failed: bool,
}

fn default_activity_threshold_db() -> f32 {
    -70.0
}

fn default_activity_window_secs() -> f32 {
    0.5
}

fn default_discard_floor_db() -> f32 {
    -50.0
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            auto_record: false,
            activity_threshold_db: default_activity_threshold_db(),
            activity_window_secs: default_activity_window_secs(),
            discard_floor_db: default_discard_floor_db(),
            keep_failed: true,
        }
    }
}

impl RecordingConfig {
    pub fn activity_window(&self) -> Duration {
        Duration::from_secs_f32(self.activity_window_secs.max(0.0))
    }
}

/// Session storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Root directory for temporary session storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,

    /// Temp sessions older than this many days are removed at startup.
    #[serde(default = "default_auto_cleanup_days")]
    pub auto_cleanup_days: u64,
}

fn default_auto_cleanup_days() -> u64 {
    7
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            auto_cleanup_days: default_auto_cleanup_days(),
        }
    }
}

impl SessionConfig {
    /// Resolve the temp root, falling back to the platform cache dir.
    pub fn temp_root(&self) -> Result<PathBuf> {
        match &self.temp_root {
            Some(path) => Ok(path.clone()),
            None => {
                let cache = cache_dir().context("Failed to get cache directory")?;
                Ok(cache.join(APP_NAME).join("sessions"))
            }
        }
    }
}

/// Transcription backend to use.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptionBackend {
    /// A whisper-server style endpoint: multipart POST to `{url}/inference`.
    WhisperServer { url: String },
    /// An OpenAI-compatible endpoint with bearer auth and a model name.
    OpenAiCompatible {
        url: String,
        api_key: String,
        model: String,
    },
}

impl Default for TranscriptionBackend {
    fn default() -> Self {
        TranscriptionBackend::WhisperServer {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Transcription dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptionConfig {
    /// Submit completed recordings for transcription.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Language hint passed to the backend (ISO 639-1 code).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Attempts per recording before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Concurrent transcription workers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-request timeout in steady state, seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Grace given to an in-flight request once shutdown begins, seconds.
    #[serde(default = "default_shutdown_attempt_timeout_secs")]
    pub shutdown_attempt_timeout_secs: u64,

    /// Backend endpoint. Last so the sub-table serializes after the
    /// scalar keys above.
    #[serde(default)]
    pub backend: TranscriptionBackend,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    2
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_shutdown_attempt_timeout_secs() -> u64 {
    3
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: TranscriptionBackend::default(),
            language: None,
            max_attempts: default_max_attempts(),
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_attempt_timeout_secs: default_shutdown_attempt_timeout_secs(),
        }
    }
}

impl TranscriptionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_attempt_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,
}

impl Config {
    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detector.onset_threshold_db <= self.detector.offset_threshold_db {
            return Err(ConfigError::ThresholdInversion {
                onset: self.detector.onset_threshold_db,
                offset: self.detector.offset_threshold_db,
            });
        }
        if self.audio.buffer_seconds <= 0.0 {
            return Err(ConfigError::NonPositiveBuffer(self.audio.buffer_seconds));
        }
        if self.audio.live_queue_seconds <= 0.0 {
            return Err(ConfigError::NonPositiveLiveQueue(
                self.audio.live_queue_seconds,
            ));
        }
        if self.transcription.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.transcription.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration path.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a ConfigManager reading from an explicit file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Creates a new ConfigManager rooted in the given directory.
    #[cfg(test)]
    pub fn with_config_dir<P: AsRef<Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns defaults.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        config.validate()?;

        if let TranscriptionBackend::OpenAiCompatible { api_key, .. } = &config.transcription.backend
            && api_key.is_empty()
            && config.transcription.enabled
        {
            warn!("transcription backend has no API key; requests will be rejected");
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.audio.buffer_seconds, 13.0);
        assert_eq!(config.detector.onset_threshold_db, -35.0);
        assert_eq!(config.detector.silence_timeout_secs, 10.0);
        assert_eq!(config.recording.discard_floor_db, -50.0);
        assert_eq!(config.transcription.max_attempts, 3);
        assert_eq!(config.transcription.max_concurrent, 2);
        assert_eq!(config.session.auto_cleanup_days, 7);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config {
            audio: AudioConfig {
                buffer_seconds: 20.0,
                input_device: Some("USB Interface".to_string()),
                ..Default::default()
            },
            transcription: TranscriptionConfig {
                backend: TranscriptionBackend::OpenAiCompatible {
                    url: "https://api.example.com".to_string(),
                    api_key: "secret".to_string(),
                    model: "whisper-1".to_string(),
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.audio.buffer_seconds, 20.0);
        assert_eq!(
            deserialized.audio.input_device.as_deref(),
            Some("USB Interface")
        );
        assert_eq!(
            deserialized.transcription.backend,
            config.transcription.backend
        );
    }

    #[test]
    fn threshold_inversion_is_rejected() {
        let mut config = Config::default();
        config.detector.onset_threshold_db = -50.0;
        config.detector.offset_threshold_db = -40.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdInversion { .. })
        ));

        // Equal thresholds are rejected too; hysteresis needs a gap.
        config.detector.onset_threshold_db = -40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.transcription.max_concurrent = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));
    }

    #[test]
    fn config_manager_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_config_dir(temp_dir.path());

        let mut config = Config::default();
        config.audio.buffer_seconds = 30.0;

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded.audio.buffer_seconds, 30.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_config_dir(temp_dir.path());
        let loaded = manager.load().unwrap();
        assert_eq!(loaded.audio.buffer_seconds, 13.0);
    }
}
