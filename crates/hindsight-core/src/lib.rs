//! Core types and configuration for hindsight.
//!
//! This crate provides the platform-agnostic pieces shared by the audio
//! engine, the transcription dispatcher, and the application binary:
//! configuration, the recording state machine, session bookkeeping, and
//! the observer surface the core reports through.

mod config;
mod event;
mod observer;
mod session;
mod shutdown;
mod state;

pub use config::{
    AudioConfig, Config, ConfigError, ConfigManager, DetectorConfig, RecordingConfig,
    SessionConfig, TranscriptionBackend, TranscriptionConfig,
};
pub use event::{BlockedReason, TranscriptSink, TranscriptionJob};
pub use observer::EngineObserver;
pub use session::{
    Recording, Session, SessionError, cleanup_stale_sessions, is_stale, recording_filename,
};
pub use shutdown::Shutdown;
pub use state::RecordingState;

use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "hindsight";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Hard ceiling on cooperative shutdown, from signal to forced exit.
/// Workers that have not finished by then are abandoned.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

/// Floor for decibel conversions; silence and zero samples clamp here.
pub const MIN_DB: f32 = -96.0;

/// Convert a linear amplitude (peak sample value) to dBFS.
pub fn db_from_amplitude(amplitude: f32) -> f32 {
    (20.0 * amplitude.log10()).clamp(MIN_DB, 0.0)
}

/// Convert a mean-square power value to dBFS.
///
/// Equivalent to `20 * log10(sqrt(power))` without the square root.
pub fn db_from_power(power: f32) -> f32 {
    (10.0 * power.log10()).clamp(MIN_DB, 0.0)
}
