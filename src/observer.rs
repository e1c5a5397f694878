//! Logging implementation of the observer surface.
//!
//! External integrations (UI meters, clipboard, notifications) plug in
//! behind `EngineObserver`; the binary itself only narrates through
//! tracing.

use tracing::{info, trace, warn};

use hindsight_core::{BlockedReason, EngineObserver, Recording, RecordingState};

pub struct LogObserver;

impl EngineObserver for LogObserver {
    fn on_level(&self, peak_db: f32, rms_db: f32) {
        trace!(peak_db, rms_db, "level");
    }

    fn on_state_change(&self, state: RecordingState) {
        info!(%state, "state changed");
    }

    fn on_recording_complete(&self, recording: &Recording) {
        info!(
            ordinal = recording.ordinal,
            duration_secs = recording.duration_secs,
            peak_db = recording.peak_db,
            "recording added to session"
        );
    }

    fn on_transcript(&self, ordinal: u32, text: &str, language: &str) {
        info!(ordinal, language, "transcript: {text}");
    }

    fn on_transcript_error(&self, ordinal: u32, error: &str) {
        warn!(ordinal, "transcription failed: {error}");
    }

    fn on_capture_blocked(&self, reason: BlockedReason) {
        warn!("capture blocked: {reason}");
    }
}
