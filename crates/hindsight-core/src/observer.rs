//! The outbound observer surface.
//!
//! The core reports into this trait; UI layers, clipboard sinks, and
//! notification integrations live behind it, outside this workspace's
//! concern. All methods default to no-ops so observers implement only
//! what they consume.

use crate::event::BlockedReason;
use crate::session::Recording;
use crate::state::RecordingState;

pub trait EngineObserver: Send + Sync {
    /// Level meters, published at roughly 20 Hz.
    fn on_level(&self, _peak_db: f32, _rms_db: f32) {}

    /// The controller entered a new state.
    fn on_state_change(&self, _state: RecordingState) {}

    /// A recording finished, survived the energy floor, and was added to
    /// the session.
    fn on_recording_complete(&self, _recording: &Recording) {}

    /// A transcript arrived for the given recording ordinal. The text has
    /// already been overlap-deduplicated against the session transcript.
    fn on_transcript(&self, _ordinal: u32, _text: &str, _language: &str) {}

    /// Transcription gave up on the given recording.
    fn on_transcript_error(&self, _ordinal: u32, _error: &str) {}

    /// A manual record trigger was refused.
    fn on_capture_blocked(&self, _reason: BlockedReason) {}
}
