//! Cross-component types for capture gating and transcription hand-off.

use std::fmt;
use std::path::PathBuf;

/// Why a manual record trigger was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// The audio engine has no input connection.
    PortsMissing,
    /// The input stream reported a failure and needs reselection.
    StreamFailed,
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortsMissing => f.write_str("no audio input connected"),
            Self::StreamFailed => f.write_str("audio input stream failed"),
        }
    }
}

/// A completed recording queued for transcription.
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    /// Ordinal of the recording within its session.
    pub ordinal: u32,
    /// The finished audio file.
    pub audio_path: PathBuf,
    /// Where the transcript should be written on success.
    pub transcript_path: PathBuf,
}

/// Accepts transcription jobs from the recording controller.
///
/// The controller only ever enqueues; outcomes come back through the
/// observer surface.
pub trait TranscriptSink: Send + Sync {
    fn submit(&self, job: TranscriptionJob);
}
