//! Voice-activity detection from the capture RMS stream.
//!
//! The detector never sees raw audio. It consumes the downsampled RMS
//! levels the capture callback publishes and turns them into onset and
//! offset edges for the controller. Sustain timers filter transients on
//! the way in and require real silence on the way out; the two
//! thresholds are independent so the pair can be configured with
//! hysteresis.

use std::time::{Duration, Instant};

use hindsight_core::DetectorConfig;

/// Voice-activity edge reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEdge {
    /// Sustained signal above the onset threshold.
    Onset,
    /// Continuous silence past the timeout.
    Offset,
}

/// Edge detector over an RMS level stream.
///
/// Holds no audio state of its own, only the sustain/silence timers.
/// Timestamps are passed in explicitly so tests can drive a synthetic
/// clock.
pub struct SignalDetector {
    onset_threshold_db: f32,
    offset_threshold_db: f32,
    onset_sustain: Duration,
    silence_timeout: Duration,
    above_since: Option<Instant>,
    below_since: Option<Instant>,
    voice_active: bool,
}

impl SignalDetector {
    /// Build from a validated configuration. Threshold ordering
    /// (`onset > offset`) is enforced at config load.
    pub fn new(config: &DetectorConfig) -> Self {
        debug_assert!(config.onset_threshold_db > config.offset_threshold_db);
        Self {
            onset_threshold_db: config.onset_threshold_db,
            offset_threshold_db: config.offset_threshold_db,
            onset_sustain: config.onset_sustain(),
            silence_timeout: config.silence_timeout(),
            above_since: None,
            below_since: None,
            voice_active: false,
        }
    }

    /// Feed one RMS sample; returns an edge when one fires.
    ///
    /// A stream that starts above the onset threshold fires `Onset` once
    /// the sustain elapses from the first sample. With a zero sustain the
    /// first above-threshold sample fires immediately; with a zero
    /// timeout any sub-threshold sample ends the voice period.
    pub fn update(&mut self, rms_db: f32, now: Instant) -> Option<SignalEdge> {
        if !self.voice_active {
            if rms_db >= self.onset_threshold_db {
                let since = *self.above_since.get_or_insert(now);
                if now.duration_since(since) >= self.onset_sustain {
                    self.voice_active = true;
                    self.above_since = None;
                    self.below_since = None;
                    return Some(SignalEdge::Onset);
                }
            } else {
                self.above_since = None;
            }
        } else if rms_db < self.offset_threshold_db {
            let since = *self.below_since.get_or_insert(now);
            if now.duration_since(since) >= self.silence_timeout {
                self.voice_active = false;
                self.below_since = None;
                return Some(SignalEdge::Offset);
            }
        } else {
            self.below_since = None;
        }
        None
    }

    /// Forget all timers and the active-voice flag. Called between
    /// recordings.
    pub fn reset(&mut self) {
        self.above_since = None;
        self.below_since = None;
        self.voice_active = false;
    }
}
