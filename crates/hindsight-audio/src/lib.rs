//! Audio capture and recording pipeline for hindsight.
//!
//! The pieces compose leaves-first: a wait-free [`ring::RingBuffer`]
//! holds the rolling pre-roll, the [`capture`] module owns the real-time
//! callback feeding it, the [`detector`] turns RMS levels into
//! voice-activity edges, the [`writer`] drains a recording to disk, and
//! the [`controller`] ties them together under a single coordinator
//! thread.

pub mod capture;
pub mod controller;
pub mod detector;
pub mod metrics;
pub mod ring;
pub mod writer;

pub use capture::{CaptureEngine, CaptureError};
pub use controller::{ControllerHandle, EngineEvent, RecordingController};
pub use detector::{SignalDetector, SignalEdge};
pub use metrics::CaptureMetrics;
pub use ring::RingBuffer;
pub use writer::{WriterError, WriterReport, WriterStats, wav_spec};
