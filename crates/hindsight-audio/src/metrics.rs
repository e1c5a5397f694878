//! Atomics bridging the capture callback and the coordinator.
//!
//! The callback publishes raw linear values (peak amplitude, mean-square
//! power) so it never computes a logarithm on the real-time path; readers
//! convert to decibels.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Shared capture-side metrics. Written by the callback, read by the
/// coordinator and level meters. Never locked.
pub struct CaptureMetrics {
    peak_bits: AtomicU32,
    mean_square_bits: AtomicU32,
    dropped_frames: AtomicU64,
    stream_failed: AtomicBool,
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self {
            peak_bits: AtomicU32::new(0.0f32.to_bits()),
            mean_square_bits: AtomicU32::new(0.0f32.to_bits()),
            dropped_frames: AtomicU64::new(0),
            stream_failed: AtomicBool::new(false),
        }
    }
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the peak absolute sample value of the latest block.
    pub fn publish_peak(&self, amplitude: f32) {
        self.peak_bits.store(amplitude.to_bits(), Ordering::Relaxed);
    }

    pub fn peak_amplitude(&self) -> f32 {
        f32::from_bits(self.peak_bits.load(Ordering::Relaxed))
    }

    /// Publish the mean-square power of a decimated block.
    pub fn publish_mean_square(&self, power: f32) {
        self.mean_square_bits
            .store(power.to_bits(), Ordering::Relaxed);
    }

    pub fn mean_square(&self) -> f32 {
        f32::from_bits(self.mean_square_bits.load(Ordering::Relaxed))
    }

    /// Count frames dropped because the live queue was full.
    pub fn record_dropped_frames(&self, frames: u64) {
        self.dropped_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Set by the stream error callback; cleared only by rebuilding the
    /// stream.
    pub fn mark_stream_failed(&self) {
        self.stream_failed.store(true, Ordering::Release);
    }

    pub fn stream_failed(&self) -> bool {
        self.stream_failed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_round_trip_through_bits() {
        let metrics = CaptureMetrics::new();
        metrics.publish_peak(0.7071);
        metrics.publish_mean_square(0.25);
        assert_eq!(metrics.peak_amplitude(), 0.7071);
        assert_eq!(metrics.mean_square(), 0.25);
    }

    #[test]
    fn dropped_frames_accumulate() {
        let metrics = CaptureMetrics::new();
        metrics.record_dropped_frames(128);
        metrics.record_dropped_frames(64);
        assert_eq!(metrics.dropped_frames(), 192);
    }
}
