//! Wait-free ring buffer holding the rolling pre-roll audio.
//!
//! The buffer stores the most recent `capacity` frames of interleaved
//! f32 samples. The capture callback is the only writer; the controller
//! reads it at most once per recording start through
//! [`RingBuffer::snapshot_into`], which unwraps the circular store into
//! a linear, oldest-first copy.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Single-producer ring buffer of interleaved audio frames.
///
/// Capacity is exact, not rounded to a power of two: a 13 s buffer at
/// 48 kHz yields precisely 624 000 frames of pre-roll.
pub struct RingBuffer {
    store: UnsafeCell<Box<[f32]>>,
    /// Capacity in frames.
    capacity: usize,
    channels: usize,
    /// Next write position, in frames. Always `< capacity`.
    cursor: AtomicUsize,
    /// Latched true after the first wrap; never reset.
    filled_once: AtomicBool,
}

// SAFETY: shared-access discipline, not general thread safety:
//
// - `write` is called only from the capture callback (single producer);
//   it is the sole mutator of `store` and `cursor`.
// - `snapshot_into` is called only from the controller thread, at most
//   once per recording start. It loads `cursor` with Acquire against the
//   producer's Release store, so every frame behind the observed cursor
//   is visible.
// - A block being written while the snapshot copies the region around
//   the cursor can be read torn. Pre-roll boundaries are approximate by
//   contract and the artifact is below perceptual thresholds.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a buffer holding `capacity` frames of `channels`-channel
    /// audio, zero-filled.
    pub fn new(capacity: usize, channels: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        assert!(channels > 0, "ring buffer needs at least one channel");
        Self {
            store: UnsafeCell::new(vec![0.0f32; capacity * channels].into_boxed_slice()),
            capacity,
            channels,
            cursor: AtomicUsize::new(0),
            filled_once: AtomicBool::new(false),
        }
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the buffer has wrapped at least once.
    pub fn filled_once(&self) -> bool {
        self.filled_once.load(Ordering::Acquire)
    }

    /// Copy one interleaved block into the buffer, wrapping at capacity.
    ///
    /// Wait-free and allocation-free; called from the capture callback.
    /// `samples.len()` must be a multiple of the channel count. Blocks
    /// larger than the whole buffer are a configuration error; only the
    /// trailing `capacity` frames are kept.
    pub fn write(&self, samples: &[f32]) {
        debug_assert_eq!(samples.len() % self.channels, 0);
        let mut frames = samples.len() / self.channels;
        if frames == 0 {
            return;
        }
        let samples = if frames > self.capacity {
            debug_assert!(false, "block larger than ring buffer capacity");
            frames = self.capacity;
            &samples[samples.len() - self.capacity * self.channels..]
        } else {
            samples
        };

        let cursor = self.cursor.load(Ordering::Relaxed);
        // SAFETY: single producer; see the impl-level discipline above.
        let store = unsafe { &mut *self.store.get() };

        let first = frames.min(self.capacity - cursor);
        let ch = self.channels;
        store[cursor * ch..(cursor + first) * ch].copy_from_slice(&samples[..first * ch]);
        let rest = frames - first;
        if rest > 0 {
            store[..rest * ch].copy_from_slice(&samples[first * ch..]);
        }

        if cursor + frames >= self.capacity {
            self.filled_once.store(true, Ordering::Release);
        }
        self.cursor
            .store((cursor + frames) % self.capacity, Ordering::Release);
    }

    /// Copy the logical contents, oldest frame first, into `target`.
    ///
    /// `target` must hold exactly `capacity * channels` samples. Returns
    /// the number of valid frames: `capacity` once the buffer has
    /// wrapped, otherwise the current fill level. The copy is two
    /// contiguous spans split at the write cursor; no per-sample work.
    pub fn snapshot_into(&self, target: &mut [f32]) -> usize {
        assert_eq!(
            target.len(),
            self.capacity * self.channels,
            "snapshot target must match buffer size"
        );
        let cursor = self.cursor.load(Ordering::Acquire);
        let filled = self.filled_once.load(Ordering::Acquire);
        // SAFETY: read-only view; concurrent producer writes can tear at
        // most the blocks straddling the cursor, which is accepted.
        let store = unsafe { &*self.store.get() };
        let ch = self.channels;

        if filled {
            let tail = self.capacity - cursor;
            target[..tail * ch].copy_from_slice(&store[cursor * ch..]);
            target[tail * ch..].copy_from_slice(&store[..cursor * ch]);
            self.capacity
        } else {
            target[..cursor * ch].copy_from_slice(&store[..cursor * ch]);
            cursor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ring: &RingBuffer) -> (Vec<f32>, usize) {
        let mut target = vec![0.0; ring.capacity() * ring.channels()];
        let frames = ring.snapshot_into(&mut target);
        (target, frames)
    }

    #[test]
    fn partial_fill_returns_cursor_frames() {
        let ring = RingBuffer::new(1000, 1);
        let block: Vec<f32> = (0..300).map(|i| i as f32).collect();
        ring.write(&block);

        let (target, frames) = snapshot(&ring);
        assert_eq!(frames, 300);
        assert!(!ring.filled_once());
        assert_eq!(target[0], 0.0);
        assert_eq!(target[299], 299.0);
    }

    #[test]
    fn wrapped_snapshot_is_oldest_first() {
        let ring = RingBuffer::new(100, 1);
        // Write 250 monotonically numbered samples in uneven blocks.
        let samples: Vec<f32> = (0..250).map(|i| i as f32).collect();
        for block in samples.chunks(33) {
            ring.write(block);
        }

        let (target, frames) = snapshot(&ring);
        assert_eq!(frames, 100);
        assert!(ring.filled_once());
        // The buffer holds samples 150..250, unwrapped in order.
        for (i, &sample) in target.iter().enumerate() {
            assert_eq!(sample, (150 + i) as f32);
        }
    }

    #[test]
    fn filled_latch_survives_further_writes() {
        let ring = RingBuffer::new(10, 1);
        ring.write(&[1.0; 10]);
        assert!(ring.filled_once());
        ring.write(&[2.0; 3]);
        assert!(ring.filled_once());
        let (_, frames) = snapshot(&ring);
        assert_eq!(frames, 10);
    }

    #[test]
    fn arbitrary_block_sizes_total_over_capacity() {
        let ring = RingBuffer::new(500, 1);
        let mut value = 0u32;
        for size in [1, 7, 499, 500, 13, 128, 256, 64, 3] {
            let block: Vec<f32> = (0..size)
                .map(|_| {
                    value += 1;
                    value as f32
                })
                .collect();
            ring.write(&block);
        }
        // 1471 samples written into a 500-frame buffer.
        let (target, frames) = snapshot(&ring);
        assert_eq!(frames, 500);
        let newest = value as f32;
        assert_eq!(target[499], newest);
        assert_eq!(target[0], newest - 499.0);
    }

    #[test]
    fn interleaved_stereo_frames_stay_paired() {
        let ring = RingBuffer::new(4, 2);
        // Frames (L, R): (1, -1), (2, -2), ..., (6, -6); capacity 4 keeps 3..=6.
        for i in 1..=6 {
            ring.write(&[i as f32, -(i as f32)]);
        }
        let (target, frames) = snapshot(&ring);
        assert_eq!(frames, 4);
        assert_eq!(target, vec![3.0, -3.0, 4.0, -4.0, 5.0, -5.0, 6.0, -6.0]);
    }

    #[test]
    fn empty_buffer_snapshot_is_empty() {
        let ring = RingBuffer::new(64, 2);
        let (_, frames) = snapshot(&ring);
        assert_eq!(frames, 0);
    }
}
