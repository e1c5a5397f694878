//! Off-thread file writer.
//!
//! The writer receives the pre-roll snapshot and the live-queue consumer
//! at spawn, writes the snapshot first, then drains live blocks in
//! capture order until the stop signal is set and the queue is empty.
//! It reports duration, peak, and average RMS back to the controller and
//! returns the consumer and snapshot buffer for reuse by the next
//! recording.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use tracing::{debug, error};

use hindsight_core::{db_from_amplitude, db_from_power};

use crate::controller::EngineEvent;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Output format: uncompressed 32-bit float PCM, rate and channel count
/// inherited from the audio server.
pub fn wav_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Levels reported for a finished recording.
#[derive(Debug, Clone, Copy)]
pub struct WriterStats {
    pub frames: u64,
    pub duration_secs: f64,
    pub peak_db: f32,
    pub average_rms_db: f32,
}

/// Completion message posted back to the controller.
pub struct WriterReport {
    pub ordinal: u32,
    pub path: PathBuf,
    pub result: Result<WriterStats, WriterError>,
    /// Live-queue consumer, handed back for the next recording.
    pub consumer: rtrb::Consumer<f32>,
    /// Snapshot buffer, handed back for reuse.
    pub snapshot: Vec<f32>,
}

/// Handle the controller keeps while a writer is draining.
pub struct WriterHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WriterHandle {
    /// Tell the writer to finish: drain what is queued, then close.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the writer thread to exit. Called after its report has
    /// been received, so this never blocks long.
    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            handle.join().ok();
        }
    }
}

/// Spawn the writer thread for one recording.
///
/// `snapshot_frames` is the valid pre-roll length within `snapshot`; the
/// rest of the buffer is ignored. The report is delivered through
/// `report_tx` as [`EngineEvent::WriterFinished`].
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    ordinal: u32,
    path: PathBuf,
    spec: WavSpec,
    snapshot: Vec<f32>,
    snapshot_frames: usize,
    consumer: rtrb::Consumer<f32>,
    report_tx: SyncSender<EngineEvent>,
) -> std::io::Result<WriterHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let join = thread::Builder::new()
        .name(format!("hindsight-writer-{ordinal}"))
        .spawn(move || {
            let mut consumer = consumer;
            let mut meter = LevelMeter::default();
            let channels = spec.channels as usize;
            let valid = &snapshot[..snapshot_frames * channels];

            let result = write_recording(&path, spec, valid, &mut consumer, &stop_flag, &mut meter)
                .map(|frames| WriterStats {
                    frames,
                    duration_secs: frames as f64 / spec.sample_rate as f64,
                    peak_db: db_from_amplitude(meter.peak),
                    average_rms_db: db_from_power(meter.mean_square()),
                });

            if let Err(e) = &result {
                error!(ordinal, path = %path.display(), error = %e, "writer failed");
            } else {
                debug!(ordinal, path = %path.display(), "writer finished");
            }

            report_tx
                .send(EngineEvent::WriterFinished(WriterReport {
                    ordinal,
                    path,
                    result,
                    consumer,
                    snapshot,
                }))
                .ok();
        })?;

    Ok(WriterHandle {
        stop,
        join: Some(join),
    })
}

fn write_recording(
    path: &Path,
    spec: WavSpec,
    snapshot: &[f32],
    consumer: &mut rtrb::Consumer<f32>,
    stop: &AtomicBool,
    meter: &mut LevelMeter,
) -> Result<u64, WriterError> {
    let channels = spec.channels as usize;
    let mut wav = WavWriter::create(path, spec)?;

    // Pre-roll first, oldest to newest.
    for &sample in snapshot {
        wav.write_sample(sample)?;
    }
    meter.accumulate(snapshot);
    let mut samples_written = snapshot.len() as u64;

    // Then the live queue, in submission order, until stopped and empty.
    // A single drain can end mid-frame, so frames are tallied at the end.
    loop {
        let drained = drain_available(consumer, &mut wav, meter)?;
        samples_written += drained as u64;
        if stop.load(Ordering::Acquire) && consumer.is_empty() {
            break;
        }
        if drained == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    wav.finalize()?;
    // The completion acknowledgement promises the file is on disk.
    OpenOptions::new().write(true).open(path)?.sync_all()?;
    Ok(samples_written / channels as u64)
}

fn drain_available(
    consumer: &mut rtrb::Consumer<f32>,
    wav: &mut WavWriter<std::io::BufWriter<std::fs::File>>,
    meter: &mut LevelMeter,
) -> Result<usize, WriterError> {
    let available = consumer.slots();
    if available == 0 {
        return Ok(0);
    }
    let Ok(chunk) = consumer.read_chunk(available) else {
        return Ok(0);
    };
    let (first, second) = chunk.as_slices();
    for &sample in first {
        wav.write_sample(sample)?;
    }
    for &sample in second {
        wav.write_sample(sample)?;
    }
    meter.accumulate(first);
    meter.accumulate(second);
    let drained = chunk.len();
    chunk.commit_all();
    Ok(drained)
}

/// Running peak and mean-square accumulator.
#[derive(Default)]
struct LevelMeter {
    peak: f32,
    sum_squares: f64,
    samples: u64,
}

impl LevelMeter {
    fn accumulate(&mut self, samples: &[f32]) {
        for &sample in samples {
            let amplitude = sample.abs();
            if amplitude > self.peak {
                self.peak = amplitude;
            }
            self.sum_squares += (sample as f64) * (sample as f64);
        }
        self.samples += samples.len() as u64;
    }

    fn mean_square(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            (self.sum_squares / self.samples as f64) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use hindsight_core::MIN_DB;

    use super::*;

    fn receive_report(rx: &mpsc::Receiver<EngineEvent>) -> WriterReport {
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            EngineEvent::WriterFinished(report) => report,
            _ => panic!("unexpected event"),
        }
    }

    #[test]
    fn snapshot_then_live_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.wav");
        let spec = wav_spec(1, 8_000);

        let snapshot: Vec<f32> = (0..1_000).map(|i| i as f32 / 10_000.0).collect();
        let (mut producer, consumer) = rtrb::RingBuffer::new(16_384);
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = spawn(1, path.clone(), spec, snapshot.clone(), 1_000, consumer, tx).unwrap();

        // Live audio continues the ramp where the snapshot left off.
        for i in 1_000..2_500 {
            producer.push(i as f32 / 10_000.0).unwrap();
        }
        handle.signal_stop();

        let report = receive_report(&rx);
        let stats = report.result.unwrap();
        assert_eq!(stats.frames, 2_500);
        assert!((stats.duration_secs - 2_500.0 / 8_000.0).abs() < 1e-9);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2_500);
        for (i, &sample) in samples.iter().enumerate() {
            assert_eq!(sample, i as f32 / 10_000.0);
        }
    }

    #[test]
    fn stats_cover_snapshot_and_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002.wav");
        let spec = wav_spec(1, 8_000);

        // Constant 0.5 amplitude: peak -6.02 dB, RMS -6.02 dB.
        let snapshot = vec![0.5f32; 800];
        let (mut producer, consumer) = rtrb::RingBuffer::new(4_096);
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = spawn(2, path, spec, snapshot, 800, consumer, tx).unwrap();
        for _ in 0..800 {
            producer.push(0.5).unwrap();
        }
        handle.signal_stop();

        let report = receive_report(&rx);
        let stats = report.result.unwrap();
        assert_eq!(stats.frames, 1_600);
        assert!((stats.peak_db - (-6.0206)).abs() < 0.01);
        assert!((stats.average_rms_db - (-6.0206)).abs() < 0.01);
    }

    #[test]
    fn empty_recording_reports_floor_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("003.wav");
        let spec = wav_spec(1, 8_000);

        let (_producer, consumer) = rtrb::RingBuffer::new(64);
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = spawn(3, path, spec, Vec::new(), 0, consumer, tx).unwrap();
        handle.signal_stop();

        let report = receive_report(&rx);
        let stats = report.result.unwrap();
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.peak_db, MIN_DB);
        assert_eq!(stats.average_rms_db, MIN_DB);
    }

    #[test]
    fn io_failure_surfaces_and_returns_consumer() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist: create fails immediately.
        let path = dir.path().join("missing").join("004.wav");
        let spec = wav_spec(1, 8_000);

        let (_producer, consumer) = rtrb::RingBuffer::new(64);
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = spawn(4, path, spec, vec![0.1; 10], 10, consumer, tx).unwrap();
        handle.signal_stop();

        let report = receive_report(&rx);
        assert!(report.result.is_err());
        // The consumer and snapshot buffer survive the failure.
        assert!(report.consumer.is_empty());
        assert_eq!(report.snapshot.len(), 10);
    }

    #[test]
    fn stereo_frames_count_frames_not_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("005.wav");
        let spec = wav_spec(2, 8_000);

        // 100 stereo frames of snapshot, 50 live.
        let snapshot = vec![0.25f32; 200];
        let (mut producer, consumer) = rtrb::RingBuffer::new(1_024);
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = spawn(5, path, spec, snapshot, 100, consumer, tx).unwrap();
        for _ in 0..100 {
            producer.push(0.25).unwrap();
        }
        handle.signal_stop();

        let report = receive_report(&rx);
        let stats = report.result.unwrap();
        assert_eq!(stats.frames, 150);
    }
}
