//! Capture engine: the audio-server interface and the real-time callback.
//!
//! The data callback is the hard real-time entry point. Per invocation it
//! writes the block into the ring buffer, publishes level metrics, and,
//! while a recording is active, copies the block into the wait-free live
//! queue. It must not allocate, lock, log, or block; everything it
//! touches is pre-sized when the stream is built.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SupportedStreamConfig};
use thiserror::Error;
use tracing::{error, info};

use hindsight_core::AudioConfig;

use crate::metrics::CaptureMetrics;
use crate::ring::RingBuffer;

/// Mean-square levels are computed on every Kth callback to keep the
/// hot path cheap; peak is tracked on every block.
const RMS_DECIMATION: u64 = 10;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoInputDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(String),

    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),

    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Owns the input stream, the ring buffer, and the capture-side shared
/// state. Lives on the coordinator thread; the stream is not `Send` and
/// never leaves it.
pub struct CaptureEngine {
    _stream: cpal::Stream,
    ring: Arc<RingBuffer>,
    metrics: Arc<CaptureMetrics>,
    recording: Arc<AtomicBool>,
    device_name: String,
    sample_rate: u32,
    channels: u16,
    config: AudioConfig,
}

impl CaptureEngine {
    /// Open the configured input device and start capturing into the
    /// ring buffer. Returns the engine and the consumer end of the live
    /// queue; the producer end lives inside the callback.
    pub fn start(config: &AudioConfig) -> Result<(Self, rtrb::Consumer<f32>)> {
        let host = cpal::default_host();
        let device = resolve_device(&host, config.input_device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|_| CaptureError::NoInputDevice)?;
        Self::start_on(device, supported, config.clone())
    }

    fn start_on(
        device: Device,
        supported: SupportedStreamConfig,
        config: AudioConfig,
    ) -> Result<(Self, rtrb::Consumer<f32>)> {
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(CaptureError::SampleFormatNotSupported(format!(
                "{:?}",
                supported.sample_format()
            )));
        }

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        let capacity_frames = (sample_rate as f32 * config.buffer_seconds).round() as usize;
        let ring = Arc::new(RingBuffer::new(capacity_frames.max(1), channels as usize));
        let metrics = Arc::new(CaptureMetrics::new());
        let recording = Arc::new(AtomicBool::new(false));

        let live_capacity =
            (sample_rate as f32 * channels as f32 * config.live_queue_seconds).round() as usize;
        let (producer, consumer) = rtrb::RingBuffer::new(live_capacity.max(1));

        info!(
            device = %device_name,
            sample_rate,
            channels,
            buffer_frames = capacity_frames,
            live_queue_samples = live_capacity,
            "starting capture"
        );

        let stream = build_stream(
            &device,
            &supported.config(),
            ring.clone(),
            metrics.clone(),
            recording.clone(),
            producer,
        )?;
        stream.play()?;

        Ok((
            Self {
                _stream: stream,
                ring,
                metrics,
                recording,
                device_name,
                sample_rate,
                channels,
                config,
            },
            consumer,
        ))
    }

    /// Switch to a different input device. Only legal while no recording
    /// is active; the old stream, ring buffer, and live queue are
    /// replaced wholesale. Returns the new live-queue consumer.
    pub fn select_input(&mut self, device: Option<&str>) -> Result<rtrb::Consumer<f32>> {
        let config = AudioConfig {
            input_device: device.map(str::to_owned),
            ..self.config.clone()
        };
        let (engine, consumer) = Self::start(&config)?;
        *self = engine;
        Ok(consumer)
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn metrics(&self) -> &CaptureMetrics {
        &self.metrics
    }

    /// Route captured blocks into the live queue (or stop doing so).
    pub fn set_recording(&self, active: bool) {
        self.recording.store(active, Ordering::Release);
    }

    /// Whether the engine has a usable input connection.
    pub fn input_connected(&self) -> bool {
        !self.metrics.stream_failed()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn resolve_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoInputDevice),
        Some(wanted) => {
            let devices = host
                .input_devices()
                .map_err(|e| CaptureError::Devices(e.to_string()))?;
            for device in devices {
                if device.name().is_ok_and(|n| n == wanted) {
                    return Ok(device);
                }
            }
            Err(CaptureError::DeviceNotFound(wanted.to_string()))
        }
    }
}

fn build_stream(
    device: &Device,
    stream_config: &cpal::StreamConfig,
    ring: Arc<RingBuffer>,
    metrics: Arc<CaptureMetrics>,
    recording: Arc<AtomicBool>,
    mut producer: rtrb::Producer<f32>,
) -> Result<cpal::Stream> {
    let channels = stream_config.channels as usize;
    let callback_metrics = metrics.clone();
    let mut ticks: u64 = 0;

    let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // Real-time path: linear in the block size, no allocation, no
        // locks, no logging, no syscalls.
        ring.write(data);

        let mut peak = 0.0f32;
        for &sample in data {
            let amplitude = sample.abs();
            if amplitude > peak {
                peak = amplitude;
            }
        }
        callback_metrics.publish_peak(peak);

        ticks += 1;
        if ticks % RMS_DECIMATION == 0 && !data.is_empty() {
            let sum: f32 = data.iter().map(|s| s * s).sum();
            callback_metrics.publish_mean_square(sum / data.len() as f32);
        }

        if recording.load(Ordering::Acquire) {
            match producer.write_chunk_uninit(data.len()) {
                Ok(chunk) => {
                    chunk.fill_from_iter(data.iter().copied());
                }
                // Queue full: drop the whole block and count it. This is
                // degradation, not failure.
                Err(_) => callback_metrics.record_dropped_frames((data.len() / channels) as u64),
            }
        }
    };

    let err_fn = move |err| {
        metrics.mark_stream_failed();
        error!("input stream error: {err}");
    };

    let stream = device.build_input_stream(stream_config, data_fn, err_fn, None)?;
    Ok(stream)
}
