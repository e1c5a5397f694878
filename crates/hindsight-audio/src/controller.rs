//! Recording controller: the coordinator thread.
//!
//! All state transitions happen here, on a single thread, fed by a
//! bounded event channel. The capture callback never mutates controller
//! state; it publishes metrics the tick loop polls. Writers and
//! transcription workers report back through the same channel or the
//! observer surface, so nothing in the pipeline is mutably shared.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use hindsight_core::{
    BlockedReason, Config, EngineObserver, Recording, RecordingState, SHUTDOWN_DEADLINE, Session,
    Shutdown, TranscriptSink, TranscriptionJob, db_from_amplitude, db_from_power,
    recording_filename,
};

use crate::capture::CaptureEngine;
use crate::detector::{SignalDetector, SignalEdge};
use crate::writer::{self, WriterHandle, WriterReport, wav_spec};

/// Poll interval of the coordinator loop; also the level-meter cadence
/// (~20 Hz).
const TICK: Duration = Duration::from_millis(50);

/// Capacity of the coordinator's event channel.
const EVENT_QUEUE: usize = 64;

/// Input alphabet of the controller.
pub enum EngineEvent {
    /// Operator trigger: start or stop, depending on state.
    Toggle,
    /// Enable or disable auto-record.
    SetAutoRecord(bool),
    /// Switch the capture input device (`None` = system default).
    SelectInput(Option<String>),
    /// Copy the session to a permanent location.
    SaveSession(PathBuf),
    /// Delete the current session and start a fresh one.
    DiscardSession,
    /// Begin cooperative shutdown.
    Shutdown,
    /// Posted by the file writer when it has closed the file.
    WriterFinished(WriterReport),
}

/// Cloneable sender half of the control surface.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: SyncSender<EngineEvent>,
}

impl ControllerHandle {
    pub fn toggle(&self) {
        self.send(EngineEvent::Toggle);
    }

    pub fn set_auto_record(&self, enabled: bool) {
        self.send(EngineEvent::SetAutoRecord(enabled));
    }

    pub fn select_inputs(&self, device: Option<String>) {
        self.send(EngineEvent::SelectInput(device));
    }

    pub fn save_session(&self, path: PathBuf) {
        self.send(EngineEvent::SaveSession(path));
    }

    pub fn discard_session(&self) {
        self.send(EngineEvent::DiscardSession);
    }

    pub fn request_shutdown(&self) {
        self.send(EngineEvent::Shutdown);
    }

    fn send(&self, event: EngineEvent) {
        if self.tx.try_send(event).is_err() {
            warn!("controller queue full; control event dropped");
        }
    }
}

enum Trigger {
    Manual,
    Auto,
}

struct ActiveRecording {
    ordinal: u32,
    started_at: DateTime<Local>,
    writer: WriterHandle,
}

/// Owns the FSM, the session, and the writer lifecycle.
pub struct RecordingController {
    config: Config,
    engine: CaptureEngine,
    session: Session,
    temp_root: PathBuf,
    detector: SignalDetector,
    observer: Arc<dyn EngineObserver>,
    transcripts: Option<Arc<dyn TranscriptSink>>,
    shutdown: Shutdown,
    rx: Receiver<EngineEvent>,
    tx: SyncSender<EngineEvent>,
    state: RecordingState,
    auto_enabled: bool,
    /// Consumer end of the live queue; absent while a writer holds it.
    live_rx: Option<rtrb::Consumer<f32>>,
    /// Pre-sized ring snapshot target, recycled between recordings.
    snapshot_buf: Vec<f32>,
    active: Option<ActiveRecording>,
    last_activity: Option<Instant>,
    last_level_publish: Instant,
    dropped_seen: u64,
    stream_failure_reported: bool,
    shutdown_started: Option<Instant>,
}

impl RecordingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        engine: CaptureEngine,
        live_rx: rtrb::Consumer<f32>,
        session: Session,
        temp_root: PathBuf,
        observer: Arc<dyn EngineObserver>,
        transcripts: Option<Arc<dyn TranscriptSink>>,
        shutdown: Shutdown,
    ) -> (Self, ControllerHandle) {
        let (tx, rx) = sync_channel(EVENT_QUEUE);
        let snapshot_buf = vec![0.0; engine.ring().capacity() * engine.ring().channels()];
        let detector = SignalDetector::new(&config.detector);
        let auto_enabled = config.recording.auto_record;
        let state = if auto_enabled {
            RecordingState::Armed
        } else {
            RecordingState::Idle
        };

        let controller = Self {
            config,
            engine,
            session,
            temp_root,
            detector,
            observer,
            transcripts,
            shutdown,
            rx,
            tx: tx.clone(),
            state,
            auto_enabled,
            live_rx: Some(live_rx),
            snapshot_buf,
            active: None,
            last_activity: None,
            last_level_publish: Instant::now(),
            dropped_seen: 0,
            stream_failure_reported: false,
            shutdown_started: None,
        };
        (controller, ControllerHandle { tx })
    }

    /// Run the coordinator loop until shutdown completes. Returns when
    /// shutdown began, for deadline accounting by the caller.
    pub fn run(mut self) -> Option<Instant> {
        info!(state = %self.state, "recording controller started");
        self.observer.on_state_change(self.state);

        loop {
            match self.rx.recv_timeout(TICK) {
                Ok(event) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick();

            // The writer is prioritized during shutdown, but not past
            // the hard deadline.
            if let Some(started) = self.shutdown_started
                && self.active.is_some()
                && started.elapsed() >= SHUTDOWN_DEADLINE
            {
                warn!("shutdown deadline expired while draining; unwritten audio is lost");
                break;
            }
        }

        if let Err(e) = self.session.persist() {
            error!("failed to persist session metadata on exit: {e}");
        }
        info!("recording controller stopped");
        self.shutdown_started
    }

    /// Returns true when the loop should exit.
    fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Toggle => {
                match self.state {
                    RecordingState::Idle | RecordingState::Armed => self.try_start(Trigger::Manual),
                    RecordingState::RecordingManual | RecordingState::RecordingAuto => {
                        self.begin_stop()
                    }
                    RecordingState::Stopping => debug!("toggle ignored while stopping"),
                }
                false
            }
            EngineEvent::SetAutoRecord(enabled) => {
                self.auto_enabled = enabled;
                match (self.state, enabled) {
                    (RecordingState::Idle, true) => self.set_state(RecordingState::Armed),
                    (RecordingState::Armed, false) => self.set_state(RecordingState::Idle),
                    _ => {}
                }
                false
            }
            EngineEvent::SelectInput(device) => {
                self.select_input(device);
                false
            }
            EngineEvent::SaveSession(path) => {
                if let Err(e) = self.session.save_to(&path) {
                    error!(dest = %path.display(), "failed to save session: {e}");
                }
                false
            }
            EngineEvent::DiscardSession => {
                self.replace_session();
                false
            }
            EngineEvent::Shutdown => {
                if self.shutdown_started.is_none() {
                    info!("shutdown requested");
                    self.shutdown.request();
                    self.shutdown_started = Some(Instant::now());
                }
                match self.state {
                    RecordingState::RecordingManual | RecordingState::RecordingAuto => {
                        self.begin_stop();
                        false
                    }
                    RecordingState::Stopping => false,
                    RecordingState::Idle | RecordingState::Armed => true,
                }
            }
            EngineEvent::WriterFinished(report) => self.finish_recording(report),
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();

        if self.engine.metrics().stream_failed() && !self.stream_failure_reported {
            self.stream_failure_reported = true;
            warn!("input stream failed; capture is blocked until reselection");
            self.observer.on_capture_blocked(BlockedReason::StreamFailed);
            if self.state.is_recording() {
                self.begin_stop();
            }
        }

        let peak_db = db_from_amplitude(self.engine.metrics().peak_amplitude());
        let rms_db = db_from_power(self.engine.metrics().mean_square());

        if now.duration_since(self.last_level_publish) >= TICK {
            self.observer.on_level(peak_db, rms_db);
            self.last_level_publish = now;
        }

        if rms_db >= self.config.recording.activity_threshold_db {
            self.last_activity = Some(now);
        }

        let dropped = self.engine.metrics().dropped_frames();
        if dropped > self.dropped_seen {
            warn!(
                newly_dropped = dropped - self.dropped_seen,
                total_dropped = dropped,
                "live queue exhausted; captured frames dropped"
            );
            self.dropped_seen = dropped;
        }

        if self.auto_enabled
            && let Some(edge) = self.detector.update(rms_db, now)
        {
            match (edge, self.state) {
                (SignalEdge::Onset, RecordingState::Armed) => {
                    info!(rms_db, "voice onset detected");
                    self.try_start(Trigger::Auto);
                }
                (SignalEdge::Offset, RecordingState::RecordingAuto) => {
                    info!("silence timeout elapsed");
                    self.begin_stop();
                }
                _ => {}
            }
        }
    }

    fn try_start(&mut self, trigger: Trigger) {
        // Activity gate: recording with no input connected would only
        // ever produce an empty file. A connected-but-silent input
        // passes; the operator may be about to speak.
        if !self.engine.input_connected() {
            warn!("record trigger refused: {}", BlockedReason::PortsMissing);
            self.observer.on_capture_blocked(BlockedReason::PortsMissing);
            return;
        }
        let recently_active = self
            .last_activity
            .is_some_and(|at| at.elapsed() <= self.config.recording.activity_window());
        if !recently_active {
            debug!("input connected but silent; gate falls open");
        }

        let Some(mut consumer) = self.live_rx.take() else {
            error!("live queue unavailable; cannot start recording");
            return;
        };
        drain_stale(&mut consumer);

        let ordinal = self.session.next_ordinal();
        let path = self.session.recording_path(ordinal);

        // Snapshot first, then raise the live flag: at most one callback
        // block falls into the seam, within the pre-roll tolerance.
        let mut snapshot = std::mem::take(&mut self.snapshot_buf);
        let preroll_frames = self.engine.ring().snapshot_into(&mut snapshot);
        self.engine.set_recording(true);

        let spec = wav_spec(self.engine.channels(), self.engine.sample_rate());
        match writer::spawn(
            ordinal,
            path.clone(),
            spec,
            snapshot,
            preroll_frames,
            consumer,
            self.tx.clone(),
        ) {
            Ok(handle) => {
                info!(
                    ordinal,
                    preroll_frames,
                    path = %path.display(),
                    "recording started"
                );
                self.active = Some(ActiveRecording {
                    ordinal,
                    started_at: Local::now(),
                    writer: handle,
                });
                self.set_state(match trigger {
                    Trigger::Manual => RecordingState::RecordingManual,
                    Trigger::Auto => RecordingState::RecordingAuto,
                });
            }
            Err(e) => {
                self.engine.set_recording(false);
                error!("failed to spawn file writer: {e}");
            }
        }
    }

    fn begin_stop(&mut self) {
        self.engine.set_recording(false);
        if let Some(active) = &self.active {
            active.writer.signal_stop();
        }
        self.set_state(RecordingState::Stopping);
    }

    /// Handle the writer's completion report. Returns true when the loop
    /// should exit (shutdown was in progress).
    fn finish_recording(&mut self, report: WriterReport) -> bool {
        let Some(mut active) = self.active.take() else {
            warn!("writer report received with no active recording");
            return false;
        };
        active.writer.join();

        // A writer that failed mid-recording reports before any stop was
        // requested; stop routing audio and pass through Stopping.
        if self.state.is_recording() {
            self.engine.set_recording(false);
            self.set_state(RecordingState::Stopping);
        }

        // Recycle the shared buffers for the next recording.
        self.snapshot_buf = report.snapshot;
        let mut consumer = report.consumer;
        drain_stale(&mut consumer);
        self.live_rx = Some(consumer);

        match report.result {
            Ok(stats) => {
                if stats.average_rms_db < self.config.recording.discard_floor_db {
                    info!(
                        ordinal = report.ordinal,
                        average_rms_db = stats.average_rms_db,
                        floor_db = self.config.recording.discard_floor_db,
                        "recording below energy floor; discarding"
                    );
                    if let Err(e) = fs::remove_file(&report.path) {
                        warn!(path = %report.path.display(), "failed to delete discarded recording: {e}");
                    }
                } else {
                    let recording = Recording {
                        ordinal: report.ordinal,
                        filename: recording_filename(report.ordinal),
                        started_at: active.started_at,
                        duration_secs: stats.duration_secs,
                        channels: self.engine.channels(),
                        sample_rate: self.engine.sample_rate(),
                        peak_db: stats.peak_db,
                        average_rms_db: stats.average_rms_db,
                        failed: false,
                    };
                    info!(
                        ordinal = recording.ordinal,
                        duration_secs = recording.duration_secs,
                        peak_db = recording.peak_db,
                        average_rms_db = recording.average_rms_db,
                        "recording complete"
                    );
                    if let Err(e) = self.session.append(recording.clone()) {
                        error!("failed to record session metadata: {e}");
                    }
                    self.observer.on_recording_complete(&recording);

                    if self.config.transcription.enabled
                        && let Some(sink) = &self.transcripts
                    {
                        sink.submit(TranscriptionJob {
                            ordinal: report.ordinal,
                            audio_path: report.path.clone(),
                            transcript_path: self.session.transcript_path(report.ordinal),
                        });
                    }
                }
            }
            Err(e) => {
                error!(ordinal = report.ordinal, "recording failed: {e}");
                if !self.config.recording.keep_failed {
                    fs::remove_file(&report.path).ok();
                } else if report.path.exists() {
                    let recording = Recording {
                        ordinal: report.ordinal,
                        filename: recording_filename(report.ordinal),
                        started_at: active.started_at,
                        duration_secs: 0.0,
                        channels: self.engine.channels(),
                        sample_rate: self.engine.sample_rate(),
                        peak_db: hindsight_core::MIN_DB,
                        average_rms_db: hindsight_core::MIN_DB,
                        failed: true,
                    };
                    if let Err(e) = self.session.append(recording) {
                        error!("failed to record failed-recording metadata: {e}");
                    }
                }
            }
        }

        self.detector.reset();
        self.set_state(if self.auto_enabled {
            RecordingState::Armed
        } else {
            RecordingState::Idle
        });
        self.shutdown_started.is_some()
    }

    fn select_input(&mut self, device: Option<String>) {
        if self.active.is_some() || self.state == RecordingState::Stopping {
            warn!("input selection ignored while a recording is active");
            return;
        }
        match self.engine.select_input(device.as_deref()) {
            Ok(consumer) => {
                self.live_rx = Some(consumer);
                self.snapshot_buf =
                    vec![0.0; self.engine.ring().capacity() * self.engine.ring().channels()];
                self.stream_failure_reported = false;
                self.last_activity = None;
                info!(device = %self.engine.device_name(), "input selected");
            }
            Err(e) => {
                error!("input selection failed: {e}");
                self.observer.on_capture_blocked(BlockedReason::StreamFailed);
            }
        }
    }

    fn replace_session(&mut self) {
        if self.active.is_some() {
            warn!("cannot discard session while a recording is active");
            return;
        }
        let fresh = match Session::create(&self.temp_root) {
            Ok(session) => session,
            Err(e) => {
                error!("failed to create replacement session: {e}");
                return;
            }
        };
        let old = std::mem::replace(&mut self.session, fresh);
        if let Err(e) = old.discard() {
            error!("failed to discard session: {e}");
        }
    }

    fn set_state(&mut self, next: RecordingState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal state transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.observer.on_state_change(next);
    }
}

/// Throw away whatever is left in the live queue from a previous
/// recording's tail.
fn drain_stale(consumer: &mut rtrb::Consumer<f32>) {
    loop {
        let available = consumer.slots();
        if available == 0 {
            return;
        }
        match consumer.read_chunk(available) {
            Ok(chunk) => chunk.commit_all(),
            Err(_) => return,
        }
    }
}
