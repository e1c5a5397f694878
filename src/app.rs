//! Engine assembly and lifecycle.
//!
//! Construction is leaves-first: capture engine, session, dispatcher,
//! then the controller that ties them together. The coordinator loop
//! runs on the main thread; signals arrive over the event channel from
//! the bridge thread. Shutdown is ordered: the file writer drains first
//! (inside the controller), then the transcription dispatcher gets
//! whatever remains of the deadline.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use hindsight_audio::{CaptureEngine, RecordingController};
use hindsight_core::{
    Config, EngineObserver, SHUTDOWN_DEADLINE, Session, Shutdown, TranscriptSink,
    cleanup_stale_sessions,
};
use hindsight_transcribe::Dispatcher;

use crate::ipc;
use crate::observer::LogObserver;

pub fn run(config: Config) -> Result<()> {
    let _pid_file = ipc::PidFile::acquire()?;

    let temp_root = config.session.temp_root()?;
    match cleanup_stale_sessions(&temp_root, config.session.auto_cleanup_days) {
        Ok(0) => {}
        Ok(removed) => info!(removed, "cleaned up stale sessions"),
        Err(e) => warn!("session cleanup failed: {e}"),
    }

    let observer: Arc<dyn EngineObserver> = Arc::new(LogObserver);

    let (engine, live_rx) =
        CaptureEngine::start(&config.audio).context("failed to start audio capture")?;
    let session = Session::create(&temp_root).context("failed to create session")?;

    let shutdown = Shutdown::new();
    let dispatcher = if config.transcription.enabled {
        let dispatcher =
            Dispatcher::new(&config.transcription, observer.clone(), shutdown.clone())
                .context("failed to start transcription dispatcher")?;
        if !dispatcher.health() {
            warn!("transcription backend unreachable; recordings will queue failures until it returns");
        }
        Some(dispatcher)
    } else {
        None
    };
    let sink: Option<Arc<dyn TranscriptSink>> = dispatcher
        .as_ref()
        .map(|d| Arc::new(d.handle()) as Arc<dyn TranscriptSink>);

    let (controller, handle) = RecordingController::new(
        config,
        engine,
        live_rx,
        session,
        temp_root,
        observer,
        sink,
        shutdown,
    );

    ipc::spawn_signal_listener(handle)?;
    info!("ready; send SIGUSR1 or run `hindsight --toggle` to record");

    // Blocks until shutdown; the cpal stream lives on this thread.
    let shutdown_started = controller.run();

    if let Some(dispatcher) = dispatcher {
        let remaining = shutdown_started
            .map(|started| SHUTDOWN_DEADLINE.saturating_sub(started.elapsed()))
            .unwrap_or(SHUTDOWN_DEADLINE);
        dispatcher.shutdown(remaining);
    }

    info!("exited cleanly");
    Ok(())
}
