//! Trigger IPC and OS signal plumbing.
//!
//! A second `hindsight --toggle` invocation finds the running instance
//! through a PID file under the user's runtime directory and sends it
//! SIGUSR1. The receiving side keeps the actual signal handler minimal:
//! tokio's signal driver marks the event, and a bridge thread forwards
//! it as a `toggle()` onto the coordinator's event channel.

use std::fs;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use hindsight_audio::ControllerHandle;
use hindsight_core::APP_NAME;

fn pid_path() -> Result<PathBuf> {
    let dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("no runtime or cache directory available")?;
    Ok(dir.join(format!("{}.pid", APP_NAME)))
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

/// Guard holding the PID file for this instance; removed on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire() -> Result<Self> {
        let path = pid_path()?;
        if let Ok(contents) = fs::read_to_string(&path)
            && let Ok(pid) = contents.trim().parse::<i32>()
        {
            if process_alive(pid) {
                bail!("another instance is already running (pid {pid})");
            }
            info!(pid, "removing stale pid file");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file at {:?}", path))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove pid file: {e}");
        }
    }
}

/// Deliver a toggle to the running instance.
#[cfg(unix)]
pub fn send_toggle() -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let path = pid_path()?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("no running instance found (missing {:?})", path))?;
    let pid: i32 = contents
        .trim()
        .parse()
        .with_context(|| format!("malformed pid file at {:?}", path))?;
    if !process_alive(pid) {
        bail!("no running instance (stale pid {pid})");
    }
    kill(Pid::from_raw(pid), Signal::SIGUSR1)
        .with_context(|| format!("failed to signal pid {pid}"))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn send_toggle() -> Result<()> {
    bail!("--toggle is not supported on this platform");
}

/// Bridge OS signals onto the controller's event channel.
///
/// SIGUSR1 toggles recording; SIGTERM and ctrl-c begin shutdown. The
/// bridge runs a small dedicated runtime on its own thread so the
/// coordinator never blocks on signal delivery.
pub fn spawn_signal_listener(controller: ControllerHandle) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("hindsight-signals".to_string())
        .spawn(move || runtime.block_on(signal_loop(controller)))
        .context("failed to spawn signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn signal_loop(controller: ControllerHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGUSR1 handler: {e}");
            return;
        }
    };
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = usr1.recv() => {
                info!("toggle signal received");
                controller.toggle();
            }
            _ = term.recv() => {
                info!("termination signal received");
                controller.request_shutdown();
                break;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("ctrl-c handler failed: {e}");
                }
                controller.request_shutdown();
                break;
            }
        }
    }
}

#[cfg(not(unix))]
async fn signal_loop(controller: ControllerHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        controller.request_shutdown();
    }
}
