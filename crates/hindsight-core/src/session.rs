//! Session bookkeeping and on-disk layout.
//!
//! A session groups the recordings of one engine run under a temp
//! directory:
//!
//! ```text
//! <temp_root>/<session_id>/
//!     recordings/NNN.wav
//!     transcriptions/NNN.md
//!     session.json
//! ```
//!
//! `session.json` is rewritten after every change so a crash never loses
//! more than the in-flight recording's metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("session metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a session directory: {0}")]
    NotASession(PathBuf),
}

type Result<T> = std::result::Result<T, SessionError>;

const SESSION_FILE: &str = "session.json";
const RECORDINGS_DIR: &str = "recordings";
const TRANSCRIPTIONS_DIR: &str = "transcriptions";

/// Zero-padded audio filename for a recording ordinal.
pub fn recording_filename(ordinal: u32) -> String {
    format!("{:03}.wav", ordinal)
}

fn transcript_filename(ordinal: u32) -> String {
    format!("{:03}.md", ordinal)
}

/// Metadata for one finished recording.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Recording {
    /// Position in the session, starting at 1. Ordinals are never
    /// reused; a discarded recording leaves a gap in the surviving list.
    pub ordinal: u32,
    pub filename: String,
    pub started_at: DateTime<Local>,
    pub duration_secs: f64,
    pub channels: u16,
    pub sample_rate: u32,
    pub peak_db: f32,
    pub average_rms_db: f32,
    /// Set when the writer hit an I/O error and the file is partial.
    #[serde(default)]
    pub failed: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SessionMeta {
    id: String,
    created_at: DateTime<Local>,
    recordings: Vec<Recording>,
    saved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save_location: Option<PathBuf>,
}

/// One engine run's worth of recordings.
pub struct Session {
    meta: SessionMeta,
    root: PathBuf,
    next_ordinal: u32,
}

impl Session {
    /// Create a fresh session under `temp_root`.
    pub fn create(temp_root: &Path) -> Result<Self> {
        let created_at = Local::now();
        let base_id = created_at.format("%Y%m%d-%H%M%S").to_string();

        // Two engine starts within a second get distinct directories.
        let (id, root) = {
            let mut candidate = base_id.clone();
            let mut n = 1;
            loop {
                let dir = temp_root.join(&candidate);
                if !dir.exists() {
                    break (candidate, dir);
                }
                n += 1;
                candidate = format!("{}-{}", base_id, n);
            }
        };

        fs::create_dir_all(root.join(RECORDINGS_DIR))?;
        fs::create_dir_all(root.join(TRANSCRIPTIONS_DIR))?;

        let session = Self {
            meta: SessionMeta {
                id,
                created_at,
                recordings: Vec::new(),
                saved: false,
                save_location: None,
            },
            root,
            next_ordinal: 1,
        };
        session.persist()?;
        info!(id = %session.meta.id, path = %session.root.display(), "session created");
        Ok(session)
    }

    /// Load an existing session directory.
    pub fn load(root: &Path) -> Result<Self> {
        let meta_path = root.join(SESSION_FILE);
        if !meta_path.exists() {
            return Err(SessionError::NotASession(root.to_path_buf()));
        }
        let meta: SessionMeta = serde_json::from_str(&fs::read_to_string(meta_path)?)?;
        let next_ordinal = meta.recordings.iter().map(|r| r.ordinal).max().unwrap_or(0) + 1;
        Ok(Self {
            meta,
            root: root.to_path_buf(),
            next_ordinal,
        })
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.meta.recordings
    }

    pub fn is_saved(&self) -> bool {
        self.meta.saved
    }

    /// Claim the next recording ordinal. Ordinals advance monotonically
    /// even when the recording is later discarded.
    pub fn next_ordinal(&mut self) -> u32 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    pub fn recording_path(&self, ordinal: u32) -> PathBuf {
        self.root.join(RECORDINGS_DIR).join(recording_filename(ordinal))
    }

    pub fn transcript_path(&self, ordinal: u32) -> PathBuf {
        self.root
            .join(TRANSCRIPTIONS_DIR)
            .join(transcript_filename(ordinal))
    }

    /// Append a finished recording and rewrite the metadata file.
    pub fn append(&mut self, recording: Recording) -> Result<()> {
        debug_assert!(
            self.meta
                .recordings
                .last()
                .is_none_or(|last| last.ordinal < recording.ordinal),
            "recording ordinals must be appended in order"
        );
        self.meta.recordings.push(recording);
        self.persist()
    }

    /// Write `session.json`.
    pub fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.meta)?;
        fs::write(self.root.join(SESSION_FILE), serialized)?;
        Ok(())
    }

    /// Copy the session to a permanent location.
    ///
    /// The destination gets `<dest_root>/<session_id>/` with the same
    /// layout. If a session with this id was saved there before, new
    /// recordings are merged in by ordinal and existing files are left
    /// untouched.
    pub fn save_to(&mut self, dest_root: &Path) -> Result<()> {
        let dest = dest_root.join(&self.meta.id);
        fs::create_dir_all(dest.join(RECORDINGS_DIR))?;
        fs::create_dir_all(dest.join(TRANSCRIPTIONS_DIR))?;

        let mut merged = match Session::load(&dest) {
            Ok(existing) => {
                let mut recordings = existing.meta.recordings;
                for recording in &self.meta.recordings {
                    if !recordings.iter().any(|r| r.ordinal == recording.ordinal) {
                        recordings.push(recording.clone());
                    }
                }
                recordings.sort_by_key(|r| r.ordinal);
                SessionMeta {
                    recordings,
                    ..self.meta.clone()
                }
            }
            Err(_) => self.meta.clone(),
        };
        merged.saved = true;
        merged.save_location = Some(dest_root.to_path_buf());

        for recording in &merged.recordings {
            copy_if_new(
                &self.recording_path(recording.ordinal),
                &dest.join(RECORDINGS_DIR).join(&recording.filename),
            )?;
            copy_if_new(
                &self.transcript_path(recording.ordinal),
                &dest
                    .join(TRANSCRIPTIONS_DIR)
                    .join(transcript_filename(recording.ordinal)),
            )?;
        }

        fs::write(
            dest.join(SESSION_FILE),
            serde_json::to_string_pretty(&merged)?,
        )?;

        self.meta.saved = true;
        self.meta.save_location = Some(dest_root.to_path_buf());
        self.persist()?;
        info!(id = %self.meta.id, dest = %dest.display(), "session saved");
        Ok(())
    }

    /// Delete the session's temp directory. Consumes the session.
    pub fn discard(self) -> Result<()> {
        info!(id = %self.meta.id, "discarding session");
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}

fn copy_if_new(src: &Path, dest: &Path) -> Result<()> {
    if src.exists() && !dest.exists() {
        fs::copy(src, dest)?;
    }
    Ok(())
}

/// Whether a session last touched at `mtime` has aged out.
pub fn is_stale(mtime: SystemTime, now: SystemTime, max_age_days: u64) -> bool {
    let horizon = Duration::from_secs(max_age_days * 24 * 60 * 60);
    now.duration_since(mtime)
        .map(|age| age > horizon)
        .unwrap_or(false)
}

/// Remove temp sessions older than `max_age_days`.
///
/// Only direct children of `temp_root` that contain a `session.json` are
/// candidates; anything else is left alone. Returns the number of
/// sessions removed.
pub fn cleanup_stale_sessions(temp_root: &Path, max_age_days: u64) -> Result<usize> {
    if !temp_root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(temp_root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let meta_path = path.join(SESSION_FILE);
        let Ok(meta) = fs::metadata(&meta_path) else {
            debug!(path = %path.display(), "skipping non-session directory");
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if is_stale(mtime, now, max_age_days) {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "removed stale session");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale session"),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recording(ordinal: u32) -> Recording {
        Recording {
            ordinal,
            filename: recording_filename(ordinal),
            started_at: Local::now(),
            duration_secs: 4.2,
            channels: 1,
            sample_rate: 48_000,
            peak_db: -6.0,
            average_rms_db: -32.0,
            failed: false,
        }
    }

    #[test]
    fn create_persist_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = Session::create(tmp.path()).unwrap();
        let ordinal = session.next_ordinal();
        session.append(sample_recording(ordinal)).unwrap();
        let ordinal = session.next_ordinal();
        session.append(sample_recording(ordinal)).unwrap();

        let reloaded = Session::load(session.root()).unwrap();
        assert_eq!(reloaded.id(), session.id());
        assert_eq!(reloaded.recordings().len(), 2);
        assert_eq!(reloaded.recordings()[0].ordinal, 1);
        assert_eq!(reloaded.recordings()[1].ordinal, 2);
        assert!(!reloaded.is_saved());
    }

    #[test]
    fn ordinals_survive_discards() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = Session::create(tmp.path()).unwrap();

        let first = session.next_ordinal();
        session.append(sample_recording(first)).unwrap();
        // Recording 2 gets discarded below the energy floor: ordinal
        // consumed, nothing appended.
        let _discarded = session.next_ordinal();
        let third = session.next_ordinal();
        session.append(sample_recording(third)).unwrap();

        let ordinals: Vec<u32> = session.recordings().iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3]);

        let reloaded = Session::load(session.root()).unwrap();
        assert_eq!(reloaded.next_ordinal, 4);
    }

    #[test]
    fn save_merges_incrementally() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let mut session = Session::create(tmp.path()).unwrap();

        let first = session.next_ordinal();
        fs::write(session.recording_path(first), b"wav-one").unwrap();
        session.append(sample_recording(first)).unwrap();
        session.save_to(dest.path()).unwrap();

        let second = session.next_ordinal();
        fs::write(session.recording_path(second), b"wav-two").unwrap();
        session.append(sample_recording(second)).unwrap();
        session.save_to(dest.path()).unwrap();

        let saved = Session::load(&dest.path().join(session.id())).unwrap();
        assert!(saved.is_saved());
        assert_eq!(saved.recordings().len(), 2);
        assert!(dest.path().join(session.id()).join("recordings/001.wav").exists());
        assert!(dest.path().join(session.id()).join("recordings/002.wav").exists());
        assert!(session.is_saved());
    }

    #[test]
    fn discard_removes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::create(tmp.path()).unwrap();
        let root = session.root().to_path_buf();
        assert!(root.exists());
        session.discard().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn staleness_predicate() {
        let now = SystemTime::now();
        let eight_days = now - Duration::from_secs(8 * 24 * 60 * 60);
        let six_days = now - Duration::from_secs(6 * 24 * 60 * 60);

        assert!(is_stale(eight_days, now, 7));
        assert!(!is_stale(six_days, now, 7));
        // An mtime in the future is never stale.
        assert!(!is_stale(now + Duration::from_secs(60), now, 7));
    }

    #[test]
    fn cleanup_leaves_fresh_sessions_and_strays() {
        let tmp = tempfile::tempdir().unwrap();

        // Fresh session: mtime is now, must survive.
        let session = Session::create(tmp.path()).unwrap();

        // A stray directory without session.json must never be touched.
        let stray = tmp.path().join("not-a-session");
        fs::create_dir(&stray).unwrap();
        fs::write(stray.join("keep.txt"), b"data").unwrap();

        // A stray file at the top level is skipped.
        fs::write(tmp.path().join("loose-file"), b"data").unwrap();

        let removed = cleanup_stale_sessions(tmp.path(), 7).unwrap();
        assert_eq!(removed, 0);
        assert!(session.root().exists());
        assert!(stray.join("keep.txt").exists());
    }

    #[test]
    fn cleanup_of_missing_root_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("never-created");
        assert_eq!(cleanup_stale_sessions(&missing, 7).unwrap(), 0);
    }
}
