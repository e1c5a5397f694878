//! Transcription dispatch: a bounded worker pool with retry and
//! cooperative shutdown.
//!
//! The dispatcher owns its tokio runtime; the rest of the application is
//! plain threads. Each submitted job becomes one worker task, gated by a
//! semaphore so at most `max_concurrent` requests are in flight. The
//! retry loop checks the shutdown signal at every iteration; once
//! shutdown begins, in-flight attempts get a short grace period instead
//! of the steady-state timeout, and no new attempts start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use hindsight_core::{
    EngineObserver, Shutdown, TranscriptSink, TranscriptionConfig, TranscriptionJob,
};

use crate::{TranscribeError, Transcriber, Transcript, backoff_delay, client_for_backend, merge};

/// Worker pool submitting recordings to the transcription backend.
pub struct Dispatcher {
    runtime: Runtime,
    inner: Arc<Inner>,
}

struct Inner {
    transcriber: Box<dyn Transcriber>,
    observer: Arc<dyn EngineObserver>,
    limit: Semaphore,
    /// Process-wide flag, checked before accepting new work.
    shutdown: Shutdown,
    /// Async reflection of the flag for in-flight workers.
    shutdown_tx: watch::Sender<bool>,
    session_transcript: Mutex<String>,
    language: Option<String>,
    max_attempts: u32,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

/// Cloneable job-submission handle given to the recording controller.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<Inner>,
    runtime: tokio::runtime::Handle,
}

impl Dispatcher {
    pub fn new(
        config: &TranscriptionConfig,
        observer: Arc<dyn EngineObserver>,
        shutdown: Shutdown,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hindsight-transcribe")
            .enable_all()
            .build()?;

        let transcriber = client_for_backend(&config.backend);
        info!(backend = transcriber.name(), "transcription dispatcher ready");

        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            transcriber,
            observer,
            limit: Semaphore::new(config.max_concurrent),
            shutdown,
            shutdown_tx,
            session_transcript: Mutex::new(String::new()),
            language: config.language.clone(),
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout(),
            shutdown_grace: config.shutdown_attempt_timeout(),
        });

        Ok(Self { runtime, inner })
    }

    /// Submission handle for the controller.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            inner: self.inner.clone(),
            runtime: self.runtime.handle().clone(),
        }
    }

    /// Probe the backend. Used at startup to warn when it is down.
    pub fn health(&self) -> bool {
        self.runtime.block_on(self.inner.transcriber.health())
    }

    /// Flip workers into fail-fast mode, then wait up to `deadline` for
    /// them to drain. Workers still running at the deadline are
    /// abandoned.
    pub fn shutdown(self, deadline: Duration) {
        let started = Instant::now();
        // send_replace updates the value even when no worker is
        // currently subscribed.
        self.inner.shutdown_tx.send_replace(true);
        self.runtime.shutdown_timeout(deadline);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription dispatcher stopped"
        );
    }
}

impl TranscriptSink for DispatcherHandle {
    fn submit(&self, job: TranscriptionJob) {
        if self.inner.shutdown.is_requested() {
            warn!(ordinal = job.ordinal, "shutdown in progress; job refused");
            self.inner
                .observer
                .on_transcript_error(job.ordinal, "shutdown in progress");
            return;
        }
        info!(
            ordinal = job.ordinal,
            audio = %job.audio_path.display(),
            "transcription job queued"
        );
        let inner = self.inner.clone();
        self.runtime.spawn(run_job(inner, job));
    }
}

async fn run_job(inner: Arc<Inner>, job: TranscriptionJob) {
    // The semaphore bounds concurrent workers; extra jobs queue here.
    let Ok(_permit) = inner.limit.acquire().await else {
        return;
    };
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    if *shutdown_rx.borrow() {
        inner
            .observer
            .on_transcript_error(job.ordinal, "shutdown before dispatch");
        return;
    }

    let audio = match tokio::fs::read(&job.audio_path).await {
        Ok(audio) => audio,
        Err(e) => {
            error!(ordinal = job.ordinal, "failed to read recording: {e}");
            inner.observer.on_transcript_error(job.ordinal, &e.to_string());
            return;
        }
    };

    let mut last_error = TranscribeError::Api("no attempt made".to_string());
    for attempt in 0..inner.max_attempts {
        if *shutdown_rx.borrow() && attempt > 0 {
            last_error = TranscribeError::ShutdownPreempted;
            break;
        }

        match attempt_once(&inner, &audio, &mut shutdown_rx).await {
            Ok(transcript) => {
                deliver(&inner, &job, transcript).await;
                return;
            }
            Err(e) => {
                warn!(
                    ordinal = job.ordinal,
                    attempt = attempt + 1,
                    max_attempts = inner.max_attempts,
                    "transcription attempt failed: {e}"
                );
                last_error = e;
            }
        }

        if matches!(last_error, TranscribeError::ShutdownPreempted) {
            break;
        }
        if attempt + 1 < inner.max_attempts {
            if *shutdown_rx.borrow() {
                last_error = TranscribeError::ShutdownPreempted;
                break;
            }
            let delay = backoff_delay(attempt);
            debug!(ordinal = job.ordinal, delay_secs = delay.as_secs(), "backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    error!(ordinal = job.ordinal, "transcription failed: {last_error}");
    inner
        .observer
        .on_transcript_error(job.ordinal, &last_error.to_string());
}

/// One attempt against the backend. In steady state the request gets the
/// full configured timeout; once shutdown fires the attempt is given the
/// short grace period and then abandoned.
async fn attempt_once(
    inner: &Inner,
    audio: &[u8],
    shutdown_rx: &mut watch::Receiver<bool>,
) -> crate::Result<Transcript> {
    let request = tokio::time::timeout(
        inner.request_timeout,
        inner.transcriber.transcribe(audio, inner.language.as_deref()),
    );
    tokio::select! {
        result = request => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(TranscribeError::Timeout),
        },
        _ = shutdown_grace(shutdown_rx, inner.shutdown_grace) => {
            Err(TranscribeError::ShutdownPreempted)
        }
    }
}

/// Resolves `grace` after shutdown has been signalled (or the dispatcher
/// dropped its sender).
async fn shutdown_grace(rx: &mut watch::Receiver<bool>, grace: Duration) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
    tokio::time::sleep(grace).await;
}

async fn deliver(inner: &Inner, job: &TranscriptionJob, transcript: Transcript) {
    if let Err(e) = tokio::fs::write(&job.transcript_path, transcript.text.as_bytes()).await {
        warn!(
            ordinal = job.ordinal,
            path = %job.transcript_path.display(),
            "failed to write transcript file: {e}"
        );
    }

    // Merge into the running session transcript; the seam between
    // consecutive recordings repeats whatever the pre-roll replayed.
    let deduped = {
        let mut merged = inner.session_transcript.lock();
        let deduped = merge::deduplicate(&merged, &transcript.text).to_string();
        if !deduped.is_empty() {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str(&deduped);
        }
        deduped
    };

    info!(
        ordinal = job.ordinal,
        chars = transcript.text.len(),
        language = %transcript.language,
        "transcript ready"
    );
    inner
        .observer
        .on_transcript(job.ordinal, &deduped, &transcript.language);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyTranscriber {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, _audio: &[u8], _language: Option<&str>) -> crate::Result<Transcript> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TranscribeError::Api("500 internal error".to_string()))
            } else {
                Ok(Transcript {
                    text: "hello from the backend".to_string(),
                    language: "en".to_string(),
                })
            }
        }

        async fn health(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        transcripts: Mutex<Vec<(u32, String, String)>>,
        errors: Mutex<Vec<(u32, String)>>,
    }

    impl EngineObserver for RecordingObserver {
        fn on_transcript(&self, ordinal: u32, text: &str, language: &str) {
            self.transcripts
                .lock()
                .push((ordinal, text.to_string(), language.to_string()));
        }

        fn on_transcript_error(&self, ordinal: u32, error: &str) {
            self.errors.lock().push((ordinal, error.to_string()));
        }
    }

    fn test_inner(
        transcriber: Box<dyn Transcriber>,
        observer: Arc<RecordingObserver>,
        max_attempts: u32,
    ) -> Arc<Inner> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Inner {
            transcriber,
            observer,
            limit: Semaphore::new(2),
            shutdown: Shutdown::new(),
            shutdown_tx,
            session_transcript: Mutex::new(String::new()),
            language: None,
            max_attempts,
            request_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(3),
        })
    }

    fn test_job(dir: &tempfile::TempDir, ordinal: u32) -> TranscriptionJob {
        let audio_path = dir.path().join(format!("{ordinal:03}.wav"));
        std::fs::write(&audio_path, b"fake-wav-bytes").unwrap();
        TranscriptionJob {
            ordinal,
            audio_path,
            transcript_path: dir.path().join(format!("{ordinal:03}.md")),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let transcriber = Box::new(FlakyTranscriber {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let inner = test_inner(transcriber, observer.clone(), 3);

        let started = tokio::time::Instant::now();
        run_job(inner, test_job(&dir, 1)).await;

        // Two failures cost 1 s + 2 s of backoff before the third try.
        assert!(started.elapsed() >= Duration::from_secs(3));
        let transcripts = observer.transcripts.lock();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].1, "hello from the backend");
        assert_eq!(transcripts[0].2, "en");
        assert!(dir.path().join("001.md").exists());
        assert!(observer.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let transcriber = Box::new(FlakyTranscriber {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let inner = test_inner(transcriber, observer.clone(), 3);

        run_job(inner, test_job(&dir, 2)).await;

        assert!(observer.transcripts.lock().is_empty());
        let errors = observer.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 2);
        assert!(!dir.path().join("002.md").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_dispatch_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let transcriber = Box::new(FlakyTranscriber {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let inner = test_inner(transcriber, observer.clone(), 3);
        inner.shutdown_tx.send_replace(true);

        run_job(inner, test_job(&dir, 3)).await;

        assert!(observer.transcripts.lock().is_empty());
        assert_eq!(observer.errors.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_transcript_is_deduplicated_across_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let inner = test_inner(
            Box::new(FlakyTranscriber {
                failures: 0,
                calls: AtomicU32::new(0),
            }),
            observer.clone(),
            1,
        );

        // Second job's transcript repeats the tail of the first.
        deliver(
            &inner,
            &test_job(&dir, 1),
            Transcript {
                text: "the meeting starts at noon".to_string(),
                language: "en".to_string(),
            },
        )
        .await;
        deliver(
            &inner,
            &test_job(&dir, 2),
            Transcript {
                text: "at noon we discuss budgets".to_string(),
                language: "en".to_string(),
            },
        )
        .await;

        let transcripts = observer.transcripts.lock();
        assert_eq!(transcripts[0].1, "the meeting starts at noon");
        assert_eq!(transcripts[1].1, " we discuss budgets");
        assert_eq!(
            *inner.session_transcript.lock(),
            "the meeting starts at noon\n we discuss budgets"
        );
    }
}
