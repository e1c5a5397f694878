//! Transcription backends and dispatch for hindsight.
//!
//! This crate provides a trait-based abstraction over external HTTP
//! transcription endpoints, plus the bounded worker pool that submits
//! completed recordings with retry, backoff, and cooperative shutdown.
//! No inference happens in-process.

mod dispatcher;
pub mod merge;
mod openai;
mod server;

pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use openai::OpenAiCompatClient;
pub use server::WhisperServerClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use hindsight_core::TranscriptionBackend;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid transcription response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("shutdown preempted transcription")]
    ShutdownPreempted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// A successful transcription.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Language code reported by the backend; empty when it reports none.
    pub language: String,
}

/// Trait for transcription backends.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio file (WAV bytes).
    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<Transcript>;

    /// Cheap reachability probe against the endpoint root.
    async fn health(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Build the client for a configured backend.
pub fn client_for_backend(backend: &TranscriptionBackend) -> Box<dyn Transcriber> {
    match backend {
        TranscriptionBackend::WhisperServer { url } => {
            Box::new(WhisperServerClient::new(url.clone()))
        }
        TranscriptionBackend::OpenAiCompatible {
            url,
            api_key,
            model,
        } => Box::new(OpenAiCompatClient::new(
            url.clone(),
            api_key.clone(),
            model.clone(),
        )),
    }
}

/// Delay before retry number `attempt` (zero-based): exponential backoff
/// starting at one second.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay(100), Duration::from_secs(1 << 16));
    }
}
