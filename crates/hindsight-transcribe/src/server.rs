//! whisper-server transcription backend.
//!
//! Speaks the whisper.cpp server protocol: multipart POST of the audio
//! file to `{url}/inference` with `response_format=json`, JSON response
//! carrying the transcript text and detected language.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{Result, TranscribeError, Transcriber, Transcript};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a whisper-server style endpoint.
#[derive(Debug, Clone)]
pub struct WhisperServerClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    text: String,
    #[serde(default)]
    language: String,
}

impl WhisperServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn inference_url(&self) -> String {
        format!("{}/inference", self.base_url)
    }
}

#[async_trait]
impl Transcriber for WhisperServerClient {
    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<Transcript> {
        debug!(
            url = %self.inference_url(),
            audio_bytes = audio.len(),
            language = ?language,
            "sending transcription request"
        );

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("recording.wav")
                    .mime_str("audio/wav")?,
            )
            .text("response_format", "json");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(self.inference_url())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Api(format!(
                "server returned {}: {}",
                status, body
            )));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::InvalidResponse(e.to_string()))?;

        Ok(Transcript {
            text: parsed.text,
            language: parsed.language,
        })
    }

    async fn health(&self) -> bool {
        self.client
            .get(&self.base_url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "whisper-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_text_and_language() {
        let parsed: InferenceResponse =
            serde_json::from_str(r#"{"text": " hello world", "language": "en"}"#).unwrap();
        assert_eq!(parsed.text, " hello world");
        assert_eq!(parsed.language, "en");
    }

    #[test]
    fn missing_language_defaults_to_empty() {
        let parsed: InferenceResponse = serde_json::from_str(r#"{"text": "ok"}"#).unwrap();
        assert_eq!(parsed.language, "");
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let client = WhisperServerClient::new("http://127.0.0.1:8080/");
        assert_eq!(client.inference_url(), "http://127.0.0.1:8080/inference");
    }
}
