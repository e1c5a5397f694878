//! OpenAI-compatible transcription backend.
//!
//! Works against `{url}/v1/audio/transcriptions` with bearer auth, for
//! hosted Whisper APIs and the self-hosted gateways that imitate them.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{Result, TranscribeError, Transcriber, Transcript};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for an OpenAI-compatible transcription endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: String,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl Transcriber for OpenAiCompatClient {
    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<Transcript> {
        debug!(
            model = %self.model,
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
            .text("model", self.model.clone())
            .text("response_format", "json");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Api(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let parsed: TranscriptionResponse = response
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
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_built_from_base_url() {
        let client = OpenAiCompatClient::new("https://api.example.com/", "key", "whisper-1");
        assert_eq!(
            client.endpoint(),
            "https://api.example.com/v1/audio/transcriptions"
        );
    }

    #[test]
    fn response_language_is_optional() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"text": "dictated text"}"#).unwrap();
        assert_eq!(parsed.text, "dictated text");
        assert_eq!(parsed.language, "");
    }
}
