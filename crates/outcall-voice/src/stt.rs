use crate::error::VoiceError;
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio input size for STT (10 MiB). Prevents oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for a transcription request.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_BASE_URL: &str = "https://api.deepgram.com/v1";

/// Client for a Deepgram-style transcription endpoint.
#[derive(Debug, Clone)]
pub struct SttService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    language: String,
}

#[derive(Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
}

#[derive(Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
}

impl SttService {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            language: language.into(),
        }
    }

    /// Points the client at a different endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Transcribes a buffer of PCM samples (s16le).
    pub async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String, VoiceError> {
        let mut audio = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            audio.extend_from_slice(&sample.to_le_bytes());
        }

        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let rate = sample_rate.to_string();
        let response = self
            .http
            .post(format!("{}/listen", self.base_url))
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", rate.as_str()),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "application/octet-stream")
            .timeout(STT_TIMEOUT)
            .body(audio)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(format!("transcription request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!(
                "transcription endpoint returned {status}: {body}"
            )));
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("malformed transcription response: {e}")))?;

        let transcript = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();

        Ok(transcript)
    }
}
