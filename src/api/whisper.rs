use anyhow::{Context, Result};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use super::{ProviderError, check_status, require_key};

const PROVIDER: &str = "Whisper";
const MODEL: &str = "whisper-1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// `verbose_json` transcription result. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

pub struct Whisper {
    client: Client,
    api_key: String,
    url: String,
}

impl Whisper {
    pub fn new(client: Client, api_key: String, url: String) -> Self {
        Self { client, api_key, url }
    }

    /// Transcribe an audio file with segment-level timestamps.
    pub async fn transcribe(&self, audio: &Path, language: &str) -> Result<Transcript> {
        require_key(PROVIDER, &self.api_key)?;

        let bytes = fs::read(audio)
            .await
            .with_context(|| format!("Failed to read audio {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(ProviderError::transport(PROVIDER))?;
        let form = Form::new()
            .part("file", part)
            .text("model", MODEL)
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let resp = check_status(PROVIDER, resp).await?;

        let body = resp.text().await.map_err(ProviderError::transport(PROVIDER))?;
        let transcript = parse_transcript(&body)?;
        info!(
            segments = transcript.segments.len(),
            chars = transcript.text.chars().count(),
            "Transcription finished"
        );
        Ok(transcript)
    }
}

pub fn parse_transcript(body: &str) -> Result<Transcript, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbose_json() {
        let body = r#"{
            "task": "transcribe",
            "language": "korean",
            "duration": 4.5,
            "text": "안녕하세요. 반갑습니다.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 2.1, "text": " 안녕하세요.", "tokens": [1, 2]},
                {"id": 1, "start": 2.1, "end": 4.5, "text": " 반갑습니다."}
            ]
        }"#;
        let t = parse_transcript(body).unwrap();
        assert_eq!(t.duration, Some(4.5));
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[1].start, 2.1);
    }

    #[test]
    fn plain_text_response_has_no_segments() {
        let t = parse_transcript(r#"{"text": "hello"}"#).unwrap();
        assert!(t.segments.is_empty());
        assert_eq!(t.duration, None);
        assert!(parse_transcript("not json").is_err());
    }
}
