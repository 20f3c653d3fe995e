//! Clients for the hosted speech, transcription and script services.

pub mod azure;
pub mod elevenlabs;
pub mod gemini;
pub mod google_tts;
pub mod tts;
pub mod whisper;

use std::time::Duration;
use thiserror::Error;

/// Longest upstream body kept in an error.
const BODY_SNIPPET: usize = 800;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} API key is not configured")]
    MissingKey { provider: &'static str },

    #[error("{provider} returned HTTP {status}: {body}")]
    Upstream {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} response was malformed: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { provider, source }
    }

    pub fn malformed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            message: message.into(),
        }
    }
}

pub(crate) fn require_key(provider: &'static str, key: &str) -> Result<(), ProviderError> {
    if key.trim().is_empty() {
        return Err(ProviderError::MissingKey { provider });
    }
    Ok(())
}

/// Pass through a successful response, otherwise turn it into [`ProviderError::Upstream`].
pub(crate) async fn check_status(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let raw = resp.text().await.unwrap_or_default();
    Err(ProviderError::Upstream {
        provider,
        status: status.as_u16(),
        body: raw.chars().take(BODY_SNIPPET).collect(),
    })
}

pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
}
