use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::RngCore;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use tracing::debug;

use super::tts::{Language, SpeechSynthesizer, TtsProvider, write_audio};
use super::{ProviderError, check_status, require_key};

const PROVIDER: &str = "ElevenLabs";
const BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Voices used when the caller leaves the choice to us.
pub const PRESET_VOICES: &[&str] = &[
    "mYk0rAapHek2oTw18z8x",
    "4JJwo477JUAx3HV0T7n7",
    "QPFsEL6IBxlT15xfiD6C",
    "uyVNoMrnUku1dZyVEXwD",
];

/// Voice keywords that mean "any preset".
const AUTO_VOICES: &[&str] = &["random", "neutral", "surprise"];

pub struct ElevenLabs {
    client: Client,
    api_key: String,
    default_voice: Option<String>,
    model_id: String,
}

impl ElevenLabs {
    pub fn new(client: Client, api_key: String, default_voice: Option<String>, model_id: String) -> Self {
        Self {
            client,
            api_key,
            default_voice,
            model_id,
        }
    }
}

fn random_preset(rng: &mut dyn RngCore) -> String {
    PRESET_VOICES
        .choose(rng)
        .copied()
        .unwrap_or(PRESET_VOICES[0])
        .to_string()
}

/// Explicit voice ids pass through, keywords and blanks map to a preset. No request falls back to the configured default.
pub fn pick_voice(requested: Option<&str>, default_voice: Option<&str>, rng: &mut dyn RngCore) -> String {
    match requested.map(str::trim) {
        None => match default_voice {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => random_preset(rng),
        },
        Some(v) if v.is_empty() || AUTO_VOICES.iter().any(|k| k.eq_ignore_ascii_case(v)) => random_preset(rng),
        Some(v) => v.to_string(),
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabs {
    fn provider(&self) -> TtsProvider {
        TtsProvider::ElevenLabs
    }

    fn resolve_voice(&self, requested: Option<&str>, _language: Language, rng: &mut dyn RngCore) -> String {
        pick_voice(requested, self.default_voice.as_deref(), rng)
    }

    async fn synthesize(&self, text: &str, voice: &str, _language: Language, out: &Path) -> Result<()> {
        require_key(PROVIDER, &self.api_key)?;

        let url = format!("{BASE_URL}/{voice}?output_format=mp3_44100_128");
        let body = json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
            },
        });

        debug!(voice, chars = text.chars().count(), "ElevenLabs synthesis");
        let resp = self
            .client
            .post(url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let resp = check_status(PROVIDER, resp).await?;

        let bytes = resp
            .bytes()
            .await
            .map_err(ProviderError::transport(PROVIDER))
            .context("ElevenLabs response read failed")?;
        write_audio(out, &bytes).await
    }
}
