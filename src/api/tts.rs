use anyhow::Result;
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

use super::azure::AzureSpeech;
use super::elevenlabs::ElevenLabs;
use super::google_tts::GoogleSpeech;
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    ElevenLabs,
    #[default]
    Azure,
    Google,
}

impl TtsProvider {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "elevenlabs" | "eleven" => Some(Self::ElevenLabs),
            "azure" => Some(Self::Azure),
            "google" => Some(Self::Google),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElevenLabs => "elevenlabs",
            Self::Azure => "azure",
            Self::Google => "google",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "ko", alias = "korean")]
    Korean,
    #[serde(rename = "en", alias = "english")]
    English,
}

impl Language {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ko" | "ko-kr" | "korean" => Some(Self::Korean),
            "en" | "en-us" | "english" => Some(Self::English),
            _ => None,
        }
    }

    /// BCP-47 tag used by the speech services.
    pub fn locale(&self) -> &'static str {
        match self {
            Self::Korean => "ko-KR",
            Self::English => "en-US",
        }
    }
}

/// Text-to-speech backend writing one MP3 per call.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn provider(&self) -> TtsProvider;

    /// Voice used for every line of one job. Called once per job so the narration keeps a single voice.
    fn resolve_voice(&self, requested: Option<&str>, language: Language, rng: &mut dyn RngCore) -> String;

    async fn synthesize(&self, text: &str, voice: &str, language: Language, out: &Path) -> Result<()>;
}

/// Synthesizers by provider, built once from the configuration.
#[derive(Clone, Default)]
pub struct TtsRegistry {
    providers: HashMap<TtsProvider, Arc<dyn SpeechSynthesizer>>,
}

impl TtsRegistry {
    pub fn from_config(config: &AppConfig, client: Client) -> Self {
        Self::default()
            .with(Arc::new(ElevenLabs::new(
                client.clone(),
                config.elevenlabs_api_key.clone(),
                config.elevenlabs_voice_id.clone(),
                config.elevenlabs_model_id.clone(),
            )))
            .with(Arc::new(AzureSpeech::new(
                client.clone(),
                config.azure_speech_key.clone(),
                config.azure_speech_region.clone(),
            )))
            .with(Arc::new(GoogleSpeech::new(client, config.google_api_key.clone())))
    }

    pub fn with(mut self, synth: Arc<dyn SpeechSynthesizer>) -> Self {
        self.providers.insert(synth.provider(), synth);
        self
    }

    pub fn get(&self, provider: TtsProvider) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.providers.get(&provider).cloned()
    }
}

pub(crate) async fn write_audio(out: &Path, bytes: &[u8]) -> Result<()> {
    use anyhow::Context;

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(out, bytes)
        .await
        .with_context(|| format!("Failed to write audio {}", out.display()))?;
    Ok(())
}
