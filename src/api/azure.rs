use anyhow::Result;
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Client;
use std::path::Path;
use tracing::debug;

use super::tts::{Language, SpeechSynthesizer, TtsProvider, write_audio};
use super::{ProviderError, check_status, require_key};

const PROVIDER: &str = "Azure Speech";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

pub const KOREAN_VOICE: &str = "ko-KR-HyunsuNeural";
pub const ENGLISH_VOICE: &str = "en-US-AndrewMultilingualNeural";

pub struct AzureSpeech {
    client: Client,
    key: String,
    region: String,
}

impl AzureSpeech {
    pub fn new(client: Client, key: String, region: String) -> Self {
        Self { client, key, region }
    }

    fn endpoint(&self) -> String {
        format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", self.region.trim())
    }
}

pub fn default_voice(language: Language) -> &'static str {
    match language {
        Language::Korean => KOREAN_VOICE,
        Language::English => ENGLISH_VOICE,
    }
}

fn speaking_rate(language: Language) -> &'static str {
    match language {
        Language::Korean => "1.5",
        Language::English => "1.3",
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn build_ssml(text: &str, voice: &str, language: Language) -> String {
    format!(
        r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="{lang}"><voice name="{voice}"><prosody rate="{rate}">{text}</prosody></voice></speak>"#,
        lang = language.locale(),
        voice = escape_xml(voice),
        rate = speaking_rate(language),
        text = escape_xml(text),
    )
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeech {
    fn provider(&self) -> TtsProvider {
        TtsProvider::Azure
    }

    /// Only full neural voice names are honoured; emotion keywords get the language default.
    fn resolve_voice(&self, requested: Option<&str>, language: Language, _rng: &mut dyn RngCore) -> String {
        match requested.map(str::trim) {
            Some(v) if v.ends_with("Neural") => v.to_string(),
            _ => default_voice(language).to_string(),
        }
    }

    async fn synthesize(&self, text: &str, voice: &str, language: Language, out: &Path) -> Result<()> {
        require_key(PROVIDER, &self.key)?;
        require_key(PROVIDER, &self.region)?;

        debug!(voice, chars = text.chars().count(), "Azure synthesis");
        let resp = self
            .client
            .post(self.endpoint())
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "shorts-studio")
            .body(build_ssml(text, voice, language))
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let resp = check_status(PROVIDER, resp).await?;

        let bytes = resp.bytes().await.map_err(ProviderError::transport(PROVIDER))?;
        if bytes.is_empty() {
            return Err(ProviderError::malformed(PROVIDER, "empty audio body").into());
        }
        write_audio(out, &bytes).await
    }
}
