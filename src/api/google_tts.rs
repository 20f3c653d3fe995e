use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::debug;

use super::tts::{Language, SpeechSynthesizer, TtsProvider, write_audio};
use super::{ProviderError, check_status, require_key};

const PROVIDER: &str = "Google TTS";
const ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";
const SPEAKING_RATE: f64 = 1.5;

pub const KOREAN_VOICE: &str = "ko-KR-Neural2-C";
pub const ENGLISH_VOICE: &str = "en-US-Neural2-D";

pub struct GoogleSpeech {
    client: Client,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

impl GoogleSpeech {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

pub fn request_body(text: &str, voice: &str, language: Language) -> serde_json::Value {
    json!({
        "input": { "text": text },
        "voice": { "languageCode": language.locale(), "name": voice },
        "audioConfig": { "audioEncoding": "MP3", "speakingRate": SPEAKING_RATE },
    })
}

fn decode_audio(content: &str) -> Result<Vec<u8>, ProviderError> {
    if content.is_empty() {
        return Err(ProviderError::malformed(PROVIDER, "missing audioContent"));
    }
    general_purpose::STANDARD
        .decode(content)
        .map_err(|e| ProviderError::malformed(PROVIDER, format!("audioContent is not base64: {e}")))
}

#[async_trait]
impl SpeechSynthesizer for GoogleSpeech {
    fn provider(&self) -> TtsProvider {
        TtsProvider::Google
    }

    fn resolve_voice(&self, requested: Option<&str>, language: Language, _rng: &mut dyn RngCore) -> String {
        match requested.map(str::trim) {
            Some(v) if v.starts_with(language.locale()) => v.to_string(),
            _ => match language {
                Language::Korean => KOREAN_VOICE.to_string(),
                Language::English => ENGLISH_VOICE.to_string(),
            },
        }
    }

    async fn synthesize(&self, text: &str, voice: &str, language: Language, out: &Path) -> Result<()> {
        require_key(PROVIDER, &self.api_key)?;

        debug!(voice, chars = text.chars().count(), "Google synthesis");
        let resp = self
            .client
            .post(ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(text, voice, language))
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let resp = check_status(PROVIDER, resp).await?;

        let parsed: SynthesizeResponse = resp.json().await.map_err(ProviderError::transport(PROVIDER))?;
        let audio = decode_audio(&parsed.audio_content)?;
        write_audio(out, &audio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn body_shape() {
        let body = request_body("hello", ENGLISH_VOICE, Language::English);
        assert_eq!(body["voice"]["languageCode"], "en-US");
        assert_eq!(body["voice"]["name"], ENGLISH_VOICE);
        assert_eq!(body["audioConfig"]["speakingRate"], 1.5);
    }

    #[test]
    fn decodes_audio_content() {
        assert_eq!(decode_audio("SUQz").unwrap(), b"ID3");
        assert!(decode_audio("").is_err());
        assert!(decode_audio("@@@").is_err());
    }

    #[test]
    fn voice_must_match_language() {
        let google = GoogleSpeech::new(Client::new(), "k".into());
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(google.resolve_voice(Some("en-US-Neural2-A"), Language::Korean, &mut rng), KOREAN_VOICE);
        assert_eq!(
            google.resolve_voice(Some("ko-KR-Neural2-A"), Language::Korean, &mut rng),
            "ko-KR-Neural2-A"
        );
    }
}
