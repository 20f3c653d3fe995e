use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::api::tts::{Language, TtsProvider};

/// Runtime configuration: an optional JSON file overlaid by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root of the working layout (`inputs/`, `outputs/`, `background music/` ...).
    pub project_root: PathBuf,

    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: Option<String>,
    pub elevenlabs_model_id: String,
    pub azure_speech_key: String,
    pub azure_speech_region: String,
    pub google_api_key: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    #[serde(alias = "ai_302_api_key")]
    pub whisper_api_key: String,
    pub whisper_url: String,

    pub tts_provider: TtsProvider,
    pub language: Language,

    /// File under `template/` used when a request names none. Empty disables it.
    pub default_template: String,

    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Pause between items of a generation batch.
    pub batch_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4567,
            project_root: PathBuf::from("."),
            elevenlabs_api_key: String::new(),
            elevenlabs_voice_id: None,
            elevenlabs_model_id: default_elevenlabs_model(),
            azure_speech_key: String::new(),
            azure_speech_region: String::new(),
            google_api_key: String::new(),
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            whisper_api_key: String::new(),
            whisper_url: "https://api.302.ai/v1/audio/transcriptions".to_string(),
            tts_provider: TtsProvider::Azure,
            language: Language::Korean,
            default_template: "2.png".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            batch_delay_ms: 2000,
            request_timeout_secs: 300,
        }
    }
}

fn default_elevenlabs_model() -> String {
    "eleven_multilingual_v2".to_string()
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| lookup(*k))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env_string(lookup, &[key]).and_then(|v| v.parse().ok())
}

impl AppConfig {
    /// Read `path` when it exists, then apply the process environment.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            if fs::metadata(path).await.is_ok() {
                let content = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                config = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid config JSON: {}", path.display()))?;
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env_string(&lookup, &["HOST", "API_HOST"]) {
            self.host = v;
        }
        if let Some(v) = env_parse(&lookup, "PORT") {
            self.port = v;
        }
        if let Some(v) = env_string(&lookup, &["PROJECT_ROOT"]) {
            self.project_root = PathBuf::from(v);
        }
        if let Some(v) = env_string(&lookup, &["ELEVENLABS_API_KEY"]) {
            self.elevenlabs_api_key = v;
        }
        if let Some(v) = env_string(&lookup, &["ELEVENLABS_VOICE_ID"]) {
            self.elevenlabs_voice_id = Some(v);
        }
        if let Some(v) = env_string(&lookup, &["AZURE_SPEECH_KEY"]) {
            self.azure_speech_key = v;
        }
        if let Some(v) = env_string(&lookup, &["AZURE_SPEECH_REGION"]) {
            self.azure_speech_region = v;
        }
        if let Some(v) = env_string(&lookup, &["GOOGLE_API_KEY"]) {
            self.google_api_key = v;
        }
        if let Some(v) = env_string(&lookup, &["GEMINI_API_KEY", "GOOGLE_API_KEY"]) {
            self.gemini_api_key = v;
        }
        if let Some(v) = env_string(&lookup, &["AI_302_API_KEY", "API_KEY_302AI"]) {
            self.whisper_api_key = v;
        }
        if let Some(v) = env_string(&lookup, &["DEFAULT_TEMPLATE"]) {
            self.default_template = v;
        }
        if let Some(v) = env_string(&lookup, &["FFMPEG_PATH"]) {
            self.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = env_string(&lookup, &["FFPROBE_PATH"]) {
            self.ffprobe_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&lookup, "BATCH_DELAY_MS") {
            self.batch_delay_ms = v;
        }
        if let Some(v) = env_string(&lookup, &["TTS_PROVIDER"]).and_then(|v| TtsProvider::from_name(&v)) {
            self.tts_provider = v;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.project_root.join("inputs")
    }

    pub fn street_dir(&self) -> PathBuf {
        self.inputs_dir().join(crate::pool::STREET_DIR)
    }

    pub fn music_dir(&self) -> PathBuf {
        self.project_root.join("background music")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.project_root.join("outputs")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.project_root.join("template")
    }

    pub fn common_dir(&self) -> PathBuf {
        self.project_root.join("data").join("common")
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.common_dir().join("fonts")
    }

    pub fn banner_path(&self) -> PathBuf {
        self.common_dir().join("ads").join("banner.png")
    }

    pub fn music_stats_path(&self) -> PathBuf {
        self.common_dir().join("music_usage_stats.json")
    }

    /// Folder whose videos feed the main pool. `all`, `undefined` or empty means the whole `inputs/`.
    pub fn input_folder(&self, name: Option<&str>) -> PathBuf {
        match name.map(str::trim) {
            Some(n) if !n.is_empty() && n != "all" && n != "undefined" => self.inputs_dir().join(n),
            _ => self.inputs_dir(),
        }
    }
}
