//! The generation pipeline: narration audio, subtitles, clip allocation,
//! background music and the final render, plus the batch variants.

use anyhow::{Context, anyhow};
use chrono::Local;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::api::gemini::{BASE_TEMPERATURE, Gemini, ScriptDraft, ScriptRequest};
use crate::api::tts::{Language, TtsProvider, TtsRegistry};
use crate::api::whisper::Whisper;
use crate::api::build_http_client;
use crate::clip_plan::{AllocError, ClipDescriptor, DurationProbe, allocate_for_segments, allocate_random};
use crate::config::AppConfig;
use crate::ffmpeg::{Ffmpeg, MediaError};
use crate::job::{self, JobDir, confined_path, slash_path};
use crate::music::{MusicLibrary, MusicRequest, StatsStore};
use crate::narration::{NarrationSegment, break_sentences, segment_script, split_lines, total_duration};
use crate::pool::{VIDEO_EXTENSIONS, VideoPool, file_names, is_dir, list_files_with_ext, list_subdirs};
use crate::render::{self, ComposeJob, Template, VideoFilter};
use crate::srt;
use crate::subtitle::{Cue, build_cues, transcript_cues};

/// Narration length assumed when the audio cannot be probed.
pub const FALLBACK_AUDIO_SECONDS: f64 = 30.0;
pub const MAX_BATCH_TOPICS: usize = 3;
pub const MAX_SCRIPTS_PER_TOPIC: usize = 10;
const TEMPERATURE_STEP: f64 = 0.1;
const TRANSCRIPT_LANGUAGE: &str = "ko";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Script text supplied as one object, the shape the script writer returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptPayload {
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Options shared by every render.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub background_music: Option<String>,
    pub music_folder: Option<String>,
    pub input_folder: Option<String>,
    pub template: Option<String>,
    pub video_index: Option<u32>,
    pub video_filter: Option<String>,
    pub selected_video_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortsRequest {
    pub script: String,
    pub title: String,
    pub description: String,
    pub json_data: Option<ScriptPayload>,
    #[serde(alias = "emotion")]
    pub voice: Option<String>,
    pub provider: Option<TtsProvider>,
    pub language: Option<Language>,
    /// Put every sentence on its own narration line before synthesis.
    pub break_sentences: Option<bool>,
    #[serde(flatten)]
    pub options: RenderOptions,
}

impl ShortsRequest {
    /// Script, title and description, preferring the nested `jsonData` object.
    pub fn draft(&self) -> ScriptPayload {
        match &self.json_data {
            Some(data) if !data.script.trim().is_empty() => data.clone(),
            _ => ScriptPayload {
                script: self.script.clone(),
                title: self.title.clone(),
                description: self.description.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoRequest {
    pub audio_path: String,
    pub title: Option<String>,
    pub project_folder: Option<String>,
    pub script: Option<String>,
    pub segment_durations: Option<Vec<f64>>,
    #[serde(flatten)]
    pub options: RenderOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanRequest {
    pub script: Option<String>,
    pub segment_durations: Option<Vec<f64>>,
    pub total_duration: f64,
    pub input_folder: Option<String>,
    pub selected_video_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub total_duration: f64,
    pub segments: Vec<NarrationSegment>,
    pub cues: Vec<Cue>,
    pub clips: Vec<ClipDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOutcome {
    pub video_path: PathBuf,
    pub video_url: String,
    pub title: Option<String>,
    pub duration: f64,
    pub folder_name: String,
    pub clips_used: usize,
    pub subtitle_path: Option<PathBuf>,
    pub music_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsOutcome {
    pub audio_path: PathBuf,
    pub segment_files: Vec<PathBuf>,
    pub segment_durations: Vec<f64>,
    pub total_duration: f64,
}

/// Narration produced without a render, ready to be passed as `audioPath`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsJob {
    pub project_folder: String,
    pub title: String,
    pub description: String,
    pub script: String,
    pub voice: String,
    pub provider: TtsProvider,
    /// Merged narration relative to the project root.
    pub audio_path: String,
    pub tts_data: TtsOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SrtRequest {
    pub audio_path: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SrtOutcome {
    pub srt_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srt_url: Option<String>,
    pub srt_content: String,
    pub transcription: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortsOutcome {
    pub project_folder: String,
    pub title: String,
    pub description: String,
    pub script: String,
    pub voice: String,
    pub provider: TtsProvider,
    pub tts_data: TtsOutcome,
    pub video_data: VideoOutcome,
    pub info_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ShortsOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptBatchRequest {
    pub topics: Vec<String>,
    pub count: Option<usize>,
    pub theme: Option<String>,
    pub tone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedScript {
    #[serde(flatten)]
    pub draft: ScriptDraft,
    pub topic: String,
    pub topic_index: usize,
    pub script_index: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicScripts {
    pub topic: String,
    pub scripts: Vec<NumberedScript>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptBatchStats {
    pub total_requested: usize,
    pub total_generated: usize,
    pub failed: usize,
    pub topics: usize,
    pub count_per_topic: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptBatchReport {
    pub data: Vec<TopicScripts>,
    pub stats: ScriptBatchStats,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Reject a request-supplied name that would resolve outside the folder it is joined to.
fn check_confined(field: &str, value: Option<&str>) -> JobResult<()> {
    match non_blank(value) {
        Some(v) if confined_path(v).is_none() => Err(JobError::Invalid(format!("{field} must be a relative path without '..'"))),
        _ => Ok(()),
    }
}

pub fn validate_options(options: &RenderOptions) -> JobResult<()> {
    check_confined("backgroundMusic", options.background_music.as_deref())?;
    check_confined("musicFolder", options.music_folder.as_deref())?;
    check_confined("inputFolder", options.input_folder.as_deref())?;
    check_confined("template", options.template.as_deref())
}

/// Validated topics and per-topic count for a script batch.
pub fn validate_script_batch(request: &ScriptBatchRequest) -> JobResult<(Vec<String>, usize)> {
    let topics: Vec<String> = request
        .topics
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if topics.is_empty() {
        return Err(JobError::Invalid("at least one topic is required".into()));
    }
    if topics.len() > MAX_BATCH_TOPICS {
        return Err(JobError::Invalid(format!("at most {MAX_BATCH_TOPICS} topics are allowed")));
    }
    let count = request.count.unwrap_or(1);
    if !(1..=MAX_SCRIPTS_PER_TOPIC).contains(&count) {
        return Err(JobError::Invalid(format!("count must be between 1 and {MAX_SCRIPTS_PER_TOPIC}")));
    }
    Ok((topics, count))
}

/// Dry run of segmenting, cue timing and clip allocation against an existing pool.
pub async fn plan_with<P, R>(request: &PlanRequest, pool: &VideoPool, probe: &P, rng: &mut R) -> JobResult<Plan>
where
    P: DurationProbe + ?Sized,
    R: rand::Rng + Send,
{
    let script = non_blank(request.script.as_deref());
    let segments = segment_script(script, request.segment_durations.as_deref(), request.total_duration);
    let total = total_duration(&segments);
    let cues = if script.is_some() { build_cues(&segments) } else { Vec::new() };
    let clips = if script.is_some() {
        allocate_for_segments(&segments, pool, probe, rng).await?
    } else {
        allocate_random(total, pool, probe, rng).await?
    };
    Ok(Plan {
        total_duration: total,
        segments,
        cues,
        clips,
    })
}

struct Narration {
    draft: ScriptPayload,
    script: String,
    job: JobDir,
    voice: String,
    provider: TtsProvider,
    tts: TtsOutcome,
}

struct RenderInput<'a> {
    audio: &'a Path,
    title: Option<&'a str>,
    script: Option<&'a str>,
    durations: Option<&'a [f64]>,
    options: &'a RenderOptions,
}

/// Shared services for every generation request.
pub struct Generator {
    config: Arc<AppConfig>,
    tts: TtsRegistry,
    whisper: Whisper,
    gemini: Gemini,
    music: MusicLibrary,
    ffmpeg: Ffmpeg,
}

impl Generator {
    pub async fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let client = build_http_client(Duration::from_secs(config.request_timeout_secs))
            .context("Failed to build HTTP client")?;
        let store = StatsStore::spawn(config.music_stats_path()).await;
        let music = MusicLibrary::new(config.music_dir(), config.project_root.clone(), store);
        Ok(Self::from_parts(config, client, music))
    }

    pub fn from_parts(config: Arc<AppConfig>, client: Client, music: MusicLibrary) -> Self {
        Self {
            tts: TtsRegistry::from_config(&config, client.clone()),
            whisper: Whisper::new(client.clone(), config.whisper_api_key.clone(), config.whisper_url.clone()),
            gemini: Gemini::new(client, config.gemini_api_key.clone(), config.gemini_model.clone()),
            ffmpeg: Ffmpeg::new(&config.ffmpeg_path, &config.ffprobe_path),
            music,
            config,
        }
    }

    pub fn with_tts(mut self, tts: TtsRegistry) -> Self {
        self.tts = tts;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ffmpeg(&self) -> &Ffmpeg {
        &self.ffmpeg
    }

    pub async fn music_folders(&self) -> anyhow::Result<Vec<String>> {
        self.music.folders().await
    }

    pub async fn input_folders(&self) -> anyhow::Result<Vec<String>> {
        list_subdirs(&self.config.inputs_dir()).await
    }

    /// Video file names in `inputs/<folder>`, the names `selectedVideoFiles` accepts.
    pub async fn input_files(&self, folder: &str) -> JobResult<Vec<String>> {
        check_confined("folder", Some(folder))?;
        let dir = self.config.inputs_dir().join(folder.trim());
        if !is_dir(&dir).await {
            return Err(JobError::NotFound(format!("folder not found: {folder}")));
        }
        Ok(file_names(&list_files_with_ext(&dir, VIDEO_EXTENSIONS).await?))
    }

    pub async fn music_files(&self, folder: &str) -> JobResult<Vec<String>> {
        check_confined("folder", Some(folder))?;
        self.music
            .track_names(folder.trim())
            .await?
            .ok_or_else(|| JobError::NotFound(format!("folder not found: {folder}")))
    }

    /// A request-supplied file path under the project root. Absolute paths are
    /// accepted only when they already point inside it.
    fn project_file(&self, field: &str, value: &str) -> JobResult<PathBuf> {
        let path = Path::new(value);
        let root = &self.config.project_root;
        let escapes = path.components().any(|c| c == Component::ParentDir);
        if path.is_absolute() && !escapes && path.starts_with(root) {
            return Ok(path.to_path_buf());
        }
        confined_path(value)
            .map(|p| root.join(p))
            .ok_or_else(|| JobError::Invalid(format!("{field} must stay inside the project folder")))
    }

    fn relative_to_root(&self, path: &Path) -> String {
        let rel = pathdiff::diff_paths(path, &self.config.project_root).unwrap_or_else(|| path.to_path_buf());
        slash_path(&rel)
    }

    pub async fn generate_script(&self, request: &ScriptRequest) -> JobResult<ScriptDraft> {
        if request.topic.trim().is_empty() {
            return Err(JobError::Invalid("topic is required".into()));
        }
        Ok(self.gemini.generate(request, BASE_TEMPERATURE, false).await?)
    }

    /// Every draft of every topic is requested at once; failures are counted, not fatal.
    pub async fn generate_scripts_batch(&self, request: &ScriptBatchRequest) -> JobResult<ScriptBatchReport> {
        let (topics, count) = validate_script_batch(request)?;
        if !self.gemini.is_configured() {
            return Err(JobError::Other(anyhow!("Gemini API key is not configured")));
        }

        let mut set = JoinSet::new();
        for (topic_index, topic) in topics.iter().enumerate() {
            for script_index in 0..count {
                let gemini = self.gemini.clone();
                let req = ScriptRequest {
                    topic: topic.clone(),
                    theme: request.theme.clone(),
                    tone: request.tone.clone(),
                };
                let temperature = BASE_TEMPERATURE + TEMPERATURE_STEP * script_index as f64;
                set.spawn(async move {
                    let result = gemini.generate(&req, temperature, true).await;
                    (topic_index, script_index, result)
                });
            }
        }

        let mut data: Vec<TopicScripts> = topics
            .iter()
            .map(|t| TopicScripts {
                topic: t.clone(),
                scripts: Vec::new(),
            })
            .collect();
        let mut failed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((topic_index, script_index, Ok(draft))) => {
                    data[topic_index].scripts.push(NumberedScript {
                        draft,
                        topic: topics[topic_index].clone(),
                        topic_index,
                        script_index,
                    });
                }
                Ok((topic_index, script_index, Err(e))) => {
                    warn!(topic = %topics[topic_index], script_index, error = %e, "Script draft failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Script task aborted");
                    failed += 1;
                }
            }
        }
        for group in &mut data {
            group.scripts.sort_by_key(|s| s.script_index);
        }

        let total_generated = data.iter().map(|g| g.scripts.len()).sum();
        info!(requested = topics.len() * count, generated = total_generated, failed, "Script batch finished");
        Ok(ScriptBatchReport {
            stats: ScriptBatchStats {
                total_requested: topics.len() * count,
                total_generated,
                failed,
                topics: topics.len(),
                count_per_topic: count,
            },
            data,
        })
    }

    pub async fn plan(&self, request: &PlanRequest) -> JobResult<Plan> {
        check_confined("inputFolder", request.input_folder.as_deref())?;
        let pool = self.load_pool(&request.input_folder, &request.selected_video_files).await?;
        let mut rng = StdRng::from_entropy();
        plan_with(request, &pool, &self.ffmpeg, &mut rng).await
    }

    /// Per-line speech merged into one narration file inside a fresh job folder.
    async fn narrate(&self, request: &ShortsRequest) -> JobResult<Narration> {
        let draft = request.draft();
        if draft.script.trim().is_empty() {
            return Err(JobError::Invalid("script is required".into()));
        }
        validate_options(&request.options)?;
        let script = if request.break_sentences.unwrap_or(true) {
            break_sentences(&draft.script)
        } else {
            draft.script.clone()
        };
        let lines = split_lines(&script);

        let provider = request.provider.unwrap_or(self.config.tts_provider);
        let language = request.language.unwrap_or(self.config.language);
        let synth = self
            .tts
            .get(provider)
            .ok_or_else(|| JobError::Invalid(format!("TTS provider {} is not available", provider.as_str())))?;
        let voice = synth.resolve_voice(request.voice.as_deref(), language, &mut rand::thread_rng());

        let now = Local::now();
        let folder = job::project_folder_name(&now, request.options.video_index);
        let job = JobDir::create(&self.config.outputs_dir(), &folder).await?;
        info!(folder = %folder, lines = lines.len(), provider = provider.as_str(), voice = %voice, "Generating narration");

        let mut segment_files = Vec::with_capacity(lines.len());
        let mut segment_durations = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let out = job.temp_file(format!("line_{:03}.mp3", i + 1));
            synth
                .synthesize(line, &voice, language, &out)
                .await
                .with_context(|| format!("Speech synthesis failed for line {}", i + 1))?;
            let duration = self.ffmpeg.probe_duration(&out).await?;
            segment_files.push(out);
            segment_durations.push(duration);
        }

        let merged = job.temp_file(format!("merged_audio_{}.mp3", now.timestamp_millis()));
        self.ffmpeg.run(&render::concat_audio(&segment_files, &merged)?).await?;
        let total: f64 = segment_durations.iter().sum();
        info!(segments = segment_files.len(), total, "Narration merged");

        Ok(Narration {
            draft,
            script,
            job,
            voice,
            provider,
            tts: TtsOutcome {
                audio_path: merged,
                segment_files,
                segment_durations,
                total_duration: total,
            },
        })
    }

    /// Narration only; the result's `audioPath` feeds [`Generator::generate_video`].
    pub async fn generate_tts(&self, request: &ShortsRequest) -> JobResult<TtsJob> {
        let narration = self.narrate(request).await?;
        narration
            .job
            .write_info(&narration.draft.title, &narration.draft.description)
            .await?;
        Ok(TtsJob {
            project_folder: narration.job.name().to_string(),
            audio_path: self.relative_to_root(&narration.tts.audio_path),
            title: narration.draft.title,
            description: narration.draft.description,
            script: narration.script,
            voice: narration.voice,
            provider: narration.provider,
            tts_data: narration.tts,
        })
    }

    /// Script to finished short: per-line speech, merged narration, render, tidy.
    pub async fn generate_short(&self, request: &ShortsRequest) -> JobResult<ShortsOutcome> {
        let Narration {
            draft,
            script,
            job,
            voice,
            provider,
            tts,
        } = self.narrate(request).await?;

        let title = non_blank(Some(draft.title.as_str()));
        let video = self
            .render(
                &job,
                RenderInput {
                    audio: &tts.audio_path,
                    title,
                    script: Some(&script),
                    durations: Some(&tts.segment_durations),
                    options: &request.options,
                },
            )
            .await?;

        job.tidy().await?;
        let info_file = job.write_info(&draft.title, &draft.description).await?;

        Ok(ShortsOutcome {
            project_folder: job.name().to_string(),
            title: draft.title,
            description: draft.description,
            script,
            voice,
            provider,
            tts_data: tts,
            video_data: video,
            info_file,
        })
    }

    /// Transcribe a narration file and write `<stem>.srt` beside it.
    pub async fn generate_srt(&self, request: &SrtRequest) -> JobResult<SrtOutcome> {
        let audio_path = request.audio_path.trim();
        if audio_path.is_empty() || request.title.trim().is_empty() {
            return Err(JobError::Invalid("audioPath and title are required".into()));
        }
        let audio = self.project_file("audioPath", audio_path)?;
        if fs::metadata(&audio).await.is_err() {
            return Err(JobError::NotFound(format!("audio file not found: {audio_path}")));
        }

        let transcript = self.whisper.transcribe(&audio, TRANSCRIPT_LANGUAGE).await?;
        let cues = transcript_cues(&transcript);
        let srt_path = audio.with_extension("srt");
        srt::write_srt(&srt_path, &cues).await?;
        info!(srt = %srt_path.display(), cues = cues.len(), "Subtitles written");

        let srt_url = pathdiff::diff_paths(&srt_path, self.config.outputs_dir())
            .filter(|rel| !rel.components().any(|c| c == Component::ParentDir))
            .map(|rel| format!("/outputs/{}", slash_path(&rel)));
        Ok(SrtOutcome {
            srt_url,
            srt_content: srt::render(&cues),
            transcription: transcript.text,
            srt_path,
        })
    }

    /// Render against an existing narration file.
    pub async fn generate_video(&self, request: &VideoRequest) -> JobResult<VideoOutcome> {
        let audio_path = request.audio_path.trim();
        if audio_path.is_empty() {
            return Err(JobError::Invalid("audioPath is required".into()));
        }
        validate_options(&request.options)?;
        check_confined("projectFolder", request.project_folder.as_deref())?;
        let audio = self.project_file("audioPath", audio_path)?;
        if fs::metadata(&audio).await.is_err() {
            return Err(JobError::NotFound(format!("audio file not found: {audio_path}")));
        }

        let folder = match non_blank(request.project_folder.as_deref()) {
            Some(name) => name.to_string(),
            None => job::auto_folder_name(&Local::now()),
        };
        let job = JobDir::create(&self.config.outputs_dir(), &folder).await?;

        self.render(
            &job,
            RenderInput {
                audio: &audio,
                title: non_blank(request.title.as_deref()),
                script: non_blank(request.script.as_deref()),
                durations: request.segment_durations.as_deref(),
                options: &request.options,
            },
        )
        .await
    }

    /// Shorts one after another with a pause in between. A failed item is recorded and the batch goes on.
    pub async fn generate_batch(&self, items: &[ShortsRequest]) -> BatchReport {
        let delay = Duration::from_millis(self.config.batch_delay_ms);
        let mut results = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut item = item.clone();
            if item.options.video_index.is_none() {
                item.options.video_index = Some(index as u32 + 1);
            }
            info!(item = index + 1, total = items.len(), "Batch item started");
            match self.generate_short(&item).await {
                Ok(outcome) => results.push(BatchItem {
                    index,
                    success: true,
                    result: Some(outcome),
                    error: None,
                }),
                Err(e) => {
                    warn!(item = index + 1, error = %e, "Batch item failed");
                    results.push(BatchItem {
                        index,
                        success: false,
                        result: None,
                        error: Some(format!("{e:#}")),
                    });
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(total = items.len(), succeeded, "Batch finished");
        BatchReport {
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            results,
        }
    }

    async fn load_pool(&self, input_folder: &Option<String>, allow: &[String]) -> anyhow::Result<VideoPool> {
        let dir = self.config.input_folder(input_folder.as_deref());
        let mut pool = VideoPool::load(&dir, Some(&self.config.street_dir())).await?;
        pool.retain_main(allow);
        Ok(pool)
    }

    async fn subtitle_cues(&self, input: &RenderInput<'_>, segments: &[NarrationSegment]) -> Vec<Cue> {
        let has_durations = input.durations.is_some_and(|d| !d.is_empty());
        if input.script.is_some() && has_durations {
            return build_cues(segments);
        }
        match self.whisper.transcribe(input.audio, TRANSCRIPT_LANGUAGE).await {
            Ok(transcript) => transcript_cues(&transcript),
            Err(e) => {
                warn!(error = %e, "Transcription unavailable");
                if input.script.is_some() { build_cues(segments) } else { Vec::new() }
            }
        }
    }

    async fn existing(path: PathBuf) -> Option<PathBuf> {
        fs::metadata(&path).await.ok().map(|_| path)
    }

    async fn render(&self, job: &JobDir, input: RenderInput<'_>) -> JobResult<VideoOutcome> {
        let stamp = Local::now().timestamp_millis();
        let duration = match self.ffmpeg.probe_duration(input.audio).await {
            Ok(d) => d,
            Err(e) => {
                warn!(audio = %input.audio.display(), error = %e, "Audio probe failed, assuming {FALLBACK_AUDIO_SECONDS}s");
                FALLBACK_AUDIO_SECONDS
            }
        };

        let segments = segment_script(input.script, input.durations, duration);
        let cues = self.subtitle_cues(&input, &segments).await;
        let subtitle_path = if cues.iter().any(|c| !c.text.trim().is_empty()) {
            let path = job.temp_file(format!("subtitle_{stamp}.srt"));
            srt::write_srt(&path, &cues).await?;
            Some(path)
        } else {
            None
        };

        let options = input.options;
        let pool = self.load_pool(&options.input_folder, &options.selected_video_files).await?;
        let mut rng = StdRng::from_entropy();
        let clips = if input.script.is_some() {
            allocate_for_segments(&segments, &pool, &self.ffmpeg, &mut rng).await?
        } else {
            allocate_random(duration, &pool, &self.ffmpeg, &mut rng).await?
        };

        let request = MusicRequest::from_fields(options.background_music.as_deref(), options.music_folder.as_deref());
        let music_path = match self.music.resolve(&request).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Background music lookup failed");
                None
            }
        };
        let mut audio = input.audio.to_path_buf();
        if let Some(music) = &music_path {
            let mixed = job.root().join(format!("mixed_{stamp}.mp3"));
            match self
                .ffmpeg
                .run(&render::mix_background(input.audio, music, duration, &mixed))
                .await
            {
                Ok(()) => audio = mixed,
                Err(e) => warn!(error = %e, "Background mix failed, using narration only"),
            }
        }

        let template_name =
            non_blank(options.template.as_deref()).or_else(|| non_blank(Some(self.config.default_template.as_str())));
        let template = match template_name {
            Some(name) => {
                let found = Self::existing(self.config.template_dir().join(name)).await;
                if found.is_none() {
                    warn!(template = name, "Template not found, padding the clips instead");
                }
                found.map(Template::from_path)
            }
            None => None,
        };
        let banner = Self::existing(self.config.banner_path()).await;

        let file_name = job::video_file_name(input.title, options.video_index, stamp);
        let output = job.root().join(&file_name);
        let compose = ComposeJob {
            clips: &clips,
            output: output.clone(),
            audio: Some(audio),
            subtitles: subtitle_path.clone(),
            fonts_dir: self.config.fonts_dir(),
            template,
            banner,
            filter: VideoFilter::from_name(options.video_filter.as_deref()),
        };
        let cmd = render::compose_short(&compose)?.limit_duration(duration);
        self.ffmpeg.run(&cmd).await?;
        info!(video = %output.display(), clips = clips.len(), duration, "Video rendered");

        Ok(VideoOutcome {
            video_url: job.url_for(&file_name),
            video_path: output,
            title: input.title.map(str::to_string),
            duration,
            folder_name: job.name().to_string(),
            clips_used: clips.len(),
            subtitle_path,
            music_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tts::SpeechSynthesizer;
    use async_trait::async_trait;
    use rand::RngCore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Speech backend that refuses every line and counts the attempts.
    #[derive(Default)]
    struct RefusingVoice {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for RefusingVoice {
        fn provider(&self) -> TtsProvider {
            TtsProvider::Google
        }

        fn resolve_voice(&self, requested: Option<&str>, _language: Language, _rng: &mut dyn RngCore) -> String {
            requested.unwrap_or("stub-voice").to_string()
        }

        async fn synthesize(&self, _text: &str, _voice: &str, _language: Language, _out: &Path) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("quota exceeded")
        }
    }

    async fn generator_in(root: &Path) -> Generator {
        let config = AppConfig {
            project_root: root.to_path_buf(),
            ..AppConfig::default()
        };
        Generator::new(Arc::new(config)).await.unwrap()
    }

    fn pool_and_probe() -> (VideoPool, HashMap<PathBuf, f64>) {
        let main: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("/in/{i}.mp4"))).collect();
        let probe = main.iter().map(|p| (p.clone(), 12.0)).collect();
        (VideoPool::new(main, Vec::new()), probe)
    }

    #[tokio::test]
    async fn plan_covers_every_segment() {
        let (pool, probe) = pool_and_probe();
        let mut rng = StdRng::seed_from_u64(9);
        let request = PlanRequest {
            script: Some("Hello world.\nSee you soon.".into()),
            total_duration: 4.0,
            ..PlanRequest::default()
        };
        let plan = plan_with(&request, &pool, &probe, &mut rng).await.unwrap();
        assert_eq!(plan.segments.len(), 2);
        assert_eq!(plan.cues.len(), 2);
        assert_eq!(plan.cues[1].start, 2.0);
        for seg in 0..2 {
            let covered: f64 = plan.clips.iter().filter(|c| c.segment_index == seg).map(|c| c.duration).sum();
            assert!((covered - 2.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn plan_without_script_uses_random_clips() {
        let (pool, probe) = pool_and_probe();
        let mut rng = StdRng::seed_from_u64(9);
        let request = PlanRequest {
            script: Some("   ".into()),
            total_duration: 7.0,
            ..PlanRequest::default()
        };
        let plan = plan_with(&request, &pool, &probe, &mut rng).await.unwrap();
        assert!(plan.cues.is_empty());
        assert_eq!(plan.clips.len(), 4);
    }

    #[tokio::test]
    async fn plan_reports_empty_pool() {
        let probe: HashMap<PathBuf, f64> = HashMap::new();
        let mut rng = StdRng::seed_from_u64(1);
        let err = plan_with(&PlanRequest::default(), &VideoPool::default(), &probe, &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Alloc(AllocError::NoVideos)));
    }

    #[tokio::test]
    async fn narration_stops_at_the_first_failed_line() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(RefusingVoice::default());
        let generator = generator_in(dir.path())
            .await
            .with_tts(TtsRegistry::default().with(voice.clone()));

        let request = ShortsRequest {
            script: "하나.\n둘.".into(),
            provider: Some(TtsProvider::Google),
            ..ShortsRequest::default()
        };
        match generator.generate_tts(&request).await {
            Err(JobError::Other(e)) => {
                let message = format!("{e:#}");
                assert!(message.contains("line 1"), "{message}");
                assert!(message.contains("quota exceeded"), "{message}");
            }
            other => panic!("unexpected result: {:?}", other.map(|j| j.project_folder)),
        }
        assert_eq!(voice.calls.load(Ordering::SeqCst), 1);

        let azure = ShortsRequest {
            provider: Some(TtsProvider::Azure),
            ..request
        };
        assert!(matches!(generator.generate_tts(&azure).await, Err(JobError::Invalid(_))));
    }

    #[tokio::test]
    async fn request_paths_cannot_leave_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator_in(dir.path()).await;

        let escaping = VideoRequest {
            audio_path: "../secret.mp3".into(),
            ..VideoRequest::default()
        };
        assert!(matches!(generator.generate_video(&escaping).await, Err(JobError::Invalid(_))));

        let absolute = VideoRequest {
            audio_path: "/etc/passwd".into(),
            ..VideoRequest::default()
        };
        assert!(matches!(generator.generate_video(&absolute).await, Err(JobError::Invalid(_))));

        std::fs::write(dir.path().join("n.mp3"), b"x").unwrap();
        let folder = VideoRequest {
            audio_path: "n.mp3".into(),
            project_folder: Some("../../elsewhere".into()),
            ..VideoRequest::default()
        };
        assert!(matches!(generator.generate_video(&folder).await, Err(JobError::Invalid(_))));
        assert!(!dir.path().join("../elsewhere").exists());

        let music = ShortsRequest {
            script: "a".into(),
            options: RenderOptions {
                music_folder: Some("../private".into()),
                ..RenderOptions::default()
            },
            ..ShortsRequest::default()
        };
        assert!(matches!(generator.generate_short(&music).await, Err(JobError::Invalid(_))));

        let template = RenderOptions {
            template: Some("/etc/hosts".into()),
            ..RenderOptions::default()
        };
        assert!(validate_options(&template).is_err());
        assert!(validate_options(&RenderOptions::default()).is_ok());
    }

    #[tokio::test]
    async fn lists_files_of_a_folder() {
        let dir = tempfile::tempdir().unwrap();
        let japan = dir.path().join("inputs/japan");
        std::fs::create_dir_all(&japan).unwrap();
        for name in ["b.mp4", "a.mov", "notes.txt"] {
            std::fs::write(japan.join(name), b"x").unwrap();
        }
        let generator = generator_in(dir.path()).await;

        assert_eq!(generator.input_files("japan").await.unwrap(), vec!["a.mov", "b.mp4"]);
        assert!(matches!(generator.input_files("korea").await, Err(JobError::NotFound(_))));
        assert!(matches!(generator.input_files("../inputs").await, Err(JobError::Invalid(_))));
        assert!(matches!(generator.music_files("calm").await, Err(JobError::NotFound(_))));
    }

    #[test]
    fn script_batch_limits() {
        let req = |topics: &[&str], count| ScriptBatchRequest {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            count,
            ..ScriptBatchRequest::default()
        };
        assert_eq!(validate_script_batch(&req(&["a", " "], None)).unwrap(), (vec!["a".to_string()], 1));
        assert!(validate_script_batch(&req(&[], None)).is_err());
        assert!(validate_script_batch(&req(&["a", "b", "c", "d"], None)).is_err());
        assert!(validate_script_batch(&req(&["a"], Some(0))).is_err());
        assert!(validate_script_batch(&req(&["a"], Some(11))).is_err());
        assert!(validate_script_batch(&req(&["a"], Some(10))).is_ok());
    }

    #[test]
    fn shorts_request_accepts_both_shapes() {
        let nested: ShortsRequest = serde_json::from_str(
            r#"{"jsonData": {"script": "a\nb", "title": "T", "description": "D"},
                "emotion": "surprise", "backgroundMusic": "random", "videoIndex": 2}"#,
        )
        .unwrap();
        let draft = nested.draft();
        assert_eq!(draft.title, "T");
        assert_eq!(nested.voice.as_deref(), Some("surprise"));
        assert_eq!(nested.options.background_music.as_deref(), Some("random"));
        assert_eq!(nested.options.video_index, Some(2));

        let flat: ShortsRequest =
            serde_json::from_str(r#"{"script": "x", "title": "t", "provider": "google", "language": "en"}"#).unwrap();
        assert_eq!(flat.draft().script, "x");
        assert_eq!(flat.provider, Some(TtsProvider::Google));
        assert_eq!(flat.language, Some(Language::English));
    }
}
