//! Request handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::extract::rejection::JsonRejection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::api::gemini::{ScriptDraft, ScriptRequest};
use crate::generator::{
    BatchReport, Plan, PlanRequest, ScriptBatchReport, ScriptBatchRequest, ShortsOutcome, ShortsRequest, SrtOutcome, SrtRequest,
    TtsJob, VideoOutcome, VideoRequest,
};

type Body<T> = Result<Json<T>, JsonRejection>;

/// Successful payload with `success: true` merged into the object.
#[derive(Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success { success: true, body })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ScriptData {
    pub data: ScriptDraft,
}

pub async fn generate_script(
    State(state): State<AppState>,
    payload: Body<ScriptRequest>,
) -> ApiResult<Json<Success<ScriptData>>> {
    let Json(request) = payload?;
    let data = state.generator.generate_script(&request).await?;
    Ok(ok(ScriptData { data }))
}

pub async fn generate_script_batch(
    State(state): State<AppState>,
    payload: Body<ScriptBatchRequest>,
) -> ApiResult<Json<Success<ScriptBatchReport>>> {
    let Json(request) = payload?;
    let report = state.generator.generate_scripts_batch(&request).await?;
    Ok(ok(report))
}

pub async fn generate_short(
    State(state): State<AppState>,
    payload: Body<ShortsRequest>,
) -> ApiResult<Json<Success<ShortsOutcome>>> {
    let Json(request) = payload?;
    let outcome = state.generator.generate_short(&request).await?;
    info!(folder = %outcome.project_folder, "Short generated");
    Ok(ok(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    #[serde(default)]
    pub items: Vec<ShortsRequest>,
}

/// Runs every item even when some fail; the per-item results carry the errors.
pub async fn generate_short_batch(
    State(state): State<AppState>,
    payload: Body<BatchBody>,
) -> ApiResult<Json<Success<BatchReport>>> {
    let Json(body) = payload?;
    if body.items.is_empty() {
        return Err(ApiError::bad_request("items must not be empty"));
    }
    let report = state.generator.generate_batch(&body.items).await;
    Ok(ok(report))
}

pub async fn generate_tts(State(state): State<AppState>, payload: Body<ShortsRequest>) -> ApiResult<Json<Success<TtsJob>>> {
    let Json(request) = payload?;
    let job = state.generator.generate_tts(&request).await?;
    info!(folder = %job.project_folder, audio = %job.audio_path, "Narration generated");
    Ok(ok(job))
}

pub async fn generate_srt(State(state): State<AppState>, payload: Body<SrtRequest>) -> ApiResult<Json<Success<SrtOutcome>>> {
    let Json(request) = payload?;
    let outcome = state.generator.generate_srt(&request).await?;
    Ok(ok(outcome))
}

pub async fn generate_video(
    State(state): State<AppState>,
    payload: Body<VideoRequest>,
) -> ApiResult<Json<Success<VideoOutcome>>> {
    let Json(request) = payload?;
    let outcome = state.generator.generate_video(&request).await?;
    Ok(ok(outcome))
}

pub async fn plan(State(state): State<AppState>, payload: Body<PlanRequest>) -> ApiResult<Json<Success<Plan>>> {
    let Json(request) = payload?;
    if !request.total_duration.is_finite() || request.total_duration < 0.0 {
        return Err(ApiError::bad_request("totalDuration must be a non-negative number"));
    }
    let plan = state.generator.plan(&request).await?;
    Ok(ok(plan))
}

#[derive(Serialize)]
pub struct Folders {
    pub folders: Vec<String>,
}

pub async fn music_folders(State(state): State<AppState>) -> ApiResult<Json<Folders>> {
    let folders = state.generator.music_folders().await?;
    Ok(Json(Folders { folders }))
}

pub async fn input_folders(State(state): State<AppState>) -> ApiResult<Json<Folders>> {
    let folders = state.generator.input_folders().await?;
    Ok(Json(Folders { folders }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FolderQuery {
    #[serde(default)]
    pub folder: Option<String>,
}

impl FolderQuery {
    fn required(self) -> ApiResult<String> {
        self.folder
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ApiError::bad_request("folder parameter is required"))
    }
}

#[derive(Serialize)]
pub struct Files {
    pub files: Vec<String>,
}

pub async fn input_files(State(state): State<AppState>, Query(query): Query<FolderQuery>) -> ApiResult<Json<Success<Files>>> {
    let files = state.generator.input_files(&query.required()?).await?;
    Ok(ok(Files { files }))
}

pub async fn music_files(State(state): State<AppState>, Query(query): Query<FolderQuery>) -> ApiResult<Json<Success<Files>>> {
    let files = state.generator.music_files(&query.required()?).await?;
    Ok(ok(Files { files }))
}
