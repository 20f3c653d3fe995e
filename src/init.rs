use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::ffmpeg::Ffmpeg;

fn required_dirs(config: &AppConfig) -> Vec<PathBuf> {
    vec![
        config.inputs_dir(),
        config.street_dir(),
        config.music_dir(),
        config.outputs_dir(),
        config.template_dir(),
        config.common_dir(),
        config.fonts_dir(),
    ]
}

/// Create the working layout under the project root.
pub async fn ensure_directories(config: &AppConfig) -> Result<()> {
    for dir in required_dirs(config) {
        if fs::metadata(&dir).await.is_err() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            info!(dir = %dir.display(), "Created directory");
        }
    }
    Ok(())
}

pub async fn check_ffmpeg(ffmpeg: &Ffmpeg) -> bool {
    let ok = ffmpeg.is_available().await;
    if !ok {
        warn!(binary = %ffmpeg.ffmpeg_path().display(), "FFmpeg not found. Install it or set FFMPEG_PATH.");
    }
    ok
}
