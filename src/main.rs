use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use shorts_studio::config::AppConfig;
use shorts_studio::init;
use shorts_studio::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    shorts_studio::init_logging();

    let config_path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = AppConfig::load(Some(&config_path)).await?;
    info!(
        root = %config.project_root.display(),
        provider = config.tts_provider.as_str(),
        "Starting shorts-studio"
    );

    init::ensure_directories(&config).await?;
    let state = AppState::new(config).await?;
    init::check_ffmpeg(state.generator.ffmpeg()).await;

    server::serve(state).await
}
