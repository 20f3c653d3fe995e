pub mod api;
pub mod clip_plan;
pub mod config;
pub mod ffmpeg;
pub mod generator;
pub mod init;
pub mod job;
pub mod music;
pub mod narration;
pub mod pool;
pub mod render;
pub mod server;
pub mod srt;
pub mod subtitle;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` overrides the default level,
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_logging() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shorts_studio=info,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
