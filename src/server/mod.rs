//! HTTP API.

pub mod error;
pub mod handlers;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/script/generate", post(handlers::generate_script))
        .route("/script/generate-batch", post(handlers::generate_script_batch))
        .route("/shorts/generate", post(handlers::generate_short))
        .route("/shorts/generate-batch", post(handlers::generate_short_batch))
        .route("/shorts/generate-tts", post(handlers::generate_tts))
        .route("/whisper/generate-srt", post(handlers::generate_srt))
        .route("/video/generate-video", post(handlers::generate_video))
        .route("/plan", post(handlers::plan))
        .route("/resources/music/folders", get(handlers::music_folders))
        .route("/resources/music/files", get(handlers::music_files))
        .route("/resources/inputs/folders", get(handlers::input_folders))
        .route("/resources/inputs/files", get(handlers::input_files));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_state(root: &std::path::Path) -> AppState {
        let config = AppConfig {
            project_root: root.to_path_buf(),
            ..AppConfig::default()
        };
        AppState::new(config).await.unwrap()
    }

    async fn call(router: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(create_router(test_state(dir.path()).await), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(router, "POST", "/api/shorts/generate", Some(r#"{"script": "  "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "script is required");
    }

    #[tokio::test]
    async fn malformed_json_gets_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(router, "POST", "/api/plan", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn script_batch_validates_topics() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(
            router,
            "POST",
            "/api/script/generate-batch",
            Some(r#"{"topics": ["a", "b", "c", "d"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("at most 3"));
    }

    #[tokio::test]
    async fn plan_without_videos_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(
            router,
            "POST",
            "/api/plan",
            Some(r#"{"script": "Hello world.\nSee you soon.", "totalDuration": 4.0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no video files"));
    }

    #[tokio::test]
    async fn video_with_missing_audio_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, _) = call(
            router,
            "POST",
            "/api/video/generate-video",
            Some(r#"{"audioPath": "nope.mp3"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_resource_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("background music/calm")).unwrap();
        std::fs::create_dir_all(dir.path().join("inputs/japan")).unwrap();
        let state = test_state(dir.path()).await;

        let (status, body) = call(create_router(state.clone()), "GET", "/api/resources/music/folders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["folders"], serde_json::json!(["calm"]));

        let (_, body) = call(create_router(state), "GET", "/api/resources/inputs/folders", None).await;
        assert_eq!(body["folders"], serde_json::json!(["japan"]));
    }

    #[tokio::test]
    async fn lists_files_of_a_resource_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inputs/japan")).unwrap();
        std::fs::write(dir.path().join("inputs/japan/b.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("inputs/japan/a.mkv"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("background music/calm")).unwrap();
        std::fs::write(dir.path().join("background music/calm/song.mp3"), b"x").unwrap();
        let state = test_state(dir.path()).await;

        let (status, body) = call(create_router(state.clone()), "GET", "/api/resources/inputs/files?folder=japan", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"success": true, "files": ["a.mkv", "b.mp4"]}));

        let (status, body) = call(create_router(state.clone()), "GET", "/api/resources/music/files?folder=calm", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], serde_json::json!(["song.mp3"]));

        let (status, body) = call(create_router(state.clone()), "GET", "/api/resources/inputs/files", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "folder parameter is required");

        let (status, _) = call(create_router(state.clone()), "GET", "/api/resources/music/files?folder=epic", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(create_router(state), "GET", "/api/resources/inputs/files?folder=..", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn srt_requires_audio_and_title() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let (status, body) = call(
            create_router(state.clone()),
            "POST",
            "/api/whisper/generate-srt",
            Some(r#"{"audioPath": "outputs/p/temp/a.mp3"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "audioPath and title are required");

        let (status, _) = call(
            create_router(state),
            "POST",
            "/api/whisper/generate-srt",
            Some(r#"{"audioPath": "outputs/p/temp/a.mp3", "title": "t"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn narration_only_needs_a_script() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(router, "POST", "/api/shorts/generate-tts", Some(r#"{"jsonData": {"script": " "}}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "script is required");
    }

    #[tokio::test]
    async fn escaping_paths_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()).await);
        let (status, body) = call(
            router,
            "POST",
            "/api/video/generate-video",
            Some(r#"{"audioPath": "../../etc/passwd"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("audioPath"));
    }
}
