//! Per-job output folders: `outputs/<project>/` holding the final video,
//! `info.txt` and a `temp/` folder for intermediates.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::srt::UTF8_BOM;

pub const TEMP_DIR: &str = "temp";
pub const INFO_FILE: &str = "info.txt";
const MAX_TITLE_CHARS: usize = 200;
const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

fn compact_timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}

/// `YYYYMMDDTHHMMSS`, suffixed with `_v<n>` for the second and later video of a batch.
pub fn project_folder_name(now: &DateTime<Local>, video_index: Option<u32>) -> String {
    match video_index {
        Some(n) if n > 1 => format!("{}_v{}", compact_timestamp(now), n),
        _ => compact_timestamp(now),
    }
}

/// Folder used when a render request names no project.
pub fn auto_folder_name(now: &DateTime<Local>) -> String {
    format!("video_{}", compact_timestamp(now))
}

/// File-system safe title: reserved and control characters dropped, whitespace
/// runs become one `_`, leading/trailing dots and underscores removed.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
            continue;
        }
        let c = if c.is_whitespace() { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

pub fn video_file_name(title: Option<&str>, video_index: Option<u32>, now_ms: i64) -> String {
    let suffix = video_index.map(|n| format!("_v{n}")).unwrap_or_default();
    let stem = title.map(sanitize_title).unwrap_or_default();
    if stem.is_empty() {
        format!("video{suffix}_{now_ms}.mp4")
    } else {
        format!("{stem}{suffix}.mp4")
    }
}

/// `value` as a relative path that cannot leave the folder it is joined to.
/// Absolute paths and `..` components yield `None`.
pub fn confined_path(value: &str) -> Option<PathBuf> {
    let path = Path::new(value);
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| path.to_path_buf())
}

/// `path` with `/` separators on every platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn info_text(title: &str, description: &str) -> String {
    format!("{UTF8_BOM}제목: {title}\n\n설명: {description}")
}

/// A job folder on disk.
#[derive(Debug, Clone)]
pub struct JobDir {
    name: String,
    root: PathBuf,
}

impl JobDir {
    /// Create `<outputs>/<name>/temp/`.
    pub async fn create(outputs: &Path, name: &str) -> Result<Self> {
        let root = outputs.join(name);
        fs::create_dir_all(root.join(TEMP_DIR))
            .await
            .with_context(|| format!("Failed to create job folder {}", root.display()))?;
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn temp_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.temp().join(name)
    }

    /// Public URL of a file in this folder, as served under `/outputs`.
    pub fn url_for(&self, file_name: &str) -> String {
        format!("/outputs/{}/{}", self.name, file_name)
    }

    pub async fn write_info(&self, title: &str, description: &str) -> Result<PathBuf> {
        let path = self.root.join(INFO_FILE);
        fs::write(&path, info_text(title, description))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Move every top-level file except videos and `info.txt` into `temp/`.
    pub async fn tidy(&self) -> Result<usize> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let temp = self.temp();
        let mut moved = 0;
        for path in files {
            let keep = path.file_name() == Some(OsStr::new(INFO_FILE))
                || path
                    .extension()
                    .and_then(OsStr::to_str)
                    .is_some_and(|e| e.eq_ignore_ascii_case("mp4"));
            let Some(name) = path.file_name().filter(|_| !keep) else {
                continue;
            };
            let dest = temp.join(name);
            match fs::rename(&path, &dest).await {
                Ok(()) => {
                    debug!(from = %path.display(), to = %dest.display(), "Moved into temp");
                    moved += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Could not move file into temp"),
            }
        }
        Ok(moved)
    }
}
