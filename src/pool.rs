use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];

/// Sub-folder of an input folder holding the secondary "street" footage.
pub const STREET_DIR: &str = "street";

/// Candidate source footage for one allocation, read fresh per request.
#[derive(Debug, Clone, Default)]
pub struct VideoPool {
    pub main: Vec<PathBuf>,
    pub street: Vec<PathBuf>,
}

impl VideoPool {
    pub fn new(main: Vec<PathBuf>, street: Vec<PathBuf>) -> Self {
        Self { main, street }
    }

    /// Read `<dir>/*` as the main pool and `<street_dir>/*` as the street pool.
    pub async fn load(dir: &Path, street_dir: Option<&Path>) -> Result<Self> {
        let main = list_files_with_ext(dir, VIDEO_EXTENSIONS)
            .await
            .with_context(|| format!("Failed to read video folder {}", dir.display()))?;

        let street = match street_dir {
            Some(street_dir) => match list_files_with_ext(street_dir, VIDEO_EXTENSIONS).await {
                Ok(files) => files,
                Err(err) => {
                    warn!(dir = %street_dir.display(), error = %err, "street folder unreadable");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        debug!(main = main.len(), street = street.len(), "video pool loaded");
        Ok(Self { main, street })
    }

    /// Keep only main-pool files whose file name is in `allow`. An empty list keeps all.
    pub fn retain_main(&mut self, allow: &[String]) {
        if allow.is_empty() {
            return;
        }
        self.main.retain(|path| {
            path.file_name()
                .and_then(OsStr::to_str)
                .map(|name| allow.iter().any(|a| a == name))
                .unwrap_or(false)
        });
        debug!(remaining = self.main.len(), "main pool filtered by allow-list");
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.street.is_empty()
    }

    pub fn len(&self) -> usize {
        self.main.len() + self.street.len()
    }
}

pub fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| exts.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Files directly inside `dir` with one of `exts`, sorted by path.
/// A missing directory yields an empty list.
pub async fn list_files_with_ext(dir: &Path, exts: &[&str]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !is_dir(dir).await {
        return Ok(out);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, exts) {
            out.push(path);
        }
    }

    out.sort();
    Ok(out)
}

/// Bare file names of `paths`, in order.
pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

pub async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Names of the direct sub-directories of `dir`, sorted.
pub async fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !is_dir(dir).await {
        return Ok(out);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_splits_main_and_street() {
        let dir = tempfile::tempdir().unwrap();
        let street = dir.path().join(STREET_DIR);
        std::fs::create_dir_all(&street).unwrap();
        for name in ["a.mp4", "b.MOV", "notes.txt", "c.webm"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(street.join("s.mkv"), b"x").unwrap();

        let pool = VideoPool::load(dir.path(), Some(&street)).await.unwrap();
        let names = file_names(&pool.main);
        assert_eq!(names, vec!["a.mp4", "b.MOV", "c.webm"]);
        assert_eq!(pool.street.len(), 1);
        assert_eq!(pool.len(), 4);
    }

    #[tokio::test]
    async fn missing_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pool = VideoPool::load(&dir.path().join("nope"), None).await.unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn allow_list_filters_main_only() {
        let mut pool = VideoPool::new(
            vec![PathBuf::from("in/a.mp4"), PathBuf::from("in/b.mp4")],
            vec![PathBuf::from("in/street/s.mp4")],
        );
        pool.retain_main(&["b.mp4".to_string()]);
        assert_eq!(pool.main, vec![PathBuf::from("in/b.mp4")]);
        assert_eq!(pool.street.len(), 1);

        pool.retain_main(&[]);
        assert_eq!(pool.main.len(), 1);
    }
}
