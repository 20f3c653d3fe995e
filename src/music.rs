//! Background music selection that spreads usage evenly across the library.

use crate::job::slash_path;
use crate::pool::{AUDIO_EXTENSIONS, file_names, is_dir, list_files_with_ext, list_subdirs};
use anyhow::{Context, Result, anyhow};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// `musicFolder` value that asks for a pick across every sub-folder.
pub const ALL_FOLDERS: &str = "__ALL_RANDOM__";
/// `backgroundMusic` value with the same meaning.
pub const ALL_FOLDERS_TRACK: &str = "__RANDOM__";
pub const RANDOM_TRACK: &str = "random";
pub const NO_MUSIC: &str = "none";

/// Usage counts keyed by project-relative path with `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MusicStats(pub BTreeMap<String, u64>);

impl MusicStats {
    pub fn count(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn record(&mut self, key: &str) -> u64 {
        let count = self.0.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(stats) => stats,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "music stats unreadable; starting fresh");
                Self::default()
            }
        }
    }

    /// Write to `<path>.tmp` and rename over `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let body = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("write music stats: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replace music stats: {}", path.display()))?;
        Ok(())
    }
}

/// Index of a uniformly chosen candidate among those with the lowest count.
pub fn pick_least_used<R: Rng + ?Sized>(
    candidates: &[String],
    stats: &MusicStats,
    rng: &mut R,
) -> Option<usize> {
    let min = candidates.iter().map(|k| stats.count(k)).min()?;
    let tied: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, k)| stats.count(k) == min)
        .map(|(i, _)| i)
        .collect();
    tied.choose(rng).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub index: usize,
    pub key: String,
    /// Usage count before this pick.
    pub previous_count: u64,
}

enum StatsCommand {
    Pick {
        candidates: Vec<String>,
        reply: oneshot::Sender<Option<Pick>>,
    },
    Snapshot {
        reply: oneshot::Sender<MusicStats>,
    },
}

/// Handle to the task that owns the usage stats. Every pick is read, counted
/// and persisted inside that one task, so concurrent jobs never lose an update.
#[derive(Clone)]
pub struct StatsStore {
    sender: mpsc::Sender<StatsCommand>,
}

impl StatsStore {
    pub async fn spawn(path: PathBuf) -> Self {
        Self::spawn_with_rng(path, StdRng::from_entropy()).await
    }

    pub async fn spawn_with_rng(path: PathBuf, rng: StdRng) -> Self {
        let stats = MusicStats::load(&path).await;
        let (sender, receiver) = mpsc::channel(64);
        tokio::spawn(run_stats_worker(path, stats, rng, receiver));
        Self { sender }
    }

    pub async fn pick(&self, candidates: Vec<String>) -> Result<Option<Pick>> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(StatsCommand::Pick { candidates, reply })
            .await
            .map_err(|_| anyhow!("music stats worker stopped"))?;
        rx.await.map_err(|_| anyhow!("music stats worker dropped the request"))
    }

    pub async fn snapshot(&self) -> Result<MusicStats> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(StatsCommand::Snapshot { reply })
            .await
            .map_err(|_| anyhow!("music stats worker stopped"))?;
        rx.await.map_err(|_| anyhow!("music stats worker dropped the request"))
    }
}

async fn run_stats_worker(
    path: PathBuf,
    mut stats: MusicStats,
    mut rng: StdRng,
    mut receiver: mpsc::Receiver<StatsCommand>,
) {
    debug!(path = %path.display(), tracks = stats.0.len(), "music stats worker started");
    while let Some(command) = receiver.recv().await {
        match command {
            StatsCommand::Pick { candidates, reply } => {
                let pick = pick_least_used(&candidates, &stats, &mut rng).map(|index| {
                    let key = candidates[index].clone();
                    let previous_count = stats.count(&key);
                    stats.record(&key);
                    Pick {
                        index,
                        key,
                        previous_count,
                    }
                });
                // The in-memory count stays authoritative; the next successful save catches the file up.
                if pick.is_some() {
                    if let Err(err) = stats.save(&path).await {
                        warn!(path = %path.display(), error = %err, "music stats not saved");
                    }
                }
                let _ = reply.send(pick);
            }
            StatsCommand::Snapshot { reply } => {
                let _ = reply.send(stats.clone());
            }
        }
    }
    debug!("music stats worker stopped");
}

/// How the caller asked for background music.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicRequest {
    None,
    AllFolders,
    RandomIn(String),
    RandomAtRoot,
    Track { folder: Option<String>, file: String },
}

impl MusicRequest {
    pub fn from_fields(background_music: Option<&str>, folder: Option<&str>) -> Self {
        let track = background_music.map(str::trim).unwrap_or_default();
        let folder = folder.map(str::trim).filter(|f| !f.is_empty());

        if track.is_empty() || track == NO_MUSIC {
            return Self::None;
        }
        if folder == Some(ALL_FOLDERS) || track == ALL_FOLDERS_TRACK {
            return Self::AllFolders;
        }
        match (folder, track == RANDOM_TRACK) {
            (Some(folder), true) => Self::RandomIn(folder.to_string()),
            (None, true) => Self::RandomAtRoot,
            (folder, false) => Self::Track {
                folder: folder.map(str::to_string),
                file: track.to_string(),
            },
        }
    }
}

/// The `background music` folder plus the shared usage stats.
#[derive(Clone)]
pub struct MusicLibrary {
    root: PathBuf,
    project_root: PathBuf,
    legacy_dir: PathBuf,
    store: StatsStore,
}

impl MusicLibrary {
    pub fn new(root: PathBuf, project_root: PathBuf, store: StatsStore) -> Self {
        let legacy_dir = project_root.join("audio");
        Self {
            root,
            project_root,
            legacy_dir,
            store,
        }
    }

    /// Stats key for a file: its path relative to the project root, `/`-separated.
    pub fn key_for(&self, path: &Path) -> String {
        let rel = pathdiff::diff_paths(path, &self.project_root).unwrap_or_else(|| path.to_path_buf());
        slash_path(&rel)
    }

    pub async fn folders(&self) -> Result<Vec<String>> {
        list_subdirs(&self.root).await
    }

    pub async fn tracks_in(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        list_files_with_ext(folder, AUDIO_EXTENSIONS).await
    }

    /// Track names in `folder`, looked up in the library first and then in the
    /// legacy `audio/` folder. `None` when neither holds that folder.
    pub async fn track_names(&self, folder: &str) -> Result<Option<Vec<String>>> {
        for base in [&self.root, &self.legacy_dir] {
            let dir = base.join(folder);
            if is_dir(&dir).await {
                return Ok(Some(file_names(&self.tracks_in(&dir).await?)));
            }
        }
        Ok(None)
    }

    async fn pick_among(&self, files: Vec<PathBuf>) -> Result<Option<PathBuf>> {
        if files.is_empty() {
            return Ok(None);
        }
        let keys = files.iter().map(|f| self.key_for(f)).collect();
        let Some(pick) = self.store.pick(keys).await? else {
            return Ok(None);
        };
        info!(track = %pick.key, used = pick.previous_count, "background music selected");
        Ok(files.into_iter().nth(pick.index))
    }

    pub async fn pick_from_folder(&self, folder: &Path) -> Result<Option<PathBuf>> {
        let files = self.tracks_in(folder).await?;
        self.pick_among(files).await
    }

    pub async fn pick_from_root(&self) -> Result<Option<PathBuf>> {
        self.pick_from_folder(&self.root).await
    }

    /// Pool the tracks of every direct sub-folder; unreadable folders are skipped.
    pub async fn pick_from_all_folders(&self) -> Result<Option<PathBuf>> {
        let mut files = Vec::new();
        for name in self.folders().await? {
            let folder = self.root.join(&name);
            match self.tracks_in(&folder).await {
                Ok(tracks) => files.extend(tracks),
                Err(err) => warn!(folder = %name, error = %err, "skipping unreadable music folder"),
            }
        }
        self.pick_among(files).await
    }

    /// Turn a request into an existing file, or `None` when no music applies.
    pub async fn resolve(&self, request: &MusicRequest) -> Result<Option<PathBuf>> {
        let path = match request {
            MusicRequest::None => return Ok(None),
            MusicRequest::AllFolders => self.pick_from_all_folders().await?,
            MusicRequest::RandomAtRoot => self.pick_from_root().await?,
            MusicRequest::RandomIn(folder) => {
                let dir = self.root.join(folder);
                if !is_dir(&dir).await {
                    warn!(folder = %folder, "music folder not found");
                    return Ok(None);
                }
                self.pick_from_folder(&dir).await?
            }
            MusicRequest::Track { folder: Some(folder), file } => Some(self.root.join(folder).join(file)),
            MusicRequest::Track { folder: None, file } => {
                let legacy = self.legacy_dir.join(file);
                if fs::metadata(&legacy).await.is_ok() {
                    Some(legacy)
                } else {
                    Some(self.root.join(file))
                }
            }
        };

        match path {
            Some(path) if fs::metadata(&path).await.is_ok() => Ok(Some(path)),
            Some(path) => {
                warn!(path = %path.display(), "background music file missing; continuing without it");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("background music/t{i}.mp3")).collect()
    }

    #[test]
    fn least_used_wins() {
        let mut stats = MusicStats::default();
        stats.0.insert("a".into(), 3);
        stats.0.insert("b".into(), 1);
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        for _ in 0..20 {
            assert_eq!(pick_least_used(&candidates, &stats, &mut rng), Some(2));
        }
        assert_eq!(pick_least_used(&[], &stats, &mut rng), None);
    }

    #[tokio::test]
    async fn counts_stay_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/common/music_usage_stats.json");
        let store = StatsStore::spawn_with_rng(path.clone(), StdRng::seed_from_u64(4)).await;

        let n = 5;
        for _ in 0..(3 * n + 2) {
            store.pick(keys(n)).await.unwrap().unwrap();
        }

        let stats = store.snapshot().await.unwrap();
        let counts: Vec<u64> = keys(n).iter().map(|k| stats.count(k)).collect();
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(max - min <= 1, "{counts:?}");
        assert_eq!(counts.iter().sum::<u64>(), 17);

        let on_disk = MusicStats::load(&path).await;
        assert_eq!(on_disk, stats);
        assert!(!dir.path().join("data/common/music_usage_stats.json.tmp").exists());
    }

    #[tokio::test]
    async fn concurrent_picks_are_all_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::spawn(dir.path().join("stats.json")).await;

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let store = store.clone();
            set.spawn(async move { store.pick(keys(4)).await });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap().unwrap();
        }

        let stats = store.snapshot().await.unwrap();
        assert!(keys(4).iter().all(|k| stats.count(k) == 3));
    }

    #[tokio::test]
    async fn failed_save_still_counts_the_pick() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = StatsStore::spawn(blocker.join("stats.json")).await;

        let pick = store.pick(keys(1)).await.unwrap().unwrap();
        assert_eq!(pick.previous_count, 0);
        let pick = store.pick(keys(1)).await.unwrap().unwrap();
        assert_eq!(pick.previous_count, 1);
        assert_eq!(store.snapshot().await.unwrap().count(&keys(1)[0]), 2);
    }

    #[tokio::test]
    async fn corrupt_stats_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(MusicStats::load(&path).await, MusicStats::default());
    }

    #[test]
    fn request_parsing() {
        assert_eq!(MusicRequest::from_fields(None, None), MusicRequest::None);
        assert_eq!(MusicRequest::from_fields(Some("none"), Some("calm")), MusicRequest::None);
        assert_eq!(
            MusicRequest::from_fields(Some("random"), Some(ALL_FOLDERS)),
            MusicRequest::AllFolders
        );
        assert_eq!(
            MusicRequest::from_fields(Some(ALL_FOLDERS_TRACK), None),
            MusicRequest::AllFolders
        );
        assert_eq!(
            MusicRequest::from_fields(Some("random"), Some("calm")),
            MusicRequest::RandomIn("calm".into())
        );
        assert_eq!(MusicRequest::from_fields(Some("random"), Some("")), MusicRequest::RandomAtRoot);
        assert_eq!(
            MusicRequest::from_fields(Some("song.mp3"), None),
            MusicRequest::Track { folder: None, file: "song.mp3".into() }
        );
    }

    #[tokio::test]
    async fn library_picks_across_folders_with_relative_keys() {
        let project = tempfile::tempdir().unwrap();
        let root = project.path().join("background music");
        for (folder, file) in [("calm", "a.mp3"), ("calm", "b.wav"), ("epic", "c.m4a")] {
            std::fs::create_dir_all(root.join(folder)).unwrap();
            std::fs::write(root.join(folder).join(file), b"x").unwrap();
        }
        std::fs::write(root.join("calm").join("cover.jpg"), b"x").unwrap();

        let store = StatsStore::spawn(project.path().join("data/common/music_usage_stats.json")).await;
        let library = MusicLibrary::new(root.clone(), project.path().to_path_buf(), store);

        let mut picked = Vec::new();
        for _ in 0..3 {
            let path = library.resolve(&MusicRequest::AllFolders).await.unwrap().unwrap();
            picked.push(library.key_for(&path));
        }
        picked.sort();
        assert_eq!(
            picked,
            vec![
                "background music/calm/a.mp3",
                "background music/calm/b.wav",
                "background music/epic/c.m4a",
            ]
        );

        assert_eq!(library.folders().await.unwrap(), vec!["calm", "epic"]);
        let missing = library
            .resolve(&MusicRequest::Track { folder: Some("calm".into()), file: "nope.mp3".into() })
            .await
            .unwrap();
        assert!(missing.is_none());

        std::fs::create_dir_all(project.path().join("audio/old")).unwrap();
        std::fs::write(project.path().join("audio/old/d.mp3"), b"x").unwrap();
        assert_eq!(library.track_names("calm").await.unwrap(), Some(vec!["a.mp3".into(), "b.wav".into()]));
        assert_eq!(library.track_names("old").await.unwrap(), Some(vec!["d.mp3".into()]));
        assert_eq!(library.track_names("nope").await.unwrap(), None);
    }
}
