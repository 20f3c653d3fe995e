//! Clip allocation: covering narration time with short excerpts of stock footage.

use crate::narration::NarrationSegment;
use crate::pool::VideoPool;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_CLIP_SECONDS: f64 = 2.0;
pub const MIN_REMAINING_SECONDS: f64 = 0.1;
pub const STREET_PROBABILITY: f64 = 0.3;
pub const RANDOM_MAX_CLIPS: usize = 50;
pub const RANDOM_MIN_CLIP_SECONDS: f64 = 0.5;
pub const DEFAULT_RANDOM_TARGET_SECONDS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Main,
    Street,
}

/// A trimmed excerpt of a source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDescriptor {
    pub source_path: PathBuf,
    pub start_offset: f64,
    pub duration: f64,
    pub segment_index: usize,
    pub source_duration: f64,
    pub pool: PoolKind,
}

impl ClipDescriptor {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no video files available in the input folders")]
    NoVideos,

    #[error("none of the {0} candidate video files could be probed")]
    NoUsableVideos(usize),
}

/// Media duration lookup. Production uses ffprobe; tests use a table.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<f64>;
}

#[async_trait]
impl DurationProbe for HashMap<PathBuf, f64> {
    async fn duration(&self, path: &Path) -> Result<f64> {
        self.get(path)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no duration for {}", path.display()))
    }
}

/// Per-request picking state: the shuffled main cycle, probe memo and dead files.
struct Picker<'a, P: ?Sized> {
    pool: &'a VideoPool,
    probe: &'a P,
    cycle: Vec<usize>,
    cursor: usize,
    known: HashMap<PathBuf, f64>,
    dead: HashSet<PathBuf>,
}

impl<'a, P: DurationProbe + ?Sized> Picker<'a, P> {
    fn new<R: Rng>(pool: &'a VideoPool, probe: &'a P, rng: &mut R) -> Self {
        let mut cycle: Vec<usize> = (0..pool.main.len()).collect();
        cycle.shuffle(rng);
        Self {
            pool,
            probe,
            cycle,
            cursor: 0,
            known: HashMap::new(),
            dead: HashSet::new(),
        }
    }

    fn alive<'p>(&self, paths: &'p [PathBuf]) -> Vec<&'p PathBuf> {
        paths.iter().filter(|p| !self.dead.contains(*p)).collect()
    }

    fn next_main(&mut self) -> Option<PathBuf> {
        for _ in 0..self.cycle.len() {
            let idx = self.cycle[self.cursor % self.cycle.len()];
            self.cursor += 1;
            let path = &self.pool.main[idx];
            if !self.dead.contains(path) {
                return Some(path.clone());
            }
        }
        None
    }

    fn random_street<R: Rng>(&self, rng: &mut R) -> Option<PathBuf> {
        self.alive(&self.pool.street).choose(rng).map(|p| (*p).clone())
    }

    /// Next candidate: street with fixed probability, else the main cycle,
    /// falling back to whichever pool still has live files.
    fn choose<R: Rng>(&mut self, rng: &mut R) -> Result<(PathBuf, PoolKind), AllocError> {
        let street_alive = !self.alive(&self.pool.street).is_empty();
        if street_alive && rng.gen_bool(STREET_PROBABILITY) {
            if let Some(path) = self.random_street(rng) {
                return Ok((path, PoolKind::Street));
            }
        }
        if let Some(path) = self.next_main() {
            return Ok((path, PoolKind::Main));
        }
        if let Some(path) = self.random_street(rng) {
            debug!(path = %path.display(), "main pool exhausted; using street footage");
            return Ok((path, PoolKind::Street));
        }
        Err(AllocError::NoUsableVideos(self.pool.len()))
    }

    /// Probe once per file and request. Failures mark the file dead.
    async fn duration(&mut self, path: &Path) -> Option<f64> {
        if let Some(d) = self.known.get(path) {
            return Some(*d);
        }
        match self.probe.duration(path).await {
            Ok(d) if d > MIN_REMAINING_SECONDS && d.is_finite() => {
                self.known.insert(path.to_path_buf(), d);
                Some(d)
            }
            Ok(d) => {
                warn!(path = %path.display(), duration = d, "skipping video with unusable duration");
                self.dead.insert(path.to_path_buf());
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping video that failed to probe");
                self.dead.insert(path.to_path_buf());
                None
            }
        }
    }
}

fn random_start<R: Rng>(rng: &mut R, source_duration: f64, clip_duration: f64) -> f64 {
    let max_start = (source_duration - clip_duration).max(0.0);
    rng.gen_range(0.0..=max_start)
}

/// Cover every segment with clips of at most [`MAX_CLIP_SECONDS`], in segment order.
pub async fn allocate_for_segments<P, R>(
    segments: &[NarrationSegment],
    pool: &VideoPool,
    probe: &P,
    rng: &mut R,
) -> Result<Vec<ClipDescriptor>, AllocError>
where
    P: DurationProbe + ?Sized,
    R: Rng + Send,
{
    if pool.is_empty() {
        return Err(AllocError::NoVideos);
    }

    let mut picker = Picker::new(pool, probe, rng);
    let mut clips = Vec::new();

    for (segment_index, segment) in segments.iter().enumerate() {
        let mut remaining = segment.duration;
        let mut produced = 0usize;

        while remaining > MIN_REMAINING_SECONDS {
            let (path, kind) = picker.choose(rng)?;
            let Some(source_duration) = picker.duration(&path).await else {
                continue;
            };

            let duration = remaining.min(source_duration).min(MAX_CLIP_SECONDS);
            let start_offset = random_start(rng, source_duration, duration);
            debug!(
                segment = segment_index + 1,
                clip = produced + 1,
                path = %path.display(),
                start = start_offset,
                duration,
                street = kind == PoolKind::Street,
                "clip allocated"
            );

            clips.push(ClipDescriptor {
                source_path: path,
                start_offset,
                duration,
                segment_index,
                source_duration,
                pool: kind,
            });
            remaining -= duration;
            produced += 1;
        }
    }

    info!(segments = segments.len(), clips = clips.len(), "clip allocation complete");
    Ok(clips)
}

/// Fill `target` seconds with fixed two-second clips when no script drives the cuts.
pub async fn allocate_random<P, R>(
    target: f64,
    pool: &VideoPool,
    probe: &P,
    rng: &mut R,
) -> Result<Vec<ClipDescriptor>, AllocError>
where
    P: DurationProbe + ?Sized,
    R: Rng + Send,
{
    if pool.is_empty() {
        return Err(AllocError::NoVideos);
    }

    let target = if target > 0.0 { target } else { DEFAULT_RANDOM_TARGET_SECONDS };
    let mut picker = Picker::new(pool, probe, rng);
    let mut clips = Vec::new();
    let mut covered = 0.0;

    while covered < target && clips.len() < RANDOM_MAX_CLIPS {
        let (path, kind) = picker.choose(rng)?;
        let Some(source_duration) = picker.duration(&path).await else {
            continue;
        };

        let duration = MAX_CLIP_SECONDS.min(target - covered).min(source_duration);
        if duration < RANDOM_MIN_CLIP_SECONDS {
            break;
        }

        let start_offset = random_start(rng, source_duration, duration);
        clips.push(ClipDescriptor {
            source_path: path,
            start_offset,
            duration,
            segment_index: 0,
            source_duration,
            pool: kind,
        });
        covered += duration;
    }

    info!(clips = clips.len(), covered, target, "random clip allocation complete");
    Ok(clips)
}
