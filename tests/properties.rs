use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;

use shorts_studio::clip_plan::{MIN_REMAINING_SECONDS, allocate_for_segments, allocate_random};
use shorts_studio::music::{MusicStats, pick_least_used};
use shorts_studio::narration::{NarrationSegment, segment_script, total_duration};
use shorts_studio::pool::VideoPool;
use shorts_studio::subtitle::{Cue, build_cues};

const EPS: f64 = 1e-9;
const WORDS: &[&str] = &[
    "일본", "여자", "first", "두 번째", "대박", "cheap", "travel", "tips", "미쳤다", "really", "서울", "커피",
];
const ENDINGS: &[&str] = &["", ".", "!", "?", "...", "!?"];

fn random_script(rng: &mut StdRng) -> String {
    let lines = rng.gen_range(1..8);
    let mut out = Vec::new();
    for _ in 0..lines {
        let sentences = rng.gen_range(1..4);
        let mut line = String::new();
        for s in 0..sentences {
            if s > 0 {
                line.push(' ');
            }
            let words = rng.gen_range(1..9);
            let picked: Vec<&str> = (0..words).map(|_| *WORDS.choose(rng).unwrap()).collect();
            line.push_str(&picked.join(" "));
            line.push_str(ENDINGS.choose(rng).unwrap());
        }
        out.push(line);
        if rng.gen_bool(0.2) {
            out.push(String::new());
        }
    }
    out.join("\n")
}

fn assert_cues_cover(cues: &[Cue], total: f64) {
    assert!(!cues.is_empty());
    assert!(cues[0].start.abs() < EPS, "first cue starts at {}", cues[0].start);
    let last = cues.last().unwrap();
    assert!((last.end - total).abs() < EPS, "last cue ends at {} not {}", last.end, total);
    for pair in cues.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

fn pool_with_durations(rng: &mut StdRng) -> (VideoPool, HashMap<PathBuf, f64>) {
    let main: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("/inputs/m{i}.mp4"))).collect();
    let street: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("/inputs/street/s{i}.mp4"))).collect();
    let probe = main
        .iter()
        .chain(street.iter())
        .map(|p| (p.clone(), rng.gen_range(0.4..15.0)))
        .collect();
    (VideoPool::new(main, street), probe)
}

#[test]
fn segment_durations_sum_to_total() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..200 {
        let script = random_script(&mut rng);
        let total = rng.gen_range(0.0..120.0);
        let segments = segment_script(Some(&script), None, total);
        assert!((total_duration(&segments) - total).abs() < 1e-6);

        let short: Vec<f64> = vec![0.5; segments.len().saturating_sub(1)];
        let segments = segment_script(Some(&script), Some(&short), total.max(60.0));
        assert!((total_duration(&segments) - total.max(60.0)).abs() < 1e-6);
    }
}

#[test]
fn cues_are_contiguous_over_the_narration() {
    let mut rng = StdRng::seed_from_u64(12);
    for _ in 0..200 {
        let script = random_script(&mut rng);
        let total = rng.gen_range(1.0..90.0);
        let segments = segment_script(Some(&script), None, total);
        let cues = build_cues(&segments);
        assert_cues_cover(&cues, total_duration(&segments));
    }
}

#[test]
fn chunked_segment_keeps_its_duration() {
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..200 {
        let line = random_script(&mut rng).replace('\n', " ");
        let d = rng.gen_range(0.5..20.0);
        let cues = build_cues(&[NarrationSegment::new(line, d)]);
        let sum: f64 = cues.iter().map(Cue::duration).sum();
        assert!((sum - d).abs() < EPS, "{sum} vs {d}");
    }
}

#[tokio::test]
async fn clips_cover_each_segment_and_stay_in_bounds() {
    let mut rng = StdRng::seed_from_u64(14);
    for _ in 0..50 {
        let (pool, probe) = pool_with_durations(&mut rng);
        let script = random_script(&mut rng);
        let segments = segment_script(Some(&script), None, rng.gen_range(1.0..60.0));
        let clips = allocate_for_segments(&segments, &pool, &probe, &mut rng).await.unwrap();

        for (i, segment) in segments.iter().enumerate() {
            let covered: f64 = clips.iter().filter(|c| c.segment_index == i).map(|c| c.duration).sum();
            assert!(covered <= segment.duration + EPS);
            assert!(segment.duration - covered <= MIN_REMAINING_SECONDS + EPS);
        }
        for clip in &clips {
            assert!(clip.start_offset >= 0.0);
            assert!(clip.start_offset + clip.duration <= probe[&clip.source_path] + EPS);
        }
    }
}

#[tokio::test]
async fn random_clips_stay_in_bounds() {
    let mut rng = StdRng::seed_from_u64(15);
    let (pool, probe) = pool_with_durations(&mut rng);
    let clips = allocate_random(30.0, &pool, &probe, &mut rng).await.unwrap();
    assert!(!clips.is_empty());
    for clip in &clips {
        assert!(clip.start_offset + clip.duration <= clip.source_duration + EPS);
    }
}

#[test]
fn fair_picker_converges() {
    let mut rng = StdRng::seed_from_u64(16);
    let keys: Vec<String> = (0..7).map(|i| format!("background music/{i}.mp3")).collect();
    let mut stats = MusicStats::default();
    for _ in 0..1000 {
        let i = pick_least_used(&keys, &stats, &mut rng).unwrap();
        stats.record(&keys[i]);
    }
    let counts: Vec<u64> = keys.iter().map(|k| stats.count(k)).collect();
    let max = counts.iter().max().unwrap();
    let min = counts.iter().min().unwrap();
    assert!(max - min <= 1, "{counts:?}");
}

#[test]
fn hello_world_example() {
    let segments = segment_script(Some("Hello world.\nSee you soon."), None, 4.0);
    assert_eq!(
        segments,
        vec![
            NarrationSegment::new("Hello world.", 2.0),
            NarrationSegment::new("See you soon.", 2.0),
        ]
    );
    let cues = build_cues(&segments);
    assert_eq!(cues.len(), 2);
    assert_eq!((cues[0].start, cues[0].end, cues[0].text.as_str()), (0.0, 2.0, "Hello world."));
    assert_eq!((cues[1].start, cues[1].end, cues[1].text.as_str()), (2.0, 4.0, "See you soon."));
}
