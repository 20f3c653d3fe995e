//! The ffmpeg recipes used by the generation pipeline.

use crate::clip_plan::ClipDescriptor;
use crate::ffmpeg::{FfmpegCommand, FilterChain, FilterGraph, Input, escape_filter_value};
use crate::pool::has_extension;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const FRAME_WIDTH: u32 = 1080;
pub const FRAME_HEIGHT: u32 = 1920;
pub const CLIP_WIDTH: u32 = 702;
pub const CLIP_HEIGHT: u32 = 1248;
pub const CLIP_TOP: u32 = 450;
pub const FPS: u32 = 30;

pub const TEMPLATE_VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

pub const SUBTITLE_FONT: &str = "NanumMyeongjo";
pub const SUBTITLE_STYLE: &str = "Fontname=NanumMyeongjo,Fontsize=8,PrimaryColour=&Hffffff,BackColour=&H00000000,BorderStyle=1,Outline=0,Shadow=0.5,Alignment=10,MarginV=30,MarginL=10,MarginR=10,Bold=1";

const NARRATION_FILTERS: &[&str] = &["volume=1.7", "atempo=1.1"];
const MUSIC_FILTERS: &[&str] = &["volume=0.15", "atempo=1.0", "aloop=loop=-1:size=2e+09"];
const WESTERN_GRADE: &str = "eq=contrast=1.15:saturation=1.2,colorbalance=rs=.05:bs=-.05";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFilter {
    #[default]
    None,
    Western,
}

impl VideoFilter {
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(n) if n.eq_ignore_ascii_case("western") => Self::Western,
            _ => Self::None,
        }
    }
}

/// Background layer behind the clip strip.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Image(PathBuf),
    Video(PathBuf),
}

impl Template {
    pub fn from_path(path: PathBuf) -> Self {
        if has_extension(&path, TEMPLATE_VIDEO_EXTENSIONS) {
            Self::Video(path)
        } else {
            Self::Image(path)
        }
    }

    fn input(&self) -> Input {
        match self {
            Self::Image(p) => Input::new(p).loop_image(),
            Self::Video(p) => Input::new(p).stream_loop(),
        }
    }
}

/// Everything one final render needs.
#[derive(Debug, Clone)]
pub struct ComposeJob<'a> {
    pub clips: &'a [ClipDescriptor],
    pub output: PathBuf,
    pub audio: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
    pub fonts_dir: PathBuf,
    pub template: Option<Template>,
    pub banner: Option<PathBuf>,
    pub filter: VideoFilter,
}

fn fill_frame(width: u32, height: u32) -> String {
    format!("scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height},setsar=1,fps={FPS}")
}

/// Join narration pieces end to end.
pub fn concat_audio(parts: &[PathBuf], output: &Path) -> Result<FfmpegCommand> {
    if parts.is_empty() {
        bail!("no audio parts to concatenate");
    }

    let mut cmd = FfmpegCommand::new(output);
    let mut chain = FilterChain::new();
    for part in parts {
        let idx = cmd.add_input(Input::new(part));
        chain = chain.input(format!("{idx}:a"));
    }
    let chain = chain
        .filter(format!("concat=n={}:v=0:a=1", parts.len()))
        .output("out");

    Ok(cmd.filter_graph(FilterGraph::new().chain(chain)).map("out"))
}

/// Lay looped background music under the narration, trimmed to `duration`.
pub fn mix_background(narration: &Path, music: &Path, duration: f64, output: &Path) -> FfmpegCommand {
    let mut narration_chain = FilterChain::new().input("0:a");
    for f in NARRATION_FILTERS {
        narration_chain = narration_chain.filter(*f);
    }
    let mut music_chain = FilterChain::new().input("1:a");
    for f in MUSIC_FILTERS {
        music_chain = music_chain.filter(*f);
    }

    let graph = FilterGraph::new()
        .chain(narration_chain.output("tts"))
        .chain(music_chain.output("bg"))
        .chain(
            FilterChain::new()
                .inputs(["bg", "tts"])
                .filter("amix=inputs=2:duration=first:dropout_transition=0")
                .output("mixed"),
        );

    FfmpegCommand::new(output)
        .input(Input::new(narration))
        .input(Input::new(music))
        .filter_graph(graph)
        .map("mixed")
        .output_args(["-ac", "2", "-ar", "44100"])
        .limit_duration(duration)
}

/// The single render that produces the final vertical video. Without a
/// template the clip strip is padded onto a black 1080x1920 frame.
pub fn compose_short(job: &ComposeJob<'_>) -> Result<FfmpegCommand> {
    if job.clips.is_empty() {
        bail!("cannot compose a video without clips");
    }

    let mut cmd = FfmpegCommand::new(&job.output);
    let mut graph = FilterGraph::new();

    let template_idx = job.template.as_ref().map(|t| cmd.add_input(t.input()));

    let mut clip_labels = Vec::with_capacity(job.clips.len());
    for (i, clip) in job.clips.iter().enumerate() {
        let idx = cmd.add_input(
            Input::new(&clip.source_path)
                .seek(clip.start_offset)
                .duration(clip.duration),
        );
        let mut chain = FilterChain::new()
            .input(format!("{idx}:v"))
            .filter(fill_frame(CLIP_WIDTH, CLIP_HEIGHT));
        if job.filter == VideoFilter::Western {
            chain = chain.filter(WESTERN_GRADE);
        }
        let label = format!("v{i}");
        graph.push(chain.output(label.clone()));
        clip_labels.push(label);
    }

    let audio_idx = job.audio.as_ref().map(|a| cmd.add_input(Input::new(a)));
    let banner_idx = job
        .banner
        .as_ref()
        .map(|b| cmd.add_input(Input::new(b).loop_image()));

    graph.push(
        FilterChain::new()
            .inputs(clip_labels)
            .filter(format!("concat=n={}:v=1:a=0", job.clips.len()))
            .output("clip"),
    );
    if let Some(idx) = template_idx {
        graph.push(
            FilterChain::new()
                .input(format!("{idx}:v"))
                .filter(fill_frame(FRAME_WIDTH, FRAME_HEIGHT))
                .output("template"),
        );
        graph.push(
            FilterChain::new()
                .inputs(["template", "clip"])
                .filter(format!("overlay=(W-w)/2:{CLIP_TOP}:shortest=1"))
                .output("composed"),
        );
    } else {
        graph.push(
            FilterChain::new()
                .input("clip")
                .filter(format!("pad={FRAME_WIDTH}:{FRAME_HEIGHT}:(ow-iw)/2:{CLIP_TOP}:color=black"))
                .output("composed"),
        );
    }
    let mut current = "composed".to_string();

    if let Some(srt) = &job.subtitles {
        graph.push(
            FilterChain::new()
                .input(current)
                .filter(format!(
                    "subtitles='{}':fontsdir='{}':force_style='{SUBTITLE_STYLE}'",
                    escape_filter_value(srt),
                    escape_filter_value(&job.fonts_dir)
                ))
                .output("withsubtitles"),
        );
        current = "withsubtitles".to_string();
    }

    if let Some(idx) = banner_idx {
        graph.push(
            FilterChain::new()
                .input(format!("{idx}:v"))
                .filter(format!("scale={CLIP_WIDTH}:-1"))
                .output("banner"),
        );
        graph.push(
            FilterChain::new()
                .inputs([current, "banner".to_string()])
                .filter("overlay=x=0:y=0:shortest=1")
                .output("final"),
        );
        current = "final".to_string();
    }

    cmd.set_filter_graph(graph);
    let cmd = cmd
        .map(&current)
        .video_codec("libx264")
        .preset("medium")
        .crf(23)
        .pix_fmt("yuv420p");

    Ok(match audio_idx {
        Some(idx) => cmd.map(format!("{idx}:a")).audio_codec("aac").audio_bitrate("192k"),
        None => cmd.no_audio(),
    })
}
