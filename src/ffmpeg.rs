//! Typed ffmpeg command building, execution and ffprobe duration lookup.

use crate::clip_plan::DurationProbe;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Stderr kept in errors is cut to this many trailing bytes.
const STDERR_TAIL: usize = 2000;
const LOG_LEVEL: &str = "error";
/// Probed durations at or below this are treated as broken media.
pub const MIN_MEDIA_SECONDS: f64 = 0.1;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found or not executable")]
    BinaryNotFound(String),

    #[error("ffmpeg failed (exit {exit_code:?}): {stderr}")]
    FfmpegFailed {
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("ffprobe failed for {path}: {stderr}")]
    FfprobeFailed { path: PathBuf, stderr: String },

    #[error("invalid duration {value:?} for {path}")]
    InvalidDuration { path: PathBuf, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Make a path safe inside a quoted filter argument such as `subtitles='...'`.
pub fn escape_filter_value(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    path: PathBuf,
    options: Vec<String>,
}

impl Input {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, arg: impl Into<String>) -> Self {
        self.options.push(arg.into());
        self
    }

    pub fn seek(self, seconds: f64) -> Self {
        self.option("-ss").option(secs(seconds))
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.option("-t").option(secs(seconds))
    }

    /// Repeat a still image as a video stream.
    pub fn loop_image(self) -> Self {
        self.option("-loop").option("1")
    }

    /// Loop a video input forever.
    pub fn stream_loop(self) -> Self {
        self.option("-stream_loop").option("-1")
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.extend(self.options.iter().cloned());
        args.push("-i".to_string());
        args.push(self.path.to_string_lossy().into_owned());
    }
}

/// `[in1][in2]filter,filter[out]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    inputs: Vec<String>,
    filters: Vec<String>,
    outputs: Vec<String>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.inputs.push(label.into());
        self
    }

    pub fn inputs<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(label.into());
        self
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.inputs {
            write!(f, "[{label}]")?;
        }
        write!(f, "{}", self.filters.join(","))?;
        for label in &self.outputs {
            write!(f, "[{label}]")?;
        }
        Ok(())
    }
}

/// Semicolon-joined filter chains for `-filter_complex`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(mut self, chain: FilterChain) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{chain}")?;
        }
        Ok(())
    }
}

/// Builder for a single ffmpeg invocation with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    graph: Option<FilterGraph>,
    output_args: Vec<String>,
    output: PathBuf,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            graph: None,
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
        }
    }

    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add an input and return its stream index.
    pub fn add_input(&mut self, input: Input) -> usize {
        self.inputs.push(input);
        self.inputs.len() - 1
    }

    pub fn filter_graph(mut self, graph: FilterGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn set_filter_graph(&mut self, graph: FilterGraph) {
        self.graph = Some(graph);
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `-map [label]` for a filter output, or a raw stream spec like `2:a`.
    pub fn map(self, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        let spec = if target.contains(':') || target.starts_with('[') {
            target.to_string()
        } else {
            format!("[{target}]")
        };
        self.output_arg("-map").output_arg(spec)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn pix_fmt(self, fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(fmt)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn limit_duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(secs(seconds))
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            LOG_LEVEL.to_string(),
        ];

        for input in &self.inputs {
            input.push_args(&mut args);
        }

        if let Some(graph) = self.graph.as_ref().filter(|g| !g.is_empty()) {
            args.push("-filter_complex".to_string());
            args.push(graph.to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Parse ffprobe's `format=duration` output.
pub fn parse_probe_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > MIN_MEDIA_SECONDS)
}

/// Locations of the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// True when `ffmpeg -version` runs successfully.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> Result<(), MediaError> {
        let args = cmd.build_args();
        debug!(command = %format!("{} {}", self.ffmpeg.display(), args.join(" ")), "running ffmpeg");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::BinaryNotFound(self.ffmpeg.display().to_string())
                }
                _ => MediaError::Io(err),
            })?;

        if !output.status.success() {
            return Err(MediaError::FfmpegFailed {
                stderr: stderr_tail(&output.stderr),
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }

    pub async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::BinaryNotFound(self.ffprobe.display().to_string())
                }
                _ => MediaError::Io(err),
            })?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                path: path.to_path_buf(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_duration(&stdout).ok_or_else(|| MediaError::InvalidDuration {
            path: path.to_path_buf(),
            value: stdout.trim().to_string(),
        })
    }
}

#[async_trait]
impl DurationProbe for Ffmpeg {
    async fn duration(&self, path: &Path) -> Result<f64> {
        Ok(self.probe_duration(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_graph_renders_labels() {
        let graph = FilterGraph::new()
            .chain(FilterChain::new().input("0:a").filter("volume=1.7").filter("atempo=1.1").output("tts"))
            .chain(FilterChain::new().inputs(["bg", "tts"]).filter("amix=inputs=2").output("mixed"));
        assert_eq!(
            graph.to_string(),
            "[0:a]volume=1.7,atempo=1.1[tts];[bg][tts]amix=inputs=2[mixed]"
        );
    }

    #[test]
    fn command_orders_inputs_graph_and_output() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input(Input::new("a.mp4").seek(1.5).duration(2.0))
            .input(Input::new("bg.png").loop_image())
            .filter_graph(FilterGraph::new().chain(FilterChain::new().input("0:v").filter("fps=30").output("v")))
            .map("v")
            .map("1:a")
            .no_audio();

        assert_eq!(
            cmd.build_args(),
            vec![
                "-y", "-hide_banner", "-loglevel", "error",
                "-ss", "1.500", "-t", "2.000", "-i", "a.mp4",
                "-loop", "1", "-i", "bg.png",
                "-filter_complex", "[0:v]fps=30[v]",
                "-map", "[v]", "-map", "1:a", "-an",
                "out.mp4",
            ]
        );
    }

    #[test]
    fn escaping_for_filter_arguments() {
        assert_eq!(
            escape_filter_value(Path::new("C:\\jobs\\it's\\subs.srt")),
            "C\\:/jobs/it'\\''s/subs.srt"
        );
        assert_eq!(escape_filter_value(Path::new("/tmp/a.srt")), "/tmp/a.srt");
    }

    #[test]
    fn probe_output_parsing() {
        assert_eq!(parse_probe_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_probe_duration("0.05"), None);
        assert_eq!(parse_probe_duration("N/A"), None);
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let noise = "x".repeat(5000) + "final error";
        let tail = stderr_tail(noise.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL);
        assert!(tail.ends_with("final error"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let ffmpeg = Ffmpeg::new("/nonexistent/ffmpeg-bin", "/nonexistent/ffprobe-bin");
        assert!(!ffmpeg.is_available().await);
        let err = ffmpeg.probe_duration(Path::new("x.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::BinaryNotFound(_)));
    }
}
