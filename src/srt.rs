use crate::subtitle::Cue;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const UTF8_BOM: &str = "\u{feff}";

/// `HH:MM:SS,mmm`, rounded to the nearest millisecond. Negative input clamps to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hh = total_secs / 3600;
    let mm = (total_secs % 3600) / 60;
    let ss = total_secs % 60;
    format!("{hh:02}:{mm:02}:{ss:02},{ms:03}")
}

/// Parse `HH:MM:SS,mmm` (a `.` before the milliseconds is accepted too).
pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let ts = ts.trim();
    let (clock, millis) = ts.split_once([',', '.']).unwrap_or((ts, "0"));
    let mut parts = clock.split(':');
    let hh: u64 = parts.next()?.trim().parse().ok()?;
    let mm: u64 = parts.next()?.trim().parse().ok()?;
    let ss: u64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: u64 = millis.trim().parse().ok()?;
    Some((hh * 3600 + mm * 60 + ss) as f64 + ms as f64 / 1000.0)
}

pub fn render(cues: &[Cue]) -> String {
    let mut out = String::new();
    for cue in cues {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }
    out
}

/// Parse SRT text back into cues. Blocks without a valid timing line are skipped.
pub fn parse(input: &str) -> Vec<Cue> {
    let input = input.trim_start_matches(UTF8_BOM).replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in input.split("\n\n") {
        let mut lines = block.lines().map(str::trim_end).skip_while(|l| l.trim().is_empty());
        let Some(first) = lines.next() else {
            continue;
        };

        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) => line,
                None => continue,
            }
        };

        let Some((a, b)) = timing.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_timestamp(a), parse_timestamp(b)) else {
            continue;
        };

        let text = lines.collect::<Vec<_>>().join("\n");
        cues.push(Cue {
            index: cues.len() + 1,
            start,
            end,
            text,
        });
    }

    cues
}

/// Write cues as SRT with a leading UTF-8 BOM.
pub async fn write_srt(path: &Path, cues: &[Cue]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    let mut out = fs::File::create(path)
        .await
        .with_context(|| format!("create srt: {}", path.display()))?;
    out.write_all(UTF8_BOM.as_bytes()).await?;
    out.write_all(render(cues).as_bytes()).await?;
    out.flush().await.ok();
    Ok(())
}

pub async fn read_srt(path: &Path) -> Result<Vec<Cue>> {
    let input = fs::read_to_string(path)
        .await
        .with_context(|| format!("read srt: {}", path.display()))?;
    Ok(parse(&input))
}
