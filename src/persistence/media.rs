//! Recorded file inspection and normalization via ffprobe/ffmpeg

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// What ffprobe reports about a recording
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeInfo {
    /// Codec of the first video stream
    pub codec: Option<String>,
    /// Decoded frame count of the first video stream
    pub frames: u64,
    pub container: Option<String>,
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo>;
    /// Re-encode `input` into an upload-compatible `output`
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-count_frames",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name,nb_read_frames:format=format_name",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::Validation(format!(
                "ffprobe rejected {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        info!("Transcoding {} -> {}", input.display(), output.display());
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args([
                "-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-movflags", "+faststart",
            ])
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Transcode(format!("Failed to run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
            return Err(AppError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        debug!("Transcode finished: {}", output.display());
        Ok(())
    }
}

#[derive(Deserialize)]
struct ProbeJson {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    nb_read_frames: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
}

/// Parse `ffprobe -of json` output
pub fn parse_probe_output(json: &str) -> Result<ProbeInfo> {
    let parsed: ProbeJson = serde_json::from_str(json)
        .map_err(|e| AppError::Validation(format!("Unreadable ffprobe output: {}", e)))?;

    let stream = parsed.streams.into_iter().next();
    let (codec, frames) = match stream {
        Some(stream) => (
            stream.codec_name,
            stream
                .nb_read_frames
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0),
        ),
        None => (None, 0),
    };

    Ok(ProbeInfo {
        codec,
        frames,
        container: parsed.format.and_then(|f| f.format_name),
    })
}

/// Path of the transcoded sibling of `path`
pub fn converted_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    path.with_file_name(format!("{}.converted.mp4", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "programs": [],
            "streams": [{ "codec_name": "mpeg4", "nb_read_frames": "3" }],
            "format": { "format_name": "matroska,webm" }
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.codec.as_deref(), Some("mpeg4"));
        assert_eq!(info.frames, 3);
        assert_eq!(info.container.as_deref(), Some("matroska,webm"));
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let info = parse_probe_output(r#"{"streams": [], "format": {}}"#).unwrap();
        assert_eq!(info.frames, 0);
        assert!(info.codec.is_none());
        assert!(parse_probe_output("not json").is_err());
    }

    #[test]
    fn test_converted_path() {
        assert_eq!(
            converted_path(Path::new("/rec/recording_20240101_120000.mkv")),
            PathBuf::from("/rec/recording_20240101_120000.converted.mp4")
        );
    }
}
