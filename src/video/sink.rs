//! Video sink: appends display frames to the session's recording file
//!
//! The production sink pipes raw RGB24 frames into an `ffmpeg` child that
//! writes MPEG-4 Part 2 (XVID tag) into a Matroska container.

use image::RgbImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};

use super::frame::Resolution;
use crate::error::{AppError, Result};

/// What a finished sink produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub frames_written: u64,
}

pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<SinkSummary>;
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path, resolution: Resolution, fps: u32) -> Result<Box<dyn VideoSink>>;
}

pub struct FfmpegSinkFactory {
    ffmpeg_path: String,
}

impl FfmpegSinkFactory {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn create(&self, path: &Path, resolution: Resolution, fps: u32) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegSink::spawn(
            &self.ffmpeg_path,
            path,
            resolution,
            fps,
        )?))
    }
}

pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    resolution: Resolution,
    frames_written: u64,
}

impl FfmpegSink {
    pub fn spawn(ffmpeg: &str, path: &Path, resolution: Resolution, fps: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let size = format!("{}x{}", resolution.width, resolution.height);
        let rate = fps.max(1).to_string();
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-n"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", size.as_str(), "-r", rate.as_str(), "-i", "-"])
            .args(["-c:v", "mpeg4", "-vtag", "XVID", "-q:v", "5"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AppError::VideoError(format!("Failed to start {}: {}", ffmpeg, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::VideoError("ffmpeg stdin not captured".to_string()))?;

        info!("Recording to {} ({} @ {} fps)", path.display(), size, rate);
        Ok(Self {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
            resolution,
            frames_written: 0,
        })
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.width() != self.resolution.width || frame.height() != self.resolution.height {
            return Err(AppError::VideoError(format!(
                "Frame {}x{} does not match sink {}",
                frame.width(),
                frame.height(),
                self.resolution
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::VideoError("Sink already closed".to_string()))?;
        stdin.write_all(frame.as_raw()).map_err(|e| {
            AppError::VideoError(format!("Failed to write frame to encoder: {}", e))
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<SinkSummary> {
        // Closing stdin lets ffmpeg write the trailer and exit
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            warn!("Encoder exited with {} for {}", status, self.path.display());
            return Err(AppError::VideoError(format!("ffmpeg exited with {}", status)));
        }

        debug!(
            "Finalized {} with {} frames",
            self.path.display(),
            self.frames_written
        );
        Ok(SinkSummary {
            path: self.path.clone(),
            frames_written: self.frames_written,
        })
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Dropped without finish(): make sure the encoder does not linger
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Recording file name for a session started at `started`
pub fn recording_file_name(pattern: &str, started: chrono::DateTime<chrono::Local>) -> String {
    started.format(pattern).to_string()
}

/// `path`, or the first free `<stem>_<n>.<ext>` sibling if it is taken
///
/// The file name pattern has one-second resolution, so back-to-back
/// sessions can map to the same name.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
