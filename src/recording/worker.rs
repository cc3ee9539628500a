//! Capture -> detect -> annotate -> encode -> publish loop
//!
//! Runs on a blocking thread for the lifetime of one session. The loop
//! checks the cancellation token once per iteration and always finishes
//! the sink and releases the capture handle before returning.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{SessionState, StopReason};
use crate::broadcast::{status_text, BroadcastController, BroadcastState};
use crate::config::AppConfig;
use crate::detection::DetectionStage;
use crate::error::{AppError, Result};
use crate::stream::FrameRelay;
use crate::utils::LogThrottler;
use crate::video::{
    sink::{recording_file_name, unique_path}, Annotator, CaptureHandle, FpsMeter, FrameSourceAdapter,
    JpegEncoder, SinkFactory, SinkSummary, VideoSink,
};
use crate::warn_throttled;

/// Loop parameters taken from the configuration
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub fps: u32,
    pub open_attempts: u32,
    pub open_retry_delay: Duration,
    pub max_consecutive_failures: u32,
    pub jpeg_quality: u32,
    pub stream_label: String,
    pub recording_dir: PathBuf,
    pub file_pattern: String,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fps: config.camera.fps.max(1),
            open_attempts: config.camera.open_attempts.max(1),
            open_retry_delay: Duration::from_secs(1),
            max_consecutive_failures: config.camera.max_consecutive_failures.max(1),
            jpeg_quality: config.annotation.jpeg_quality,
            stream_label: config.annotation.stream_label.clone(),
            recording_dir: PathBuf::from(&config.recording.directory),
            file_pattern: config.recording.file_pattern.clone(),
        }
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    pub fn next_recording_path(&self) -> PathBuf {
        unique_path(
            &self
                .recording_dir
                .join(recording_file_name(&self.file_pattern, chrono::Local::now())),
        )
    }
}

/// Everything a session needs, shared across sessions
pub struct SessionResources {
    pub adapter: FrameSourceAdapter,
    pub sink_factory: Arc<dyn SinkFactory>,
    pub detection: Mutex<DetectionStage>,
    pub annotator: Annotator,
    pub relay: Arc<FrameRelay>,
    pub settings: WorkerSettings,
}

/// How the worker reports progress to the controller
pub trait WorkerObserver: Send + Sync {
    fn state_changed(&self, state: SessionState);
    fn frame_written(&self, frames: u64);
}

/// What the loop produced
#[derive(Debug)]
pub struct WorkerOutcome {
    pub reason: StopReason,
    /// None when the sink never opened or could not be finished
    pub summary: Option<SinkSummary>,
    pub error: Option<AppError>,
    pub ended_at: DateTime<Utc>,
}

impl WorkerOutcome {
    fn failed(reason: StopReason, error: AppError) -> Self {
        Self {
            reason,
            summary: None,
            error: Some(error),
            ended_at: Utc::now(),
        }
    }
}

/// Sleep on the blocking thread, waking early on cancellation
///
/// Returns false when cancelled.
fn pause(runtime: &Handle, cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    runtime.block_on(async {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    })
}

fn open_source(
    resources: &SessionResources,
    runtime: &Handle,
    cancel: &CancellationToken,
) -> Result<CaptureHandle> {
    let attempts = resources.settings.open_attempts;
    let mut last_error = None;
    for attempt in 1..=attempts {
        match resources.adapter.open() {
            Ok(handle) => return Ok(handle),
            Err(e) => {
                warn!("Capture open attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = Some(e);
            }
        }
        if attempt < attempts && !pause(runtime, cancel, resources.settings.open_retry_delay) {
            return Err(AppError::Cancelled("capture open".into()));
        }
    }
    Err(last_error.unwrap_or_else(|| AppError::NoDeviceAvailable("no attempts".into())))
}

/// Run one session to completion
pub fn run_session(
    resources: Arc<SessionResources>,
    path: PathBuf,
    broadcast: Option<Arc<BroadcastController>>,
    observer: Arc<dyn WorkerObserver>,
    cancel: CancellationToken,
    runtime: Handle,
) -> WorkerOutcome {
    let settings = &resources.settings;

    // OPENING
    let mut capture = match open_source(&resources, &runtime, &cancel) {
        Ok(capture) => capture,
        Err(e) => {
            error!("Recording not started, no capture source: {}", e);
            return WorkerOutcome::failed(StopReason::OpenFailed, e);
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            capture.release();
            return WorkerOutcome::failed(StopReason::OpenFailed, e.into());
        }
    }
    let resolution = resources.adapter.resolution();
    let mut sink = match resources.sink_factory.create(&path, resolution, settings.fps) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Recording not started, cannot open {}: {}", path.display(), e);
            capture.release();
            return WorkerOutcome::failed(StopReason::OpenFailed, e);
        }
    };

    let mut encoder = match JpegEncoder::new(settings.jpeg_quality) {
        Ok(encoder) => Some(encoder),
        Err(e) => {
            warn!("Relay disabled for this session: {}", e);
            None
        }
    };

    // ACTIVE
    observer.state_changed(SessionState::Active);
    info!("Recording to {} from {}", path.display(), capture.name());

    let mut detection = resources.detection.lock();
    detection.reset();

    let period = settings.frame_period();
    let throttler = LogThrottler::with_secs(5);
    let mut fps_meter = FpsMeter::new();
    let mut failures = 0u32;
    let mut frames = 0u64;
    let mut sink_error = None;

    let reason = loop {
        if cancel.is_cancelled() {
            break StopReason::Cleared;
        }
        let iteration_start = Instant::now();

        let frame = match capture.read() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                warn_throttled!(
                    throttler,
                    "capture_read",
                    "Capture read failed ({}/{}): {}",
                    failures,
                    settings.max_consecutive_failures,
                    e
                );
                if e.is_device_lost() || failures >= settings.max_consecutive_failures {
                    error!("Capture source lost: {}", e);
                    break StopReason::DeviceLost;
                }
                continue;
            }
        };

        let detections = detection.process(&frame.image).clone();
        let state = broadcast
            .as_ref()
            .map(|b| b.state())
            .unwrap_or(BroadcastState::Idle);
        let display = resources.annotator.annotate(
            &frame.image,
            &detections,
            detection.face_inset(),
            &status_text(state, &settings.stream_label),
            fps_meter.tick(),
        );

        if let Err(e) = sink.write_frame(&display) {
            error!("Failed to write frame to {}: {}", path.display(), e);
            sink_error = Some(e);
            break StopReason::SinkFailed;
        }
        frames += 1;
        observer.frame_written(frames);

        if let Some(encoder) = encoder.as_mut() {
            match encoder.encode(&display) {
                Ok(jpeg) => {
                    resources.relay.publish(jpeg);
                }
                Err(e) => warn_throttled!(throttler, "relay_encode", "Relay encode failed: {}", e),
            }
        }

        let elapsed = iteration_start.elapsed();
        if elapsed < period && !pause(&runtime, &cancel, period - elapsed) {
            break StopReason::Cleared;
        }
    };
    drop(detection);

    // CLOSING
    observer.state_changed(SessionState::Closing);
    debug!("Closing session ({:?}, {} frames)", reason, frames);
    let summary = match sink.finish() {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!("Failed to finalize {}: {}", path.display(), e);
            sink_error.get_or_insert(e);
            None
        }
    };
    capture.release();

    WorkerOutcome {
        reason,
        summary,
        error: sink_error,
        ended_at: Utc::now(),
    }
}
