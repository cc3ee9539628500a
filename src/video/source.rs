//! Frame source adapter
//!
//! Hides the difference between a local V4L2 device and a network MJPEG
//! camera behind one open/read/release interface. Opening walks the
//! configured candidates in order and falls back to the network camera
//! once every local index failed.

use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::frame::{Frame, Resolution};
use super::network_source::NetworkSource;
use super::v4l_source::V4lSource;
use crate::config::CameraConfig;
use crate::error::{AppError, Result};

/// One place a frame can come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCandidate {
    /// Local capture device by index (`/dev/video<N>`)
    Local(u32),
    /// Network MJPEG camera
    Network {
        url: String,
        username: Option<String>,
        password: Option<String>,
    },
}

impl fmt::Display for SourceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(index) => write!(f, "/dev/video{}", index),
            Self::Network { url, .. } => write!(f, "{}", url),
        }
    }
}

/// An opened source producing decoded frames
///
/// Releasing the source is dropping it.
pub trait FrameSource: Send {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<RgbImage>;
}

/// Opens a single candidate
pub trait SourceFactory: Send + Sync {
    fn open(&self, candidate: &SourceCandidate) -> Result<Box<dyn FrameSource>>;
}

/// Production factory: V4L2 for local indices, HTTP MJPEG for network URLs
pub struct DeviceSourceFactory {
    resolution: Resolution,
    fps: u32,
    read_timeout: Duration,
}

impl DeviceSourceFactory {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            resolution: Resolution::new(config.width, config.height),
            fps: config.fps,
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        }
    }
}

impl SourceFactory for DeviceSourceFactory {
    fn open(&self, candidate: &SourceCandidate) -> Result<Box<dyn FrameSource>> {
        match candidate {
            SourceCandidate::Local(index) => Ok(Box::new(V4lSource::open(
                *index,
                self.resolution,
                self.fps,
                self.read_timeout,
            )?)),
            SourceCandidate::Network {
                url,
                username,
                password,
            } => Ok(Box::new(NetworkSource::open(
                url,
                username.as_deref(),
                password.as_deref(),
                self.read_timeout,
            )?)),
        }
    }
}

/// Applies the source preference policy
pub struct FrameSourceAdapter {
    factory: Arc<dyn SourceFactory>,
    candidates: Vec<SourceCandidate>,
    resolution: Resolution,
}

impl FrameSourceAdapter {
    pub fn new(factory: Arc<dyn SourceFactory>, config: &CameraConfig) -> Self {
        Self {
            factory,
            candidates: preference_order(config),
            resolution: Resolution::new(config.width, config.height),
        }
    }

    pub fn with_candidates(
        factory: Arc<dyn SourceFactory>,
        candidates: Vec<SourceCandidate>,
        resolution: Resolution,
    ) -> Self {
        Self {
            factory,
            candidates,
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn candidates(&self) -> &[SourceCandidate] {
        &self.candidates
    }

    /// Try every candidate in order; fails with `NoDeviceAvailable` when none opens
    pub fn open(&self) -> Result<CaptureHandle> {
        let mut failures = Vec::new();

        for candidate in &self.candidates {
            match self.factory.open(candidate) {
                Ok(source) => {
                    info!("Opened capture source {}", source.name());
                    return Ok(CaptureHandle {
                        source,
                        resolution: self.resolution,
                        sequence: 0,
                    });
                }
                Err(e) => {
                    debug!("Capture source {} unavailable: {}", candidate, e);
                    failures.push(format!("{}: {}", candidate, e));
                }
            }
        }

        if failures.is_empty() {
            warn!("No capture sources configured");
            return Err(AppError::NoDeviceAvailable(
                "no capture sources configured".to_string(),
            ));
        }
        Err(AppError::NoDeviceAvailable(failures.join("; ")))
    }
}

/// Local indices first, then the network camera
pub fn preference_order(config: &CameraConfig) -> Vec<SourceCandidate> {
    let mut candidates: Vec<SourceCandidate> = config
        .device_indices
        .iter()
        .copied()
        .map(SourceCandidate::Local)
        .collect();

    if let Some(url) = config.network_url.as_ref().filter(|u| !u.trim().is_empty()) {
        candidates.push(SourceCandidate::Network {
            url: url.clone(),
            username: config.network_username.clone(),
            password: config.network_password.clone(),
        });
    }
    candidates
}

/// An open capture source
pub struct CaptureHandle {
    source: Box<dyn FrameSource>,
    resolution: Resolution,
    sequence: u64,
}

impl CaptureHandle {
    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Read one frame, normalized to the configured resolution
    pub fn read(&mut self) -> Result<Frame> {
        let image = self.source.read_frame()?;
        self.sequence += 1;
        Ok(Frame::normalized(image, self.resolution, self.sequence))
    }

    pub fn release(self) {
        let name = self.source.name();
        drop(self.source);
        debug!("Released capture source {}", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StaticSource(String);

    impl FrameSource for StaticSource {
        fn name(&self) -> String {
            self.0.clone()
        }

        fn read_frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::new(320, 240))
        }
    }

    /// Opens only the listed candidates and records every attempt
    struct SelectiveFactory {
        available: Vec<SourceCandidate>,
        attempts: Mutex<Vec<SourceCandidate>>,
    }

    impl SourceFactory for SelectiveFactory {
        fn open(&self, candidate: &SourceCandidate) -> Result<Box<dyn FrameSource>> {
            self.attempts.lock().push(candidate.clone());
            if self.available.contains(candidate) {
                Ok(Box::new(StaticSource(candidate.to_string())))
            } else {
                Err(AppError::VideoError("not present".to_string()))
            }
        }
    }

    fn camera_config() -> CameraConfig {
        CameraConfig {
            device_indices: vec![0, 1, 2],
            network_url: Some("http://192.168.0.10:8080/video".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_falls_back_to_network_camera() {
        let network = SourceCandidate::Network {
            url: "http://192.168.0.10:8080/video".to_string(),
            username: None,
            password: None,
        };
        let factory = Arc::new(SelectiveFactory {
            available: vec![network.clone()],
            attempts: Mutex::new(Vec::new()),
        });
        let adapter = FrameSourceAdapter::new(factory.clone(), &camera_config());

        let mut handle = adapter.open().unwrap();
        assert_eq!(handle.name(), "http://192.168.0.10:8080/video");
        assert_eq!(factory.attempts.lock().len(), 4);

        let frame = handle.read().unwrap();
        assert_eq!(frame.resolution(), Resolution::HD720);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn test_prefers_lowest_local_index() {
        let factory = Arc::new(SelectiveFactory {
            available: vec![SourceCandidate::Local(1), SourceCandidate::Local(2)],
            attempts: Mutex::new(Vec::new()),
        });
        let adapter = FrameSourceAdapter::new(factory.clone(), &camera_config());

        let handle = adapter.open().unwrap();
        assert_eq!(handle.name(), "/dev/video1");
        assert_eq!(
            *factory.attempts.lock(),
            vec![SourceCandidate::Local(0), SourceCandidate::Local(1)]
        );
    }

    #[test]
    fn test_no_device_available() {
        let factory = Arc::new(SelectiveFactory {
            available: Vec::new(),
            attempts: Mutex::new(Vec::new()),
        });
        let adapter = FrameSourceAdapter::new(factory, &camera_config());

        match adapter.open() {
            Err(AppError::NoDeviceAvailable(reason)) => {
                assert!(reason.contains("/dev/video0"));
                assert!(reason.contains("192.168.0.10"));
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.name())),
        }
    }
}
