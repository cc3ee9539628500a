//! Network camera source (MJPEG over HTTP)
//!
//! Phone "IP webcam" apps and most IP cameras serve
//! `multipart/x-mixed-replace` JPEG streams. Frames are cut out of the byte
//! stream by their SOI/EOI markers, so the part headers are never parsed.

use image::RgbImage;
use std::io::{self, Read};
use std::time::Duration;
use tracing::{info, warn};

use super::jpeg::JpegDecoder;
use super::source::FrameSource;
use crate::error::{AppError, Result};

const READ_CHUNK: usize = 16 * 1024;
/// Give up on a stream that yields this much data without a complete JPEG
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Splits a byte stream into JPEG images
pub struct MjpegFrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> MjpegFrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK * 4),
        }
    }

    /// Next complete JPEG in the stream
    pub fn next_jpeg(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if let Some(start) = find_marker(&self.buffer, 0, [0xFF, 0xD8]) {
                if let Some(end) = find_marker(&self.buffer, start + 2, [0xFF, 0xD9]) {
                    let jpeg = self.buffer[start..end + 2].to_vec();
                    self.buffer.drain(..end + 2);
                    return Ok(jpeg);
                }
                if start > 0 {
                    self.buffer.drain(..start);
                }
            } else if self.buffer.len() > 1 {
                // Keep a trailing 0xFF that may start the next marker
                let keep_from = self.buffer.len() - 1;
                self.buffer.drain(..keep_from);
            }

            if self.buffer.len() > MAX_FRAME_BYTES {
                self.buffer.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "no complete JPEG frame in stream",
                ));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "camera stream closed",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find_marker(data: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    if data.len() < 2 || from >= data.len() - 1 {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

pub struct NetworkSource {
    url: String,
    frames: MjpegFrameReader<reqwest::blocking::Response>,
    decoder: JpegDecoder,
}

impl NetworkSource {
    /// Connect to the camera stream
    ///
    /// Uses the blocking client; only call from a blocking thread. The
    /// blocking client applies `read_timeout` to every body read, so a camera
    /// that stops sending surfaces as a capture error instead of a hang.
    pub fn open(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(read_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| AppError::VideoError(format!("Failed to build HTTP client: {}", e)))?;

        let mut request = client.get(url);
        if let Some(user) = username {
            request = request.basic_auth(user, password);
        }

        let response = request.send().map_err(|e| AppError::Capture {
            source_name: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(AppError::Capture {
                source_name: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        info!("Connected to network camera {}", url);
        Ok(Self {
            url: url.to_string(),
            frames: MjpegFrameReader::new(response),
            decoder: JpegDecoder::new()?,
        })
    }
}

impl FrameSource for NetworkSource {
    fn name(&self) -> String {
        self.url.clone()
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        let jpeg = self.frames.next_jpeg().map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                AppError::VideoDeviceLost {
                    device: self.url.clone(),
                    reason: e.to_string(),
                }
            } else {
                AppError::Capture {
                    source_name: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        self.decoder.decode(&jpeg)
    }
}

/// Log whether the network camera answers its status endpoint
///
/// IP webcam apps expose `status.json` next to the video path.
pub async fn probe_camera_status(
    video_url: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> bool {
    let status_url = match video_url.rfind('/') {
        Some(pos) if pos > "http://".len() => format!("{}/status.json", &video_url[..pos]),
        _ => format!("{}/status.json", video_url.trim_end_matches('/')),
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to build HTTP client: {}", e);
            return false;
        }
    };

    let mut request = client.get(&status_url);
    if let Some(user) = username {
        request = request.basic_auth(user, password);
    }

    match request.send().await {
        Ok(resp) if resp.status().is_success() => {
            info!("Network camera reachable at {}", status_url);
            true
        }
        Ok(resp) => {
            warn!("Network camera status {} returned HTTP {}", status_url, resp.status());
            false
        }
        Err(e) => {
            warn!("Network camera unreachable at {}: {}", status_url, e);
            false
        }
    }
}
