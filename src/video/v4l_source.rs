//! Local V4L2 capture source using memory-mapped buffers

use image::RgbImage;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::Resolution;
use super::jpeg::JpegDecoder;
use super::source::FrameSource;
use crate::error::{AppError, Result};

/// Number of mmap capture buffers
const BUFFER_COUNT: u32 = 4;
/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureFormat {
    Mjpeg,
    Yuyv,
}

pub struct V4lSource {
    path: String,
    format: CaptureFormat,
    resolution: Resolution,
    stream: MmapStream<'static>,
    decoder: JpegDecoder,
    _device: Device,
}

impl V4lSource {
    pub fn open(index: u32, resolution: Resolution, fps: u32, timeout: Duration) -> Result<Self> {
        let path = format!("/dev/video{}", index);
        debug!("Opening video device: {}", path);

        let device = Device::new(index as usize)
            .map_err(|e| AppError::VideoError(format!("Failed to open device {}: {}", path, e)))?;

        let mut fmt = device
            .format()
            .map_err(|e| AppError::VideoError(format!("Failed to get format: {}", e)))?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = FourCC::new(b"MJPG");

        let mut actual = device
            .set_format(&fmt)
            .map_err(|e| AppError::VideoError(format!("Failed to set format: {}", e)))?;

        // Fall back to raw YUYV for cameras without MJPEG
        if actual.fourcc != FourCC::new(b"MJPG") {
            fmt.fourcc = FourCC::new(b"YUYV");
            actual = device
                .set_format(&fmt)
                .map_err(|e| AppError::VideoError(format!("Failed to set format: {}", e)))?;
        }

        let format = if actual.fourcc == FourCC::new(b"MJPG") {
            CaptureFormat::Mjpeg
        } else if actual.fourcc == FourCC::new(b"YUYV") {
            CaptureFormat::Yuyv
        } else {
            return Err(AppError::VideoError(format!(
                "{} offers unsupported pixel format {}",
                path, actual.fourcc
            )));
        };

        if actual.width != resolution.width || actual.height != resolution.height {
            warn!(
                "Requested {}, got {}x{} on {}",
                resolution, actual.width, actual.height, path
            );
        }

        if fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
                debug!("Failed to set {} fps on {}: {}", fps, path, e);
            }
        }

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| AppError::VideoError(format!("Failed to map buffers on {}: {}", path, e)))?;
        stream.set_timeout(timeout);

        info!(
            "Capture format: {}x{} {:?} on {}",
            actual.width, actual.height, format, path
        );

        Ok(Self {
            path,
            format,
            resolution: Resolution::new(actual.width, actual.height),
            stream,
            decoder: JpegDecoder::new()?,
            _device: device,
        })
    }
}

impl FrameSource for V4lSource {
    fn name(&self) -> String {
        self.path.clone()
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        let (buf, meta) = self.stream.next().map_err(|e| classify_read_error(&self.path, e))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            return Err(AppError::Capture {
                source_name: self.path.clone(),
                reason: format!("short frame ({} bytes)", used),
            });
        }

        let data = &buf[..used];
        match self.format {
            CaptureFormat::Mjpeg => self.decoder.decode(data),
            CaptureFormat::Yuyv => yuyv_to_rgb(data, self.resolution),
        }
    }
}

/// Map errno values that mean the device went away to `VideoDeviceLost`
fn classify_read_error(path: &str, e: io::Error) -> AppError {
    let is_device_lost = match e.raw_os_error() {
        Some(6) => true,   // ENXIO - No such device or address
        Some(19) => true,  // ENODEV - No such device
        Some(5) => true,   // EIO - I/O error (device removed)
        Some(32) => true,  // EPIPE - Broken pipe
        Some(108) => true, // ESHUTDOWN - Transport endpoint shutdown
        _ => false,
    };

    if is_device_lost {
        AppError::VideoDeviceLost {
            device: path.to_string(),
            reason: e.to_string(),
        }
    } else {
        AppError::Capture {
            source_name: path.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601, limited range)
fn yuyv_to_rgb(data: &[u8], resolution: Resolution) -> Result<RgbImage> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let expected = width * height * 2;
    if data.len() < expected {
        return Err(AppError::VideoError(format!(
            "YUYV data too small: {} < {}",
            data.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32 - 16.0;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            rgb.push((1.164 * c + 1.596 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c - 0.392 * d - 0.813 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c + 2.017 * d).clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(resolution.width, resolution.height, rgb)
        .ok_or_else(|| AppError::VideoError("YUYV conversion size mismatch".to_string()))
}
