//! JPEG decode/encode using TurboJPEG
//!
//! Note: turbojpeg handles are not thread-safe; each capture handle and each
//! session worker owns its own codec.

use bytes::Bytes;
use image::RgbImage;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp};

use crate::error::{AppError, Result};

/// MJPEG frame decoder (JPEG -> RGB24)
pub struct JpegDecoder {
    decompressor: Decompressor,
}

impl JpegDecoder {
    pub fn new() -> Result<Self> {
        let decompressor = Decompressor::new().map_err(|e| {
            AppError::VideoError(format!("Failed to create turbojpeg decoder: {}", e))
        })?;
        Ok(Self { decompressor })
    }

    pub fn decode(&mut self, jpeg: &[u8]) -> Result<RgbImage> {
        let header = self
            .decompressor
            .read_header(jpeg)
            .map_err(|e| AppError::VideoError(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        let mut image = Image {
            pixels: vec![0u8; header.height * pitch],
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(jpeg, image.as_deref_mut())
            .map_err(|e| AppError::VideoError(format!("turbojpeg decode failed: {}", e)))?;

        RgbImage::from_raw(header.width as u32, header.height as u32, image.pixels)
            .ok_or_else(|| AppError::VideoError("Decoded buffer size mismatch".to_string()))
    }
}

/// Display frame encoder (RGB24 -> JPEG) for the relay
pub struct JpegEncoder {
    compressor: Compressor,
}

impl JpegEncoder {
    pub fn new(quality: u32) -> Result<Self> {
        let mut compressor = Compressor::new().map_err(|e| {
            AppError::VideoError(format!("Failed to create turbojpeg compressor: {}", e))
        })?;
        compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(Subsamp::Sub2x2)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG subsampling: {}", e)))?;
        Ok(Self { compressor })
    }

    pub fn encode(&mut self, frame: &RgbImage) -> Result<Bytes> {
        let width = frame.width() as usize;
        let image = Image {
            pixels: frame.as_raw().as_slice(),
            width,
            pitch: width * 3,
            height: frame.height() as usize,
            format: TJPixelFormat::RGB,
        };

        let data = self
            .compressor
            .compress_to_vec(image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(data))
    }
}

/// Check JPEG start/end markers
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_decode_preserves_size() {
        let mut frame = RgbImage::new(64, 48);
        for (x, _, px) in frame.enumerate_pixels_mut() {
            *px = image::Rgb([(x * 4) as u8, 128, 32]);
        }

        let jpeg = JpegEncoder::new(80).unwrap().encode(&frame).unwrap();
        assert!(is_valid_jpeg(&jpeg));

        let decoded = JpegDecoder::new().unwrap().decode(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_is_valid_jpeg_rejects_truncated() {
        assert!(!is_valid_jpeg(&[0xFF, 0xD8, 0x00]));
        assert!(!is_valid_jpeg(&[0x00, 0x00, 0xFF, 0xD9]));
    }
}
