//! Video frame data structures

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Frame resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD720: Resolution = Resolution::new(1280, 720);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A captured frame, already normalized to the session resolution
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Sequence number within the capture handle
    pub sequence: u64,
    /// Timestamp when frame was read
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap a decoded image, resizing it when it does not match `target`
    pub fn normalized(image: RgbImage, target: Resolution, sequence: u64) -> Self {
        let image = if image.width() != target.width || image.height() != target.height {
            imageops::resize(
                &image,
                target.width,
                target.height,
                imageops::FilterType::Triangle,
            )
        } else {
            image
        };

        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resizes_to_target() {
        let frame = Frame::normalized(RgbImage::new(640, 480), Resolution::HD720, 1);
        assert_eq!(frame.resolution(), Resolution::HD720);
    }

    #[test]
    fn test_normalize_keeps_matching_frame() {
        let mut image = RgbImage::new(1280, 720);
        image.put_pixel(3, 4, image::Rgb([9, 8, 7]));
        let frame = Frame::normalized(image, Resolution::HD720, 2);
        assert_eq!(frame.image.get_pixel(3, 4).0, [9, 8, 7]);
        assert_eq!(frame.sequence, 2);
    }
}
