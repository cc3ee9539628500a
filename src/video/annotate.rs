//! Overlay rendering for display frames
//!
//! Draws person boxes, the face close-up, a translucent status banner and an
//! FPS readout onto a copy of the captured frame.

use ab_glyph::{FontArc, PxScale};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{AnnotationConfig, DetectionConfig};
use crate::detection::DetectionResult;

const PERSON_COLOR: Rgb<u8> = Rgb([134, 0, 61]);
const FACE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FPS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

pub struct Annotator {
    font: Option<FontArc>,
    banner_height: u32,
    banner_alpha: f32,
    inset_x: u32,
    inset_y: u32,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig, detection: &DetectionConfig) -> Self {
        let font = config.font_path.as_deref().and_then(|path| {
            match std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()))
            {
                Ok(font) => {
                    info!("Loaded overlay font {}", path);
                    Some(font)
                }
                Err(e) => {
                    warn!("Failed to load overlay font {}: {}; labels disabled", path, e);
                    None
                }
            }
        });

        Self {
            font,
            banner_height: config.banner_height,
            banner_alpha: config.banner_alpha.clamp(0.0, 1.0),
            inset_x: detection.inset_x,
            inset_y: detection.inset_y,
        }
    }

    /// Render overlays onto a copy of `frame`
    pub fn annotate(
        &self,
        frame: &RgbImage,
        detections: &DetectionResult,
        face_inset: Option<&RgbImage>,
        status_text: &str,
        fps: f32,
    ) -> RgbImage {
        let mut display = frame.clone();

        for person in &detections.persons {
            let b = person.bbox.clamp(display.width(), display.height());
            if b.is_empty() {
                continue;
            }
            // 2px outline
            for inset in 0..2 {
                let w = b.width() - inset * 2;
                let h = b.height() - inset * 2;
                if w > 0 && h > 0 {
                    draw_hollow_rect_mut(
                        &mut display,
                        Rect::at(b.x1 + inset, b.y1 + inset).of_size(w as u32, h as u32),
                        PERSON_COLOR,
                    );
                }
            }
            self.label(&mut display, "PERSON", b.x1, (b.y1 - 22).max(0), 20.0, PERSON_COLOR);
        }

        if let Some(inset) = face_inset {
            self.draw_face_inset(&mut display, inset);
        }

        self.draw_banner(&mut display);
        self.label(&mut display, status_text, 10, 10, 22.0, TEXT_COLOR);
        self.label(&mut display, &format!("FPS: {:.1}", fps), 10, 50, 20.0, FPS_COLOR);

        display
    }

    fn draw_face_inset(&self, display: &mut RgbImage, inset: &RgbImage) {
        let (x, y) = (self.inset_x, self.inset_y);
        if x + inset.width() > display.width() || y + inset.height() > display.height() {
            return;
        }
        imageops::replace(display, inset, x as i64, y as i64);

        if x > 0 && y > 0 {
            draw_hollow_rect_mut(
                display,
                Rect::at(x as i32 - 1, y as i32 - 1).of_size(inset.width() + 2, inset.height() + 2),
                FACE_COLOR,
            );
        }
        self.label(
            display,
            "Face",
            x as i32,
            (y + inset.height() + 4) as i32,
            18.0,
            FACE_COLOR,
        );
    }

    /// Darken the top band by blending towards black
    fn draw_banner(&self, display: &mut RgbImage) {
        let rows = self.banner_height.min(display.height());
        let keep = 1.0 - self.banner_alpha;
        for y in 0..rows {
            for x in 0..display.width() {
                let px = display.get_pixel_mut(x, y);
                for c in px.0.iter_mut() {
                    *c = (*c as f32 * keep).round() as u8;
                }
            }
        }
    }

    fn label(&self, display: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(display, color, x, y, PxScale::from(size), font, text);
        }
    }
}

/// Frames-per-second readout from the wall-clock delta between frames
///
/// Pure observability: it never influences pacing.
pub struct FpsMeter {
    last: Option<Instant>,
    smoothed: f32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            last: None,
            smoothed: 0.0,
        }
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        if let Some(last) = self.last.replace(now) {
            let delta = now.duration_since(last).as_secs_f32();
            if delta > 0.0 {
                let instant = 1.0 / delta;
                self.smoothed = if self.smoothed == 0.0 {
                    instant
                } else {
                    self.smoothed * 0.9 + instant * 0.1
                };
            }
        }
        self.smoothed
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
