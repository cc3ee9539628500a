//! Person and face detection
//!
//! Detectors are black boxes behind [`PersonDetector`] and [`FaceDetector`].
//! [`DetectionStage`] runs them on a duty cycle: every Nth frame is
//! analysed and the frames in between redraw the previous result unchanged.
//! Faces are searched only inside person boxes and translated back to frame
//! coordinates; the latest face is kept as a fixed-size close-up.

#[cfg(feature = "onnx")]
pub mod onnx;

use image::{imageops, RgbImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Axis-aligned box in pixel coordinates (x2/y2 exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> f32 {
        (self.width() * self.height()) as f32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Shift by an offset (crop space to frame space)
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.x1 + dx,
            self.y1 + dy,
            self.x2 + dx,
            self.y2 + dy,
            self.confidence,
        )
    }

    /// Grow by `margin` on every side, clamped to the frame
    pub fn expand_clamped(&self, margin: i32, width: u32, height: u32) -> Self {
        Self::new(
            self.x1 - margin,
            self.y1 - margin,
            self.x2 + margin,
            self.y2 + margin,
            self.confidence,
        )
        .clamp(width, height)
    }

    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
            self.confidence,
        )
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = BBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
            0.0,
        );
        let inter_area = inter.area();
        let union = self.area() + other.area() - inter_area;
        if union <= 0.0 {
            0.0
        } else {
            inter_area / union
        }
    }
}

/// Greedy non-maximum suppression, highest confidence first
pub fn non_max_suppression(mut boxes: Vec<BBox>, iou_threshold: f32) -> Vec<BBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// A detected person and the faces found inside it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonDetection {
    pub bbox: BBox,
    /// Face boxes in frame coordinates
    pub faces: Vec<BBox>,
}

/// Detections for one duty cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub persons: Vec<PersonDetection>,
}

impl DetectionResult {
    pub fn person_count(&self) -> usize {
        self.persons.len()
    }
}

/// Finds people in a full frame
pub trait PersonDetector: Send {
    fn detect_persons(&mut self, frame: &RgbImage) -> Result<Vec<BBox>>;
}

/// Finds faces in a person crop (coordinates relative to the crop)
pub trait FaceDetector: Send {
    fn detect_faces(&mut self, crop: &RgbImage) -> Result<Vec<BBox>>;
}

/// Used when no model is available; never reports anything
pub struct DisabledDetector;

impl PersonDetector for DisabledDetector {
    fn detect_persons(&mut self, _frame: &RgbImage) -> Result<Vec<BBox>> {
        Ok(Vec::new())
    }
}

impl FaceDetector for DisabledDetector {
    fn detect_faces(&mut self, _crop: &RgbImage) -> Result<Vec<BBox>> {
        Ok(Vec::new())
    }
}

/// Build the configured detector backends
pub fn build_detectors(config: &DetectionConfig) -> (Box<dyn PersonDetector>, Box<dyn FaceDetector>) {
    #[cfg(feature = "onnx")]
    {
        let person: Box<dyn PersonDetector> = match config.person_model.as_deref() {
            Some(path) => match onnx::YoloDetector::person(path, config) {
                Ok(d) => {
                    info!("Loaded person model {}", path);
                    Box::new(d)
                }
                Err(e) => {
                    warn!("Failed to load person model {}: {}", path, e);
                    Box::new(DisabledDetector)
                }
            },
            None => {
                warn!("No person model configured, detection disabled");
                Box::new(DisabledDetector)
            }
        };
        let face: Box<dyn FaceDetector> = match config.face_model.as_deref() {
            Some(path) => match onnx::YoloDetector::face(path, config) {
                Ok(d) => {
                    info!("Loaded face model {}", path);
                    Box::new(d)
                }
                Err(e) => {
                    warn!("Failed to load face model {}: {}", path, e);
                    Box::new(DisabledDetector)
                }
            },
            None => Box::new(DisabledDetector),
        };
        (person, face)
    }

    #[cfg(not(feature = "onnx"))]
    {
        if config.person_model.is_some() || config.face_model.is_some() {
            warn!("Detection models configured but built without the `onnx` feature");
        } else {
            info!("Detection disabled (no models configured)");
        }
        (Box::new(DisabledDetector), Box::new(DisabledDetector))
    }
}

/// Duty-cycled detection with temporal hold and face close-up
pub struct DetectionStage {
    person: Box<dyn PersonDetector>,
    face: Box<dyn FaceDetector>,
    duty_cycle: u64,
    person_confidence: f32,
    face_confidence: f32,
    face_margin: i32,
    inset_size: u32,
    frame_index: u64,
    last: DetectionResult,
    last_face: Option<RgbImage>,
    throttler: LogThrottler,
}

impl DetectionStage {
    pub fn new(
        person: Box<dyn PersonDetector>,
        face: Box<dyn FaceDetector>,
        config: &DetectionConfig,
    ) -> Self {
        Self {
            person,
            face,
            duty_cycle: config.duty_cycle.max(1) as u64,
            person_confidence: config.person_confidence,
            face_confidence: config.face_confidence,
            face_margin: config.face_margin as i32,
            inset_size: config.inset_size.max(1),
            frame_index: 0,
            last: DetectionResult::default(),
            last_face: None,
            throttler: LogThrottler::with_secs(10),
        }
    }

    /// Forget held detections and the face close-up (new session)
    pub fn reset(&mut self) {
        self.frame_index = 0;
        self.last = DetectionResult::default();
        self.last_face = None;
    }

    /// Detections for this frame; held from the last pass on skipped frames
    pub fn process(&mut self, frame: &RgbImage) -> &DetectionResult {
        let run = self.frame_index % self.duty_cycle == 0;
        self.frame_index += 1;

        if run {
            match self.detect(frame) {
                Ok(result) => self.last = result,
                Err(e) => {
                    warn_throttled!(self.throttler, "detect", "Detection failed: {}", e);
                }
            }
        }
        &self.last
    }

    /// Most recent face close-up, persisted across frames until replaced
    pub fn face_inset(&self) -> Option<&RgbImage> {
        self.last_face.as_ref()
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let (width, height) = frame.dimensions();
        let persons = self.person.detect_persons(frame)?;
        let (min_person, min_face) = (self.person_confidence, self.face_confidence);

        let mut result = DetectionResult::default();
        for bbox in persons.into_iter().filter(|b| b.confidence >= min_person) {
            let region = bbox.clamp(width, height);
            if region.is_empty() {
                continue;
            }

            let person_crop = crop(frame, &region);
            let faces: Vec<BBox> = match self.face.detect_faces(&person_crop) {
                Ok(faces) => faces
                    .into_iter()
                    .filter(|f| f.confidence >= min_face)
                    .map(|f| f.translate(region.x1, region.y1).clamp(width, height))
                    .filter(|f| !f.is_empty())
                    .collect(),
                Err(e) => {
                    warn_throttled!(self.throttler, "detect_faces", "Face detection failed: {}", e);
                    Vec::new()
                }
            };

            for face in &faces {
                let area = face.expand_clamped(self.face_margin, width, height);
                if !area.is_empty() {
                    let close_up = crop(frame, &area);
                    self.last_face = Some(imageops::resize(
                        &close_up,
                        self.inset_size,
                        self.inset_size,
                        imageops::FilterType::Triangle,
                    ));
                }
            }

            result.persons.push(PersonDetection { bbox, faces });
        }
        Ok(result)
    }
}

/// Copy a clamped, non-empty region out of the frame
fn crop(frame: &RgbImage, region: &BBox) -> RgbImage {
    imageops::crop_imm(
        frame,
        region.x1 as u32,
        region.y1 as u32,
        region.width() as u32,
        region.height() as u32,
    )
    .to_image()
}
