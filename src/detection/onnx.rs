//! YOLOv8 detectors on ONNX Runtime
//!
//! Output layout is `[1, 4 + classes, anchors]` with centre/size boxes in
//! model input pixels. The person model is a COCO export (class 0 = person);
//! the face model is a YOLOv8-face export whose row 4 is the face score.

use image::{imageops, RgbImage};
use ndarray::{Array4, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};

use super::{non_max_suppression, BBox, FaceDetector, PersonDetector};
use crate::config::DetectionConfig;
use crate::error::{AppError, Result};

pub struct YoloDetector {
    session: Session,
    input_size: u32,
    class_index: usize,
    confidence: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn person(path: &str, config: &DetectionConfig) -> Result<Self> {
        Self::load(path, config, config.person_confidence)
    }

    pub fn face(path: &str, config: &DetectionConfig) -> Result<Self> {
        Self::load(path, config, config.face_confidence)
    }

    fn load(path: &str, config: &DetectionConfig, confidence: f32) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| AppError::Detection(format!("Failed to load {}: {}", path, e)))?;

        Ok(Self {
            session,
            input_size: config.input_size.max(32),
            class_index: 0,
            confidence,
            iou_threshold: config.iou_threshold,
        })
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<BBox>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let size = self.input_size;
        let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
            }
        }

        let inputs = ort::inputs![input.view()]
            .map_err(|e| AppError::Detection(format!("Failed to bind input: {}", e)))?;
        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| AppError::Detection(format!("Inference failed: {}", e)))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Detection(format!("Unexpected output: {}", e)))?;

        if output.ndim() != 3 {
            return Err(AppError::Detection(format!(
                "Unexpected output rank {}",
                output.ndim()
            )));
        }
        let output = output.index_axis(Axis(0), 0);
        let (rows, anchors) = (output.shape()[0], output.shape()[1]);
        let score_row = 4 + self.class_index;
        if rows <= score_row {
            return Err(AppError::Detection(format!("Output has only {} rows", rows)));
        }

        let scale_x = width as f32 / size as f32;
        let scale_y = height as f32 / size as f32;
        let mut boxes = Vec::new();
        for i in 0..anchors {
            let score = output[[score_row, i]];
            if score < self.confidence {
                continue;
            }
            let (cx, cy) = (output[[0, i]], output[[1, i]]);
            let (bw, bh) = (output[[2, i]], output[[3, i]]);
            boxes.push(BBox::new(
                ((cx - bw / 2.0) * scale_x) as i32,
                ((cy - bh / 2.0) * scale_y) as i32,
                ((cx + bw / 2.0) * scale_x) as i32,
                ((cy + bh / 2.0) * scale_y) as i32,
                score,
            ));
        }

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}

impl PersonDetector for YoloDetector {
    fn detect_persons(&mut self, frame: &RgbImage) -> Result<Vec<BBox>> {
        self.infer(frame)
    }
}

impl FaceDetector for YoloDetector {
    fn detect_faces(&mut self, crop: &RgbImage) -> Result<Vec<BBox>> {
        self.infer(crop)
    }
}
