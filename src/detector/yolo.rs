//! Adapter for single-shot YOLO exports (v5 and v9 output layouts).
//!
//! The image is letterboxed: scaled to fit `input_size` on its long edge,
//! then padded with gray (114) up to the next multiple of `stride` on each
//! axis. The network sees a float CHW tensor in `[0, 1]`. Decoded boxes are
//! mapped back through the letterbox, clipped, and filtered with class-wise
//! non-max suppression.

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::{
    take_output, BackendLoader, Detection, Detector, InferenceBackend, ModelFamily, ModelInput,
    ModelOutputs, Tensor,
};
use crate::error::BboxeeError;
use crate::schema::{BBox, LabelMap, Pixel};

/// Overlap above which a lower-scored box of the same class is suppressed.
pub const NMS_IOU_THRESHOLD: f64 = 0.45;

/// Candidates scoring below this never reach suppression.
const CANDIDATE_FLOOR: f64 = 0.001;

const PAD_VALUE: u8 = 114;

/// Output tensor layout of a YOLO export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YoloVersion {
    /// `[1, N, 5 + C]`: cx, cy, w, h, objectness, class scores.
    V5,
    /// `[1, 4 + C, N]`: cx, cy, w, h, class scores, one column per anchor.
    V9,
}

/// Geometry of one letterbox transform, in input-image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub pad_x: f64,
    pub pad_y: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    /// Computes the transform for an image of `width` x `height`.
    pub fn compute(width: u32, height: u32, input_size: u32, stride: u32) -> Self {
        let stride = stride.max(1);
        let scale = (input_size as f64 / width as f64).min(input_size as f64 / height as f64);
        let scaled_w = ((width as f64 * scale).round() as u32).max(1);
        let scaled_h = ((height as f64 * scale).round() as u32).max(1);
        let padded_w = scaled_w.div_ceil(stride) * stride;
        let padded_h = scaled_h.div_ceil(stride) * stride;

        Self {
            scale,
            pad_x: ((padded_w - scaled_w) / 2) as f64,
            pad_y: ((padded_h - scaled_h) / 2) as f64,
            scaled_width: scaled_w,
            scaled_height: scaled_h,
            width: padded_w,
            height: padded_h,
        }
    }

    /// Maps a box in network pixels back onto the source image.
    pub fn undo(&self, bbox: &BBox<Pixel>) -> BBox<Pixel> {
        BBox::from_xyxy(
            (bbox.xmin() - self.pad_x) / self.scale,
            (bbox.ymin() - self.pad_y) / self.scale,
            (bbox.xmax() - self.pad_x) / self.scale,
            (bbox.ymax() - self.pad_y) / self.scale,
        )
    }
}

/// Scales and pads `image`, returning the network input.
fn letterbox(image: &RgbImage, geometry: &Letterbox) -> ModelInput {
    let (scaled_w, scaled_h) = (geometry.scaled_width, geometry.scaled_height);
    let mut canvas = RgbImage::from_pixel(geometry.width, geometry.height, Rgb([PAD_VALUE; 3]));
    if (scaled_w, scaled_h) == image.dimensions() {
        imageops::replace(&mut canvas, image, geometry.pad_x as i64, geometry.pad_y as i64);
    } else {
        let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, geometry.pad_x as i64, geometry.pad_y as i64);
    }

    let plane = (geometry.width * geometry.height) as usize;
    let mut data = vec![0f32; plane * 3];
    for (i, pixel) in canvas.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel.0[c] as f32 / 255.0;
        }
    }

    ModelInput::Float32Chw {
        width: geometry.width,
        height: geometry.height,
        data,
    }
}

pub struct YoloDetector {
    version: YoloVersion,
    model: PathBuf,
    labels: LabelMap,
    input_size: u32,
    stride: u32,
    loader: BackendLoader,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl YoloDetector {
    pub fn new(
        version: YoloVersion,
        model: PathBuf,
        labels: LabelMap,
        input_size: u32,
        stride: u32,
        loader: BackendLoader,
    ) -> Self {
        Self {
            version,
            model,
            labels,
            input_size,
            stride,
            loader,
            backend: None,
        }
    }
}

impl Detector for YoloDetector {
    fn family(&self) -> ModelFamily {
        match self.version {
            YoloVersion::V5 => ModelFamily::YoloV5,
            YoloVersion::V9 => ModelFamily::YoloV9,
        }
    }

    fn load_model(&mut self) -> Result<(), BboxeeError> {
        self.backend = Some((self.loader)(&self.model)?);
        log::info!(
            "Loaded {} model {} (input {}, stride {})",
            self.family(),
            self.model.display(),
            self.input_size,
            self.stride
        );
        Ok(())
    }

    fn infer(&mut self, name: &str, image: &RgbImage) -> Result<Vec<Detection>, BboxeeError> {
        let backend = self.backend.as_mut().ok_or_else(|| BboxeeError::Inference {
            image: name.to_string(),
            message: "model not loaded".to_string(),
        })?;

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let geometry = Letterbox::compute(width, height, self.input_size, self.stride);
        let input = letterbox(image, &geometry);

        let outputs = backend.run(&input).map_err(|message| BboxeeError::Inference {
            image: name.to_string(),
            message,
        })?;

        let candidates = decode(self.version, &outputs, name)?;
        let kept = non_max_suppression(candidates, NMS_IOU_THRESHOLD);

        let (w, h) = (width as f64, height as f64);
        let mut detections = Vec::with_capacity(kept.len());
        for candidate in kept {
            let bbox = geometry.undo(&candidate.bbox).clip(w, h).to_normalized(w, h);
            if !bbox.is_valid() {
                continue;
            }
            detections.push(Detection {
                bbox,
                label: self.labels.label(candidate.class as i64).to_string(),
                confidence: candidate.score,
            });
        }
        Ok(detections)
    }
}

/// A decoded box in network pixels.
#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    bbox: BBox<Pixel>,
    class: usize,
    score: f64,
}

fn decode(
    version: YoloVersion,
    outputs: &ModelOutputs,
    name: &str,
) -> Result<Vec<Candidate>, BboxeeError> {
    let tensor = take_output(outputs, "output0", name)?;
    let (rows, cols) = matrix_dims(tensor).ok_or_else(|| BboxeeError::Inference {
        image: name.to_string(),
        message: format!("unexpected output shape {:?}", tensor.shape),
    })?;

    let mut candidates = Vec::new();
    match version {
        YoloVersion::V5 => {
            if cols < 6 {
                return Err(shape_error(name, tensor));
            }
            for row in tensor.data.chunks_exact(cols).take(rows) {
                let objectness = row[4] as f64;
                if let Some((class, class_score)) = best_class(&row[5..]) {
                    push_candidate(&mut candidates, &row[..4], class, objectness * class_score);
                }
            }
        }
        YoloVersion::V9 => {
            if rows < 5 {
                return Err(shape_error(name, tensor));
            }
            let at = |r: usize, c: usize| tensor.data[r * cols + c];
            for anchor in 0..cols {
                let geometry = [at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor)];
                let scores: Vec<f32> = (4..rows).map(|r| at(r, anchor)).collect();
                if let Some((class, score)) = best_class(&scores) {
                    push_candidate(&mut candidates, &geometry, class, score);
                }
            }
        }
    }
    Ok(candidates)
}

/// Drops a leading batch dimension of 1 and returns `(rows, cols)`.
fn matrix_dims(tensor: &Tensor) -> Option<(usize, usize)> {
    let dims: Vec<usize> = match tensor.shape.as_slice() {
        [1, rest @ ..] if rest.len() == 2 => rest.to_vec(),
        [a, b] => vec![*a, *b],
        _ => return None,
    };
    let (rows, cols) = (dims[0], dims[1]);
    if rows.checked_mul(cols)? > tensor.data.len() {
        return None;
    }
    Some((rows, cols))
}

fn shape_error(name: &str, tensor: &Tensor) -> BboxeeError {
    BboxeeError::Inference {
        image: name.to_string(),
        message: format!("output shape {:?} has no class scores", tensor.shape),
    }
}

fn best_class(scores: &[f32]) -> Option<(usize, f64)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, &score)| match best {
            Some((_, top)) if top >= score as f64 => best,
            _ => Some((idx, score as f64)),
        })
}

fn push_candidate(candidates: &mut Vec<Candidate>, cxcywh: &[f32], class: usize, score: f64) {
    if score < CANDIDATE_FLOOR {
        return;
    }
    let bbox = BBox::from_cxcywh(
        cxcywh[0] as f64,
        cxcywh[1] as f64,
        cxcywh[2] as f64,
        cxcywh[3] as f64,
    );
    if bbox.is_finite() && bbox.width() > 0.0 && bbox.height() > 0.0 {
        candidates.push(Candidate { bbox, class, score });
    }
}

/// Greedy class-wise suppression, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class == candidate.class && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
