//! Adapter for TensorFlow object-detection exports (frozen graphs and
//! saved models).
//!
//! Both export styles take the raw uint8 image and return the standard
//! detection API outputs: `detection_boxes` as normalized
//! `[ymin, xmin, ymax, xmax]`, `detection_scores`, `detection_classes`
//! (1-based label map ids), and optionally `num_detections`.

use std::path::PathBuf;

use image::RgbImage;

use super::{
    take_output, BackendLoader, Detection, Detector, InferenceBackend, ModelFamily, ModelInput,
    ModelOutputs,
};
use crate::error::BboxeeError;
use crate::schema::{BBox, LabelMap};

pub struct TfDetector {
    family: ModelFamily,
    model: PathBuf,
    labels: LabelMap,
    loader: BackendLoader,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl TfDetector {
    pub fn new(family: ModelFamily, model: PathBuf, labels: LabelMap, loader: BackendLoader) -> Self {
        Self {
            family,
            model,
            labels,
            loader,
            backend: None,
        }
    }
}

impl Detector for TfDetector {
    fn family(&self) -> ModelFamily {
        self.family
    }

    fn load_model(&mut self) -> Result<(), BboxeeError> {
        let backend = (self.loader)(&self.model)?;
        self.backend = Some(backend);
        log::info!("Loaded {} model {}", self.family, self.model.display());
        Ok(())
    }

    fn infer(&mut self, name: &str, image: &RgbImage) -> Result<Vec<Detection>, BboxeeError> {
        let backend = self.backend.as_mut().ok_or_else(|| BboxeeError::Inference {
            image: name.to_string(),
            message: "model not loaded".to_string(),
        })?;

        let (width, height) = image.dimensions();
        let input = ModelInput::Rgb8 {
            width,
            height,
            data: image.as_raw().clone(),
        };

        let outputs = backend.run(&input).map_err(|message| BboxeeError::Inference {
            image: name.to_string(),
            message,
        })?;

        decode_outputs(&outputs, &self.labels, name)
    }
}

fn decode_outputs(
    outputs: &ModelOutputs,
    labels: &LabelMap,
    name: &str,
) -> Result<Vec<Detection>, BboxeeError> {
    let boxes = take_output(outputs, "detection_boxes", name)?;
    let scores = take_output(outputs, "detection_scores", name)?;
    let classes = take_output(outputs, "detection_classes", name)?;

    let mut count = scores.data.len().min(classes.data.len()).min(boxes.data.len() / 4);
    if let Some(num) = outputs.get("num_detections").and_then(|t| t.data.first()) {
        count = count.min(num.max(0.0) as usize);
    }

    let mut detections = Vec::with_capacity(count);
    for i in 0..count {
        let b = &boxes.data[i * 4..i * 4 + 4];
        let (ymin, xmin, ymax, xmax) = (b[0] as f64, b[1] as f64, b[2] as f64, b[3] as f64);
        let bbox = BBox::from_xyxy(
            xmin.clamp(0.0, 1.0),
            ymin.clamp(0.0, 1.0),
            xmax.clamp(0.0, 1.0),
            ymax.clamp(0.0, 1.0),
        );
        if !bbox.is_valid() {
            continue;
        }
        detections.push(Detection {
            bbox,
            label: labels.label(classes.data[i].round() as i64).to_string(),
            confidence: scores.data[i] as f64,
        });
    }
    Ok(detections)
}
