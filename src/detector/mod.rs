//! Detector adapters: one interface over several model families.
//!
//! Every family turns an image into a list of [`Detection`]s in normalized
//! coordinates with the model's string label. The families differ only in
//! how they prepare the input tensor and decode the raw outputs; the actual
//! forward pass is delegated to an [`InferenceBackend`] looked up in a
//! [`BackendRegistry`]. A family with no registered backend cannot be
//! constructed and reports [`BboxeeError::ModelMissing`].

mod tf;
pub mod worker;
mod yolo;

pub use tf::TfDetector;
pub use worker::{annotate_tree, DetectorJob, DetectorOutcome, DetectorUpdate};
pub use yolo::{YoloDetector, YoloVersion};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use image::RgbImage;

use crate::error::BboxeeError;
use crate::schema::{BBox, LabelMap, Normalized};

/// One box proposed by a model.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Normalized>,
    pub label: String,
    pub confidence: f64,
}

/// The supported model families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelFamily {
    FrozenGraph,
    SavedModel,
    YoloV5,
    YoloV9,
}

impl ModelFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::FrozenGraph => "frozen-graph",
            ModelFamily::SavedModel => "saved-model",
            ModelFamily::YoloV5 => "yolov5",
            ModelFamily::YoloV9 => "yolov9",
        }
    }

    /// Best guess from the model's location: a directory is a saved model,
    /// a `.pb` file a frozen graph, anything else a YOLOv5 export.
    pub fn from_model_path(model: &Path) -> Self {
        let is_pb = model
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pb"));
        if model.is_dir() {
            ModelFamily::SavedModel
        } else if is_pb {
            ModelFamily::FrozenGraph
        } else {
            ModelFamily::YoloV5
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelFamily {
    type Err = BboxeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "frozen-graph" | "frozen" | "pb" => Ok(ModelFamily::FrozenGraph),
            "saved-model" | "saved" => Ok(ModelFamily::SavedModel),
            "yolov5" | "yolo5" => Ok(ModelFamily::YoloV5),
            "yolov9" | "yolo9" => Ok(ModelFamily::YoloV9),
            other => Err(BboxeeError::InvalidArgument(format!(
                "unknown model family '{other}' (supported: frozen-graph, saved-model, yolov5, yolov9)"
            ))),
        }
    }
}

/// A batch-of-one input tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelInput {
    /// NHWC, uint8 RGB at the image's own size.
    Rgb8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// NCHW, float32 RGB scaled to [0, 1].
    Float32Chw {
        width: u32,
        height: u32,
        data: Vec<f32>,
    },
}

/// A named raw output of a forward pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }
}

/// Named outputs of one forward pass.
pub type ModelOutputs = BTreeMap<String, Tensor>;

/// Runs a loaded model. Implementations wrap an ML runtime.
pub trait InferenceBackend: Send {
    fn run(&mut self, input: &ModelInput) -> Result<ModelOutputs, String>;
}

/// Opens a model file or directory with some runtime.
pub type BackendLoader =
    Arc<dyn Fn(&Path) -> Result<Box<dyn InferenceBackend>, BboxeeError> + Send + Sync>;

/// Model loaders available in this build, keyed by family.
#[derive(Default)]
pub struct BackendRegistry {
    loaders: HashMap<ModelFamily, BackendLoader>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the loader used for `family`, replacing any earlier one.
    pub fn register<F>(&mut self, family: ModelFamily, loader: F)
    where
        F: Fn(&Path) -> Result<Box<dyn InferenceBackend>, BboxeeError> + Send + Sync + 'static,
    {
        self.loaders.insert(family, Arc::new(loader));
    }

    pub fn supports(&self, family: ModelFamily) -> bool {
        self.loaders.contains_key(&family)
    }

    /// The loader for `family`, or [`BboxeeError::ModelMissing`].
    pub fn loader(&self, family: ModelFamily) -> Result<BackendLoader, BboxeeError> {
        self.loaders
            .get(&family)
            .cloned()
            .ok_or_else(|| BboxeeError::ModelMissing {
                family: family.name().to_string(),
            })
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut families: Vec<_> = self.loaders.keys().collect();
        families.sort();
        f.debug_struct("BackendRegistry")
            .field("families", &families)
            .finish()
    }
}

/// The capability every adapter exposes.
pub trait Detector: Send {
    fn family(&self) -> ModelFamily;

    /// Loads the model into the backend. Called once before any `infer`.
    fn load_model(&mut self) -> Result<(), BboxeeError>;

    /// Runs the model on one image. `name` is used for error reporting.
    fn infer(&mut self, name: &str, image: &RgbImage) -> Result<Vec<Detection>, BboxeeError>;
}

/// Construction parameters, one variant per family.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorConfig {
    FrozenGraph {
        model: PathBuf,
        label_map: Option<PathBuf>,
    },
    SavedModel {
        model: PathBuf,
        label_map: Option<PathBuf>,
    },
    YoloV5 {
        model: PathBuf,
        label_map: Option<PathBuf>,
        input_size: u32,
        stride: u32,
    },
    YoloV9 {
        model: PathBuf,
        label_map: Option<PathBuf>,
        input_size: u32,
        stride: u32,
    },
}

/// Default YOLO network input edge in pixels.
pub const DEFAULT_YOLO_INPUT_SIZE: u32 = 1280;

/// Default YOLO maximum stride.
pub const DEFAULT_YOLO_STRIDE: u32 = 64;

impl DetectorConfig {
    /// Builds a configuration with default geometry for `family`.
    pub fn for_family(family: ModelFamily, model: PathBuf, label_map: Option<PathBuf>) -> Self {
        match family {
            ModelFamily::FrozenGraph => DetectorConfig::FrozenGraph { model, label_map },
            ModelFamily::SavedModel => DetectorConfig::SavedModel { model, label_map },
            ModelFamily::YoloV5 => DetectorConfig::YoloV5 {
                model,
                label_map,
                input_size: DEFAULT_YOLO_INPUT_SIZE,
                stride: DEFAULT_YOLO_STRIDE,
            },
            ModelFamily::YoloV9 => DetectorConfig::YoloV9 {
                model,
                label_map,
                input_size: DEFAULT_YOLO_INPUT_SIZE,
                stride: DEFAULT_YOLO_STRIDE,
            },
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            DetectorConfig::FrozenGraph { .. } => ModelFamily::FrozenGraph,
            DetectorConfig::SavedModel { .. } => ModelFamily::SavedModel,
            DetectorConfig::YoloV5 { .. } => ModelFamily::YoloV5,
            DetectorConfig::YoloV9 { .. } => ModelFamily::YoloV9,
        }
    }

    /// Constructs the adapter.
    ///
    /// Fails with [`BboxeeError::ModelMissing`] when `registry` has no
    /// backend for the family, and with a parse error for a bad label map.
    pub fn build(self, registry: &BackendRegistry) -> Result<Box<dyn Detector>, BboxeeError> {
        let family = self.family();
        let loader = registry.loader(family)?;

        let detector: Box<dyn Detector> = match self {
            DetectorConfig::FrozenGraph { model, label_map }
            | DetectorConfig::SavedModel { model, label_map } => Box::new(TfDetector::new(
                family,
                model,
                read_label_map(label_map.as_deref())?,
                loader,
            )),
            DetectorConfig::YoloV5 {
                model,
                label_map,
                input_size,
                stride,
            } => Box::new(YoloDetector::new(
                YoloVersion::V5,
                model,
                read_label_map(label_map.as_deref())?,
                input_size,
                stride,
                loader,
            )),
            DetectorConfig::YoloV9 {
                model,
                label_map,
                input_size,
                stride,
            } => Box::new(YoloDetector::new(
                YoloVersion::V9,
                model,
                read_label_map(label_map.as_deref())?,
                input_size,
                stride,
                loader,
            )),
        };
        Ok(detector)
    }
}

fn read_label_map(path: Option<&Path>) -> Result<LabelMap, BboxeeError> {
    match path {
        Some(path) => LabelMap::from_path(path),
        None => Ok(LabelMap::new()),
    }
}

/// Looks up an output by name, falling back to the only output present.
fn take_output<'a>(
    outputs: &'a ModelOutputs,
    name: &str,
    image: &str,
) -> Result<&'a Tensor, BboxeeError> {
    if let Some(tensor) = outputs.get(name) {
        return Ok(tensor);
    }
    if outputs.len() == 1 {
        if let Some(tensor) = outputs.values().next() {
            return Ok(tensor);
        }
    }
    Err(BboxeeError::Inference {
        image: image.to_string(),
        message: format!("model output '{name}' is missing"),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Backend returning canned outputs and recording the inputs it saw.
    pub struct CannedBackend {
        pub outputs: ModelOutputs,
        pub seen: Arc<Mutex<Vec<ModelInput>>>,
    }

    impl InferenceBackend for CannedBackend {
        fn run(&mut self, input: &ModelInput) -> Result<ModelOutputs, String> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(input.clone());
            }
            Ok(self.outputs.clone())
        }
    }

    pub fn registry_with(family: ModelFamily, outputs: ModelOutputs) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(family, move |_| {
            Ok(Box::new(CannedBackend {
                outputs: outputs.clone(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }) as Box<dyn InferenceBackend>)
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_backend_is_model_missing() {
        let registry = BackendRegistry::new();
        let config = DetectorConfig::for_family(ModelFamily::YoloV5, PathBuf::from("m.onnx"), None);
        let err = config.build(&registry).err().expect("should fail");
        assert!(matches!(err, BboxeeError::ModelMissing { ref family } if family == "yolov5"));
    }

    #[test]
    fn family_parses_aliases() {
        assert_eq!("YOLOv9".parse::<ModelFamily>().unwrap(), ModelFamily::YoloV9);
        assert_eq!("pb".parse::<ModelFamily>().unwrap(), ModelFamily::FrozenGraph);
        assert!("resnet".parse::<ModelFamily>().is_err());
    }

    #[test]
    fn take_output_falls_back_to_single_tensor() {
        let mut outputs = ModelOutputs::new();
        outputs.insert("anything".into(), Tensor::new(vec![1], vec![0.0]));
        assert!(take_output(&outputs, "output0", "a.jpg").is_ok());

        outputs.insert("other".into(), Tensor::new(vec![1], vec![0.0]));
        assert!(take_output(&outputs, "output0", "a.jpg").is_err());
    }
}
