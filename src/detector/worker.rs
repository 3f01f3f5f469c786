//! Runs a detector over an image directory as a background job.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BboxeeError;
use crate::image_source::{apply_mask, list_images, load_image};
use crate::schema::io_bbx::{read_bbx, write_bbx};
use crate::schema::{AnnotationBlock, AnnotationDocument, ImageEntry, Mask};
use crate::session::Session;
use crate::worker::{Reporter, WorkerHandle};

use super::{BackendRegistry, Detector, DetectorConfig};

/// Progress published by a detector job.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorUpdate {
    /// Sent once, after the model loads and before the first image.
    ModelLoaded,
    /// Boxes for one image; possibly none.
    Image(ImageEntry),
}

/// Result delivered when a detector job finishes.
pub type DetectorOutcome = Result<AnnotationDocument, BboxeeError>;

/// What a detector run covers.
#[derive(Clone, Debug)]
pub struct DetectorJob {
    /// Detections scoring below this are dropped.
    pub threshold: f64,
    pub image_directory: PathBuf,
    pub image_list: Vec<String>,
    /// Index into `image_list` of the first image to process.
    pub starting_image: usize,
    /// Applied to each image before inference.
    pub mask: Option<Mask>,
}

impl DetectorJob {
    pub fn new(image_directory: PathBuf, image_list: Vec<String>, threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            image_directory,
            image_list,
            starting_image: 0,
            mask: None,
        }
    }

    /// Starts the job on a worker thread.
    pub fn start(
        self,
        detector: Box<dyn Detector>,
    ) -> Result<WorkerHandle<DetectorUpdate, DetectorOutcome>, BboxeeError> {
        WorkerHandle::spawn("detector", move |reporter| self.run(detector, reporter))
    }

    /// Runs the job on the calling thread.
    ///
    /// A failure to load the model ends the job with that error. A failure
    /// on a single image is logged and reported as an entry with no boxes;
    /// the job then moves on. Cancellation returns the boxes found so far.
    pub fn run(
        self,
        mut detector: Box<dyn Detector>,
        reporter: &Reporter<DetectorUpdate, DetectorOutcome>,
    ) -> DetectorOutcome {
        detector.load_model()?;
        reporter.progress(self.starting_image, "", DetectorUpdate::ModelLoaded);
        Ok(self.detect_all(detector.as_mut(), reporter))
    }

    /// Runs an already loaded detector over the image list.
    fn detect_all(
        &self,
        detector: &mut dyn Detector,
        reporter: &Reporter<DetectorUpdate, DetectorOutcome>,
    ) -> AnnotationDocument {
        let mut document = AnnotationDocument::new();
        for (index, name) in self
            .image_list
            .iter()
            .enumerate()
            .skip(self.starting_image)
        {
            if reporter.is_cancelled() {
                log::info!("Detector cancelled at image {index}");
                break;
            }

            let entry = match self.detect_image(detector, name) {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Skipping {name}: {err}");
                    ImageEntry::default()
                }
            };

            if !entry.annotations.is_empty() {
                document.images.insert(name.clone(), entry.clone());
            }
            reporter.progress(index, name.clone(), DetectorUpdate::Image(entry));
        }

        log::info!(
            "Detector produced {} boxes on {} images",
            document.annotation_count(),
            document.images.len()
        );
        document
    }

    fn detect_image(
        &self,
        detector: &mut dyn Detector,
        name: &str,
    ) -> Result<ImageEntry, BboxeeError> {
        let mut pixels = load_image(&self.image_directory.join(name))?;
        if let Some(mask) = &self.mask {
            match apply_mask(name, &mut pixels, mask) {
                Ok(()) => {}
                Err(err @ BboxeeError::DimensionMismatch { .. }) => {
                    log::warn!("{err}; detecting unmasked");
                }
                Err(err) => return Err(err),
            }
        }

        let mut entry = ImageEntry::default();
        for detection in detector.infer(name, &pixels)? {
            if detection.confidence < self.threshold {
                continue;
            }
            entry.annotations.push(AnnotationBlock::machine(
                detection.bbox,
                detection.label,
                detection.confidence,
            ));
        }
        Ok(entry)
    }
}

/// Runs one detector over every image directory under `root`, writing
/// `<dir>/<dirname>.bbx` next to the images.
///
/// An existing document keeps its entries and its mask; only images it
/// does not annotate yet receive detections. Returns the written paths.
pub fn annotate_tree(
    root: &Path,
    config: DetectorConfig,
    registry: &BackendRegistry,
    threshold: f64,
) -> Result<Vec<PathBuf>, BboxeeError> {
    if !root.is_dir() {
        return Err(BboxeeError::ImageNotFound(root.display().to_string()));
    }
    let mut detector = config.build(registry)?;
    detector.load_model()?;

    let mut directories = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            match err.into_io_error() {
                Some(io) => BboxeeError::from_io(path, io),
                None => BboxeeError::InvalidArgument(format!(
                    "filesystem loop under {}",
                    path.display()
                )),
            }
        })?;
        if entry.file_type().is_dir() {
            directories.push(entry.into_path());
        }
    }
    directories.sort();

    let (sender, _events) = std::sync::mpsc::channel();
    let reporter = Reporter::new(sender, Default::default());
    let mut written = Vec::new();
    for directory in directories {
        let images = list_images(&directory)?;
        if images.is_empty() {
            continue;
        }
        let path = Session::default_document_path(&directory);
        let mut document = if path.is_file() {
            read_bbx(&path)?
        } else {
            AnnotationDocument::new()
        };

        let mut job = DetectorJob::new(directory.clone(), images, threshold);
        job.mask = document.mask.clone();
        let detected = job.detect_all(detector.as_mut(), &reporter);
        for (name, entry) in detected.images {
            document.images.entry(name).or_insert(entry);
        }
        write_bbx(&path, &document)?;
        log::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Detection, ModelFamily};
    use crate::schema::{Author, BBox, Updater};
    use image::RgbImage;

    struct FixedDetector {
        fail_on: Option<&'static str>,
    }

    impl Detector for FixedDetector {
        fn family(&self) -> ModelFamily {
            ModelFamily::SavedModel
        }

        fn load_model(&mut self) -> Result<(), BboxeeError> {
            Ok(())
        }

        fn infer(&mut self, name: &str, _: &RgbImage) -> Result<Vec<Detection>, BboxeeError> {
            if Some(name) == self.fail_on {
                return Err(BboxeeError::Inference {
                    image: name.to_string(),
                    message: "boom".into(),
                });
            }
            Ok(vec![
                Detection {
                    bbox: BBox::from_xyxy(0.1, 0.1, 0.4, 0.4),
                    label: "deer".into(),
                    confidence: 0.9,
                },
                Detection {
                    bbox: BBox::from_xyxy(0.5, 0.5, 0.6, 0.6),
                    label: "unknown".into(),
                    confidence: 0.2,
                },
            ])
        }
    }

    fn write_images(dir: &std::path::Path, names: &[&str]) {
        for name in names {
            RgbImage::new(4, 4).save(dir.join(name)).expect("save image");
        }
    }

    #[test]
    fn thresholds_and_normalizes_provenance() {
        let temp = tempfile::tempdir().expect("create temp dir");
        write_images(temp.path(), &["a.png", "b.png", "c.png"]);

        let mut job = DetectorJob::new(
            temp.path().to_path_buf(),
            vec!["a.png".into(), "b.png".into(), "c.png".into()],
            0.5,
        );
        job.starting_image = 1;

        let handle = job
            .start(Box::new(FixedDetector { fail_on: Some("c.png") }))
            .expect("spawn");

        let mut updates = Vec::new();
        let document = handle
            .wait(|index, name, update| updates.push((index, name.to_string(), update)))
            .expect("finished")
            .expect("job ok");

        assert_eq!(updates[0].2, DetectorUpdate::ModelLoaded);
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1].0, 1);
        assert_eq!(updates[2].1, "c.png");
        assert_eq!(updates[2].2, DetectorUpdate::Image(ImageEntry::default()));

        assert_eq!(document.images.len(), 1);
        let blocks = document.annotations("b.png");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].created_by, Author::Machine);
        assert_eq!(blocks[0].updated_by, Updater::Nobody);
        assert_eq!(blocks[0].confidence, 0.9);
    }

    #[test]
    fn mismatched_mask_falls_back_to_unmasked_image() {
        let temp = tempfile::tempdir().expect("create temp dir");
        write_images(temp.path(), &["a.png"]);

        let mut job = DetectorJob::new(temp.path().to_path_buf(), vec!["a.png".into()], 0.5);
        job.mask = Some(Mask(vec![vec![1, 1], vec![1, 1]]));

        let document = job
            .start(Box::new(FixedDetector { fail_on: None }))
            .expect("spawn")
            .wait(|_, _, _| {})
            .expect("finished")
            .expect("job ok");

        assert_eq!(document.annotations("a.png").len(), 1);
    }

    #[test]
    fn annotate_tree_writes_one_document_per_directory() {
        use crate::detector::testing::registry_with;
        use crate::detector::{ModelOutputs, Tensor};

        let temp = tempfile::tempdir().expect("create temp dir");
        let cam1 = temp.path().join("cam1");
        let empty = temp.path().join("notes");
        std::fs::create_dir_all(&cam1).unwrap();
        std::fs::create_dir_all(&empty).unwrap();
        write_images(&cam1, &["a.png", "b.png"]);

        let mut outputs = ModelOutputs::new();
        outputs.insert(
            "detection_boxes".into(),
            Tensor::new(vec![1, 1, 4], vec![0.1, 0.2, 0.5, 0.6]),
        );
        outputs.insert("detection_scores".into(), Tensor::new(vec![1, 1], vec![0.9]));
        outputs.insert("detection_classes".into(), Tensor::new(vec![1, 1], vec![1.0]));
        outputs.insert("num_detections".into(), Tensor::new(vec![1], vec![1.0]));
        let registry = registry_with(ModelFamily::SavedModel, outputs);

        let config = DetectorConfig::for_family(
            ModelFamily::SavedModel,
            temp.path().join("model"),
            None,
        );
        let written = annotate_tree(temp.path(), config, &registry, 0.5).expect("annotate");
        assert_eq!(written, vec![cam1.join("cam1.bbx")]);

        let document = read_bbx(&written[0]).expect("read");
        assert_eq!(document.images.len(), 2);
        let block = &document.annotations("a.png")[0];
        assert!((block.bbox.xmin() - 0.2).abs() < 1e-6);
        assert!((block.bbox.ymin() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn annotate_tree_without_backend_fails_early() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let config = DetectorConfig::for_family(
            ModelFamily::YoloV9,
            temp.path().join("model.onnx"),
            None,
        );
        let err = annotate_tree(temp.path(), config, &BackendRegistry::new(), 0.5).unwrap_err();
        assert!(matches!(err, BboxeeError::ModelMissing { .. }));
    }
}
