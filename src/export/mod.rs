//! Dataset export.
//!
//! An [`Exporter`] turns a filtered [`Selection`] into a training dataset on
//! disk. Every format shares the same steps: the remap is applied and the
//! sorted class vocabulary derived, the images are shuffled, the first
//! `floor((1 - split) * n)` go to training and the rest to validation, and
//! each image is either copied byte for byte or decoded, masked and
//! re-encoded as JPEG. The format-specific part lives behind
//! `DatasetWriter`.
//!
//! # Supported formats
//!
//! | Format   | Module       | Index files                         |
//! |----------|--------------|-------------------------------------|
//! | YOLOv5   | `yolo`       | `dataset.yaml`, `label_remap.json`  |
//! | YOLOv9   | `yolo`       | `dataset.yaml`, `label_remap.json`  |
//! | TFRecord | `tfrecord`   | `label_map.pbtxt`                   |
//! | COCO     | `coco`       | `train.json`, `validation.json`     |
//! | Package  | `package`    | `metadata.json`                     |

mod coco;
mod package;
mod tfrecord;
mod yolo;

pub use package::{read_package, Package};
pub use tfrecord::{read_records, shard_name, Example};
#[cfg(feature = "fuzzing")]
pub use tfrecord::fuzz_parse_records;
pub use yolo::{read_dataset_yaml, DatasetYaml};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::error::BboxeeError;
use crate::filter::{apply_remap, vocabulary, CandidateImage, Selection};
use crate::image_source::{apply_mask, load_image};
use crate::schema::{LabelRemap, Mask};
use crate::worker::{Reporter, WorkerHandle};

/// JPEG quality used whenever an image has to be re-encoded.
pub const JPEG_QUALITY: u8 = 95;

/// Output dataset format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    YoloV5,
    YoloV9,
    TfRecord,
    Coco,
    Package,
}

impl ExportFormat {
    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::YoloV5 => "yolov5",
            ExportFormat::YoloV9 => "yolov9",
            ExportFormat::TfRecord => "tfrecord",
            ExportFormat::Coco => "coco",
            ExportFormat::Package => "package",
        }
    }

    /// Whether the layout has a validation half.
    pub fn is_split(self) -> bool {
        self != ExportFormat::Package
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = BboxeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yolov5" | "yolo5" => Ok(ExportFormat::YoloV5),
            "yolov9" | "yolo9" => Ok(ExportFormat::YoloV9),
            "tfrecord" | "tfrecords" => Ok(ExportFormat::TfRecord),
            "coco" => Ok(ExportFormat::Coco),
            "package" => Ok(ExportFormat::Package),
            other => Err(BboxeeError::InvalidArgument(format!(
                "unknown export format '{other}' (expected yolov5, yolov9, tfrecord, coco or package)"
            ))),
        }
    }
}

/// Which half of the dataset an image lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    /// Prefix of renamed image files.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
        }
    }

    /// Directory and index-file stem.
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
        }
    }

    /// Renamed file stem for the `index`th image of this split.
    pub fn file_stem(self, index: usize) -> String {
        format!("{}_{:010}", self.file_prefix(), index)
    }
}

/// Tunables shared by every format.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportOptions {
    /// Fraction of images held out for validation, in `[0, 1]`.
    pub validation_split: f64,
    /// TFRecord shards per split.
    pub shards: usize,
    /// Re-encode every image, dropping EXIF and other metadata.
    pub strip_metadata: bool,
    /// Shuffle seed; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            validation_split: 0.1,
            shards: 1,
            strip_metadata: false,
            seed: None,
        }
    }
}

/// Image counts per split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Exported {
    pub train: usize,
    pub validation: usize,
}

impl Exported {
    pub fn total(&self) -> usize {
        self.train + self.validation
    }
}

pub type ExportOutcome = Result<Exported, BboxeeError>;

/// JPEG bytes ready to be written, with their pixel size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Number of training images for `total` images and a validation fraction.
pub fn train_size(total: usize, validation_split: f64) -> usize {
    // The epsilon keeps exact products such as 0.7 * 10 from flooring to 6.
    let size = ((1.0 - validation_split) * total as f64 + 1e-9).floor();
    (size.max(0.0) as usize).min(total)
}

/// The format-specific half of an export.
pub(crate) trait DatasetWriter {
    /// Paths under the output directory this format creates. None of them
    /// may exist before the export starts.
    fn targets(&self) -> Vec<PathBuf>;

    /// Creates the directory layout.
    fn begin(&mut self) -> Result<(), BboxeeError>;

    /// Writes the `index`th image of `split`.
    fn write(
        &mut self,
        split: Split,
        index: usize,
        image: &CandidateImage,
        encoded: EncodedImage,
    ) -> Result<(), BboxeeError>;

    /// Writes index files and flushes outputs.
    fn finish(&mut self) -> Result<(), BboxeeError>;
}

/// Shared inputs handed to each format writer.
#[derive(Clone, Debug)]
pub(crate) struct ExportContext {
    pub dir: PathBuf,
    pub labels: Vec<String>,
    pub remap: LabelRemap,
    pub shards: usize,
}

impl ExportContext {
    /// Position of `label` in the sorted vocabulary.
    pub fn class_index(&self, label: &str) -> Option<usize> {
        self.labels.binary_search_by(|l| l.as_str().cmp(label)).ok()
    }
}

fn writer_for(format: ExportFormat, context: ExportContext) -> Box<dyn DatasetWriter> {
    match format {
        ExportFormat::YoloV5 => Box::new(yolo::YoloWriter::new(yolo::YoloLayout::V5, context)),
        ExportFormat::YoloV9 => Box::new(yolo::YoloWriter::new(yolo::YoloLayout::V9, context)),
        ExportFormat::TfRecord => Box::new(tfrecord::TfRecordWriter::new(context)),
        ExportFormat::Coco => Box::new(coco::CocoWriter::new(context)),
        ExportFormat::Package => Box::new(package::PackageWriter::new(context)),
    }
}

/// A configured export of one selection into one directory.
#[derive(Clone, Debug)]
pub struct Exporter {
    dir: PathBuf,
    images: Vec<CandidateImage>,
    masks: BTreeMap<PathBuf, Mask>,
    remap: LabelRemap,
    labels: Vec<String>,
    options: ExportOptions,
}

impl Exporter {
    /// Applies `remap` to the selection and derives the class vocabulary.
    pub fn new(
        dir: impl Into<PathBuf>,
        selection: Selection,
        remap: LabelRemap,
        options: ExportOptions,
    ) -> Self {
        let images = apply_remap(selection.images, &remap);
        let labels = vocabulary(&images);
        Self {
            dir: dir.into(),
            images,
            masks: selection.masks,
            remap,
            labels,
            options,
        }
    }

    /// Sorted class vocabulary after remapping.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Images that survived remapping.
    pub fn images(&self) -> &[CandidateImage] {
        &self.images
    }

    /// Exports on the calling thread.
    pub fn export(self, format: ExportFormat) -> ExportOutcome {
        let (sender, _events) = std::sync::mpsc::channel();
        let reporter = Reporter::new(sender, Default::default());
        self.run(format, &reporter)
    }

    /// Exports on a worker thread. Each progress event carries the split
    /// the image went to.
    pub fn start(
        self,
        format: ExportFormat,
    ) -> Result<WorkerHandle<Split, ExportOutcome>, BboxeeError> {
        WorkerHandle::spawn("export", move |reporter| self.run(format, reporter))
    }

    /// Runs the export, publishing one progress event per image.
    /// Cancellation stops between images and reports what was written.
    pub fn run(
        mut self,
        format: ExportFormat,
        reporter: &Reporter<Split, ExportOutcome>,
    ) -> ExportOutcome {
        self.validate(format)?;

        let mut writer = writer_for(
            format,
            ExportContext {
                dir: self.dir.clone(),
                labels: self.labels.clone(),
                remap: self.remap.clone(),
                shards: self.options.shards,
            },
        );
        for target in writer.targets() {
            let path = self.dir.join(target);
            if path.exists() {
                return Err(BboxeeError::ExportLayoutConflict { path });
            }
        }

        match self.options.seed {
            Some(seed) => self.images.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => self.images.shuffle(&mut rand::rng()),
        }

        let split = if format.is_split() {
            self.options.validation_split
        } else {
            if self.options.validation_split > 0.0 {
                log::warn!(
                    "{format} exports are not split; ignoring validation split {}",
                    self.options.validation_split
                );
            }
            0.0
        };
        let train = train_size(self.images.len(), split);

        writer.begin()?;
        log::info!(
            "Exporting {} images as {} to {} ({} train, {} validation)",
            self.images.len(),
            format,
            self.dir.display(),
            train,
            self.images.len() - train
        );

        let mut exported = Exported::default();
        for (position, image) in self.images.iter().enumerate() {
            if reporter.is_cancelled() {
                log::info!("Export cancelled after {} images", exported.total());
                break;
            }
            let (split, index) = if position < train {
                (Split::Train, position)
            } else {
                (Split::Validation, position - train)
            };

            let encoded = self.encode(image)?;
            writer.write(split, index, image, encoded)?;
            match split {
                Split::Train => exported.train += 1,
                Split::Validation => exported.validation += 1,
            }
            reporter.progress(position, image.file_name.clone(), split);
        }

        writer.finish()?;
        log::info!(
            "Export finished: {} train, {} validation",
            exported.train,
            exported.validation
        );
        Ok(exported)
    }

    fn validate(&self, format: ExportFormat) -> Result<(), BboxeeError> {
        let split = self.options.validation_split;
        if !(0.0..=1.0).contains(&split) {
            return Err(BboxeeError::InvalidArgument(format!(
                "validation split must be within [0, 1], got {split}"
            )));
        }
        if format == ExportFormat::TfRecord && self.options.shards == 0 {
            return Err(BboxeeError::InvalidArgument(
                "shard count must be at least 1".to_string(),
            ));
        }
        if !self.dir.is_dir() {
            return Err(BboxeeError::InvalidArgument(format!(
                "export directory {} does not exist",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// Copies the original bytes when they can be used as is, otherwise
    /// decodes, masks and re-encodes.
    fn encode(&self, image: &CandidateImage) -> Result<EncodedImage, BboxeeError> {
        let path = image.path();
        let mask = self.masks.get(&image.directory);
        if !self.options.strip_metadata && mask.is_none() && is_jpeg(&path) {
            return copy_jpeg(&path);
        }

        let mut pixels = load_image(&path)?;
        if let Some(mask) = mask {
            match apply_mask(&image.file_name, &mut pixels, mask) {
                Ok(()) => {}
                Err(err @ BboxeeError::DimensionMismatch { .. }) => {
                    log::warn!("{err}; exporting unmasked");
                }
                Err(err) => return Err(err),
            }
        }
        encode_jpeg(&path, &pixels)
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

fn copy_jpeg(path: &Path) -> Result<EncodedImage, BboxeeError> {
    let bytes = fs::read(path).map_err(|err| BboxeeError::from_io(path, err))?;
    let size = imagesize::blob_size(&bytes).map_err(|source| BboxeeError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(EncodedImage {
        bytes,
        width: size.width as u32,
        height: size.height as u32,
    })
}

/// Encodes `pixels` as a baseline JPEG at [`JPEG_QUALITY`].
pub fn encode_jpeg(path: &Path, pixels: &RgbImage) -> Result<EncodedImage, BboxeeError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(pixels)
        .map_err(|source| BboxeeError::ImageEncode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(EncodedImage {
        bytes,
        width: pixels.width(),
        height: pixels.height(),
    })
}

/// Creates `path` and any missing parents.
pub(crate) fn create_dir(path: &Path) -> Result<(), BboxeeError> {
    fs::create_dir_all(path).map_err(|err| BboxeeError::from_io(path, err))
}

/// Writes `bytes` to `path`.
pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BboxeeError> {
    fs::write(path, bytes).map_err(|err| BboxeeError::from_io(path, err))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use image::{Rgb, RgbImage};

    use crate::filter::{CandidateImage, Selection};
    use crate::schema::{AnnotationBlock, BBox};

    /// Writes `count` small JPEGs named `img{i}.jpg` into `dir`, each with one
    /// box labeled by `label(i)`.
    pub fn selection(dir: &Path, count: usize, label: impl Fn(usize) -> String) -> Selection {
        let mut selection = Selection::default();
        for i in 0..count {
            let file_name = format!("img{i}.jpg");
            let pixels = RgbImage::from_pixel(40, 20, Rgb([i as u8 * 10, 100, 200]));
            pixels.save(dir.join(&file_name)).expect("write jpeg");
            selection.images.push(CandidateImage {
                directory: dir.to_path_buf(),
                file_name,
                license: "CC-BY".into(),
                license_url: "https://example.org/by".into(),
                annotations: vec![AnnotationBlock::human(
                    BBox::from_xyxy(0.25, 0.1, 0.75, 0.6),
                    label(i),
                )],
                ..Default::default()
            });
        }
        selection
    }
}
