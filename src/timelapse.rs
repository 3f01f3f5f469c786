//! Conversion to and from MegaDetector batch output.
//!
//! Timelapse and other review tools read the MegaDetector JSON shape:
//!
//! ```json
//! {
//!   "images": [{"file": "site/IMG_0001.JPG",
//!               "detections": [{"category": "1", "conf": 0.92,
//!                               "bbox": [0.1, 0.2, 0.3, 0.4]}]}],
//!   "detection_categories": {"1": "deer"}
//! }
//! ```
//!
//! `bbox` is normalized `[x, y, width, height]`. Category ids are 1-based
//! strings assigned in sorted label order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BboxeeError;
use crate::filter::find_documents;
use crate::schema::io_bbx::{read_bbx, write_bbx};
use crate::schema::{is_negative_label, AnnotationBlock, AnnotationDocument, BBox, ImageEntry};
use crate::session::Session;

pub const FORMAT_VERSION: &str = "1.3";

/// A MegaDetector batch output file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub images: Vec<BatchImage>,

    #[serde(default)]
    pub detection_categories: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<BatchInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub detector: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchImage {
    pub file: String,

    /// Absent or null when the detector failed on the image.
    #[serde(default)]
    pub detections: Option<Vec<BatchDetection>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchDetection {
    pub category: String,
    pub conf: f64,
    pub bbox: [f64; 4],
}

/// Collects every `.bbx` under `root` into one batch output. Image paths are
/// relative to `root` and use `/` separators.
pub fn to_timelapse(root: &Path) -> Result<BatchOutput, BboxeeError> {
    let mut documents = Vec::new();
    for path in find_documents(root)? {
        let document = read_bbx(&path)?;
        documents.push((path, document));
    }

    let mut labels: Vec<&str> = documents
        .iter()
        .flat_map(|(_, doc)| doc.images.values())
        .flat_map(|entry| entry.annotations.iter())
        .map(|block| block.label.as_str())
        .filter(|label| !is_negative_label(label))
        .collect();
    labels.sort_unstable();
    labels.dedup();
    let ids: BTreeMap<&str, String> = labels
        .iter()
        .enumerate()
        .map(|(idx, label)| (*label, (idx + 1).to_string()))
        .collect();

    let mut output = BatchOutput {
        info: Some(BatchInfo {
            format_version: FORMAT_VERSION.to_string(),
            detector: format!("bboxee {}", env!("CARGO_PKG_VERSION")),
        }),
        ..Default::default()
    };
    for (path, document) in &documents {
        let directory = path.parent().unwrap_or(root);
        let relative = directory.strip_prefix(root).unwrap_or(directory);
        for (name, entry) in &document.images {
            let file = relative_file(relative, name);
            let detections = entry
                .annotations
                .iter()
                .filter_map(|block| {
                    let category = ids.get(block.label.as_str())?;
                    let (x, y, w, h) = block.bbox.to_xywh();
                    Some(BatchDetection {
                        category: category.clone(),
                        conf: block.confidence,
                        bbox: [x, y, w, h],
                    })
                })
                .collect();
            output.images.push(BatchImage {
                file,
                detections: Some(detections),
                failure: None,
            });
        }
    }
    output.detection_categories = ids
        .into_iter()
        .map(|(label, id)| (id, label.to_string()))
        .collect();

    log::info!(
        "Collected {} images from {} documents under {}",
        output.images.len(),
        documents.len(),
        root.display()
    );
    Ok(output)
}

fn relative_file(directory: &Path, name: &str) -> String {
    let mut parts: Vec<String> = directory
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.push(name.to_string());
    parts.join("/")
}

/// Reads a batch output file.
pub fn read_batch_output(path: &Path) -> Result<BatchOutput, BboxeeError> {
    let text = fs::read_to_string(path).map_err(|err| BboxeeError::from_io(path, err))?;
    serde_json::from_str(&text).map_err(|source| BboxeeError::DocumentParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Groups the detections of `batch` by image directory, keeping those at or
/// above `confidence`. Relative image paths are resolved against `base`.
pub fn from_batch_output(
    batch: &BatchOutput,
    base: &Path,
    confidence: f64,
) -> BTreeMap<PathBuf, AnnotationDocument> {
    let mut documents: BTreeMap<PathBuf, AnnotationDocument> = BTreeMap::new();

    for image in &batch.images {
        if let Some(failure) = &image.failure {
            log::warn!("Skipping {}: detector reported '{failure}'", image.file);
            continue;
        }
        let path = base.join(&image.file);
        let (Some(directory), Some(name)) = (path.parent(), path.file_name()) else {
            continue;
        };

        let annotations: Vec<AnnotationBlock> = image
            .detections
            .iter()
            .flatten()
            .filter(|detection| detection.conf >= confidence)
            .filter_map(|detection| {
                let [x, y, w, h] = detection.bbox;
                let bbox = BBox::from_xywh(x, y, w, h).clip(1.0, 1.0);
                if !bbox.is_valid() {
                    log::debug!("Dropping degenerate box on {}", image.file);
                    return None;
                }
                let label = batch
                    .detection_categories
                    .get(&detection.category)
                    .cloned()
                    .unwrap_or_else(|| detection.category.clone());
                Some(AnnotationBlock::machine(bbox, label, detection.conf))
            })
            .collect();

        let document = documents.entry(directory.to_path_buf()).or_default();
        if annotations.is_empty() {
            continue;
        }
        document.images.insert(
            name.to_string_lossy().into_owned(),
            ImageEntry {
                annotations,
                ..Default::default()
            },
        );
    }
    documents
}

/// Writes one `<dir>/<dirname>.bbx` per image directory in the batch file at
/// `input`. Images already annotated in an existing document are left as
/// they are. Returns the written paths.
pub fn from_megadetector(input: &Path, confidence: f64) -> Result<Vec<PathBuf>, BboxeeError> {
    let batch = read_batch_output(input)?;
    let base = input
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut written = Vec::new();
    for (directory, detected) in from_batch_output(&batch, base, confidence) {
        if !directory.is_dir() {
            log::warn!("Skipping {}: not a directory", directory.display());
            continue;
        }
        let path = Session::default_document_path(&directory);
        let mut document = if path.is_file() {
            read_bbx(&path)?
        } else {
            AnnotationDocument::new()
        };
        for (name, entry) in detected.images {
            document.images.entry(name).or_insert(entry);
        }
        write_bbx(&path, &document)?;
        log::info!(
            "Wrote {} ({} annotated images)",
            path.display(),
            document.images.len()
        );
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(label: &str, confidence: f64) -> AnnotationDocument {
        let mut document = AnnotationDocument::new();
        let mut entry = ImageEntry::default();
        entry.annotations.push(AnnotationBlock::machine(
            BBox::from_xyxy(0.1, 0.2, 0.4, 0.6),
            label,
            confidence,
        ));
        document.images.insert("IMG_0001.JPG".into(), entry);
        document
    }

    #[test]
    fn timelapse_uses_sorted_one_based_ids() {
        let temp = tempfile::tempdir().expect("temp dir");
        let a = temp.path().join("site").join("cam1");
        let b = temp.path().join("site").join("cam2");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        write_bbx(&a.join("cam1.bbx"), &doc_with("elk", 0.9)).unwrap();
        write_bbx(&b.join("cam2.bbx"), &doc_with("deer", 0.7)).unwrap();

        let output = to_timelapse(temp.path()).expect("convert");
        assert_eq!(output.detection_categories["1"], "deer");
        assert_eq!(output.detection_categories["2"], "elk");
        assert_eq!(output.images.len(), 2);
        assert_eq!(output.images[0].file, "site/cam1/IMG_0001.JPG");

        let detection = &output.images[0].detections.as_ref().unwrap()[0];
        assert_eq!(detection.category, "2");
        assert_eq!(detection.conf, 0.9);
        let expected = [0.1, 0.2, 0.3, 0.4];
        for (got, want) in detection.bbox.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn megadetector_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir");
        let cam = temp.path().join("cam1");
        fs::create_dir_all(&cam).unwrap();

        let batch = BatchOutput {
            images: vec![
                BatchImage {
                    file: "cam1/a.jpg".into(),
                    detections: Some(vec![
                        BatchDetection {
                            category: "1".into(),
                            conf: 0.8,
                            bbox: [0.1, 0.1, 0.2, 0.2],
                        },
                        BatchDetection {
                            category: "2".into(),
                            conf: 0.1,
                            bbox: [0.5, 0.5, 0.2, 0.2],
                        },
                    ]),
                    failure: None,
                },
                BatchImage {
                    file: "cam1/b.jpg".into(),
                    detections: None,
                    failure: Some("Failure image access".into()),
                },
            ],
            detection_categories: [("1".into(), "animal".into()), ("2".into(), "person".into())]
                .into_iter()
                .collect(),
            info: None,
        };
        let input = temp.path().join("md.json");
        fs::write(&input, serde_json::to_string(&batch).unwrap()).unwrap();

        let written = from_megadetector(&input, 0.5).expect("convert");
        assert_eq!(written, vec![cam.join("cam1.bbx")]);

        let document = read_bbx(&written[0]).expect("read");
        let blocks = document.annotations("a.jpg");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].label, "animal");
        assert_eq!(blocks[0].confidence, 0.8);
        assert!((blocks[0].bbox.xmax() - 0.3).abs() < 1e-9);
        assert!(!document.images.contains_key("b.jpg"));
    }

    #[test]
    fn existing_entries_are_kept() {
        let temp = tempfile::tempdir().expect("temp dir");
        let cam = temp.path().join("cam1");
        fs::create_dir_all(&cam).unwrap();
        let mut existing = doc_with("deer", 1.0);
        existing.images.insert(
            "a.jpg".into(),
            existing.images["IMG_0001.JPG"].clone(),
        );
        write_bbx(&cam.join("cam1.bbx"), &existing).unwrap();

        let batch = r#"{"images": [{"file": "cam1/a.jpg", "detections": [
            {"category": "1", "conf": 0.9, "bbox": [0.0, 0.0, 0.5, 0.5]}]}],
            "detection_categories": {"1": "animal"}}"#;
        let input = temp.path().join("md.json");
        fs::write(&input, batch).unwrap();

        from_megadetector(&input, 0.2).expect("convert");
        let document = read_bbx(&cam.join("cam1.bbx")).unwrap();
        assert_eq!(document.annotations("a.jpg")[0].label, "deer");
    }
}
