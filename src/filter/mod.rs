//! Discovery, filtering, and remapping of annotation documents.
//!
//! A scan walks a directory tree for `.bbx` files and summarizes each one.
//! Filtering then flattens the scanned documents into [`CandidateImage`]s,
//! the unit every exporter consumes, and remapping rewrites their labels.

mod summary;

pub use summary::{FileSummary, Summary};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BboxeeError;
use crate::schema::io_bbx::{read_bbx, BBX_EXTENSION};
use crate::schema::{is_negative_label, AnnotationBlock, AnnotationDocument, LabelRemap, Mask};
use crate::worker::{Reporter, WorkerHandle};

/// A document found by a scan.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub document: AnnotationDocument,
}

impl SourceDocument {
    /// Directory the document's image names are relative to.
    pub fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Everything a scan found.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scan {
    pub documents: Vec<SourceDocument>,
    pub summary: Summary,
}

pub type ScanOutcome = Result<Scan, BboxeeError>;

/// Lists every `.bbx` file under `root`, sorted by path.
pub fn find_documents(root: &Path) -> Result<Vec<PathBuf>, BboxeeError> {
    let mut paths = Vec::new();
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
        let path = entry.path();
        let is_bbx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(BBX_EXTENSION));
        if entry.file_type().is_file() && is_bbx {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Reads and summarizes every document under `root`, publishing one
/// progress event per file. Cancellation returns the files read so far.
pub fn scan_with(root: &Path, reporter: &Reporter<FileSummary, ScanOutcome>) -> ScanOutcome {
    let mut scan = Scan::default();
    for (index, path) in find_documents(root)?.into_iter().enumerate() {
        if reporter.is_cancelled() {
            break;
        }
        let document = read_bbx(&path)?;
        let summary = FileSummary::from_document(path.clone(), &document);
        reporter.progress(index, path.display().to_string(), summary.clone());
        scan.summary.files.push(summary);
        scan.documents.push(SourceDocument { path, document });
    }
    log::info!(
        "Scanned {} documents under {}",
        scan.documents.len(),
        root.display()
    );
    Ok(scan)
}

/// Scans on the calling thread.
pub fn scan(root: &Path) -> ScanOutcome {
    let (sender, _events) = std::sync::mpsc::channel();
    let reporter = Reporter::new(sender, Default::default());
    scan_with(root, &reporter)
}

/// Scans on a worker thread.
pub fn start_scan(root: PathBuf) -> Result<WorkerHandle<FileSummary, ScanOutcome>, BboxeeError> {
    WorkerHandle::spawn("scan", move |reporter| scan_with(&root, reporter))
}

/// Which annotations and images survive filtering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Keep only boxes whose label matches; empty keeps every label.
    pub label: String,
    pub case_sensitive: bool,
    /// Match the whole label instead of a substring.
    pub exact: bool,
    /// Keep only images flagged for review.
    pub review_only: bool,
    pub exclude_occluded: bool,
    pub exclude_truncated: bool,
    pub exclude_difficult: bool,
}

impl FilterOptions {
    fn label_matches(&self, label: &str) -> bool {
        if self.label.is_empty() {
            return true;
        }
        let (query, label) = if self.case_sensitive {
            (self.label.clone(), label.to_string())
        } else {
            (self.label.to_lowercase(), label.to_lowercase())
        };
        if self.exact {
            label == query
        } else {
            label.contains(&query)
        }
    }

    /// True when `block` passes every annotation-level predicate.
    pub fn accepts(&self, block: &AnnotationBlock) -> bool {
        !(self.exclude_occluded && block.occluded.is_yes()
            || self.exclude_truncated && block.truncated.is_yes()
            || self.exclude_difficult && block.difficult.is_yes())
            && self.label_matches(&block.label)
    }
}

/// One image selected for export, with its surviving boxes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateImage {
    pub directory: PathBuf,
    pub file_name: String,
    pub mask_name: String,
    pub attribution: String,
    pub license: String,
    pub license_url: String,
    pub annotations: Vec<AnnotationBlock>,
}

impl CandidateImage {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// True when the only box is the "negative" background marker.
    pub fn is_negative(&self) -> bool {
        matches!(self.annotations.as_slice(), [only] if is_negative_label(&only.label))
    }
}

/// Filtered images plus the masks of the directories they came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub images: Vec<CandidateImage>,
    /// Mask per source directory, for directories that have one.
    pub masks: BTreeMap<PathBuf, Mask>,
}

impl Selection {
    pub fn mask_for(&self, image: &CandidateImage) -> Option<&Mask> {
        self.masks.get(&image.directory)
    }
}

/// Flattens `documents` into candidate images.
///
/// Images listed in `skip_export` never appear. Images left with no boxes
/// after the annotation predicates are dropped.
pub fn filter(documents: &[SourceDocument], options: &FilterOptions) -> Selection {
    let mut selection = Selection::default();

    for source in documents {
        let document = &source.document;
        let directory = source.directory().to_path_buf();
        let mut used = false;

        for (name, entry) in &document.images {
            if document.skip_export.contains(name) {
                continue;
            }
            if options.review_only && !document.review.contains(name) {
                continue;
            }
            let annotations: Vec<AnnotationBlock> = entry
                .annotations
                .iter()
                .filter(|block| options.accepts(block))
                .cloned()
                .collect();
            if annotations.is_empty() {
                continue;
            }

            used = true;
            selection.images.push(CandidateImage {
                directory: directory.clone(),
                file_name: name.clone(),
                mask_name: document.mask_name.clone(),
                attribution: entry.attribution.clone(),
                license: entry.license.clone(),
                license_url: entry.license_url.clone(),
                annotations,
            });
        }

        if let (true, Some(mask)) = (used, &document.mask) {
            selection.masks.insert(directory, mask.clone());
        }
    }

    log::debug!("Filter kept {} images", selection.images.len());
    selection
}

/// Rewrites labels through `remap`.
///
/// Excluded boxes are dropped, then images with no boxes left. Negative
/// markers are kept as they are so background images survive.
pub fn apply_remap(images: Vec<CandidateImage>, remap: &LabelRemap) -> Vec<CandidateImage> {
    images
        .into_iter()
        .filter_map(|mut image| {
            image.annotations = image
                .annotations
                .into_iter()
                .filter_map(|mut block| {
                    if is_negative_label(&block.label) {
                        return Some(block);
                    }
                    block.label = remap.apply(&block.label)?;
                    Some(block)
                })
                .collect();
            (!image.annotations.is_empty()).then_some(image)
        })
        .collect()
}

/// Sorted class vocabulary of `images`, without the negative marker.
pub fn vocabulary(images: &[CandidateImage]) -> Vec<String> {
    LabelRemap::new().vocabulary(
        images
            .iter()
            .flat_map(|image| image.annotations.iter())
            .map(|block| block.label.as_str())
            .filter(|label| !is_negative_label(label)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::io_bbx::write_bbx;
    use crate::schema::{BBox, ImageEntry, YesNo};

    fn block(label: &str) -> AnnotationBlock {
        AnnotationBlock::human(BBox::from_xyxy(0.1, 0.1, 0.3, 0.3), label)
    }

    fn source(images: &[(&str, Vec<AnnotationBlock>)]) -> SourceDocument {
        let mut document = AnnotationDocument::new();
        for (name, blocks) in images {
            let mut entry = ImageEntry::default();
            entry.annotations = blocks.clone();
            document.images.insert(name.to_string(), entry);
        }
        SourceDocument {
            path: PathBuf::from("site/site.bbx"),
            document,
        }
    }

    #[test]
    fn remap_renames_and_excludes() {
        let documents = [source(&[
            ("a.jpg", vec![block("deer"), block("person")]),
            ("b.jpg", vec![block("person")]),
        ])];
        let mut remap = LabelRemap::new();
        remap.insert("deer", "animal");
        remap.insert("person", "EXCLUDE");

        let images = apply_remap(filter(&documents, &FilterOptions::default()).images, &remap);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].file_name, "a.jpg");
        assert_eq!(images[0].annotations.len(), 1);
        assert_eq!(images[0].annotations[0].label, "animal");
    }

    #[test]
    fn negative_images_survive_remap() {
        let documents = [source(&[("a.jpg", vec![block("Negative")])])];
        let mut remap = LabelRemap::new();
        remap.insert("Negative", "exclude");

        let images = apply_remap(filter(&documents, &FilterOptions::default()).images, &remap);
        assert_eq!(images.len(), 1);
        assert!(images[0].is_negative());
        assert!(vocabulary(&images).is_empty());
    }

    #[test]
    fn label_predicates() {
        let documents = [source(&[(
            "a.jpg",
            vec![block("Mule Deer"), block("deer"), block("elk")],
        )])];

        let options = FilterOptions {
            label: "deer".into(),
            ..Default::default()
        };
        assert_eq!(filter(&documents, &options).images[0].annotations.len(), 2);

        let options = FilterOptions {
            label: "Deer".into(),
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(filter(&documents, &options).images[0].annotations.len(), 1);

        let options = FilterOptions {
            label: "deer".into(),
            exact: true,
            ..Default::default()
        };
        assert_eq!(filter(&documents, &options).images[0].annotations.len(), 1);
    }

    #[test]
    fn flags_review_and_skip_export() {
        let mut truncated = block("deer");
        truncated.truncated = YesNo::Yes;
        let mut doc = source(&[
            ("a.jpg", vec![truncated]),
            ("b.jpg", vec![block("elk")]),
            ("c.jpg", vec![block("elk")]),
        ]);
        doc.document.review.insert("b.jpg".into());
        doc.document.review.insert("c.jpg".into());
        doc.document.skip_export.insert("c.jpg".into());
        let documents = [doc];

        let options = FilterOptions {
            exclude_truncated: true,
            ..Default::default()
        };
        let names: Vec<_> = filter(&documents, &options)
            .images
            .into_iter()
            .map(|image| image.file_name)
            .collect();
        assert_eq!(names, vec!["b.jpg"]);

        let options = FilterOptions {
            review_only: true,
            ..Default::default()
        };
        assert_eq!(filter(&documents, &options).images.len(), 1);
    }

    #[test]
    fn scan_finds_nested_documents() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let nested = temp.path().join("site").join("cam1");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let doc = source(&[("a.jpg", vec![block("deer")])]).document;
        write_bbx(&nested.join("cam1.bbx"), &doc).expect("write");
        write_bbx(&temp.path().join("root.BBX"), &doc).expect("write");
        std::fs::write(temp.path().join("notes.json"), "{}").expect("write");

        let scan = scan(temp.path()).expect("scan");
        assert_eq!(scan.documents.len(), 2);
        assert_eq!(scan.summary.total_boxes(), 2);
        assert_eq!(scan.documents[1].directory(), nested.as_path());
    }
}
