//! The annotation document stored in `.bbx` files.
//!
//! A document describes every box drawn on the images of one directory.
//! Image names are relative to the directory holding the document. All
//! fields default when absent so that older documents still load; see
//! [`upgrade_schema`] for the version handling.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::bbox::BBox;
use super::space::Normalized;

/// Schema tag written by this crate.
pub const DOCUMENT_SCHEMA: &str = "1.1.0";

/// Schema tag of documents that predate `review` and `skip_export`.
pub const LEGACY_DOCUMENT_SCHEMA: &str = "1.0.0";

/// Label given to boxes that have not been classified yet.
pub const UNCLASSIFIED_LABEL: &str = "N/A";

/// Label marking an image as intentionally empty background.
pub const NEGATIVE_LABEL: &str = "negative";

/// Returns true when `label` is the negative-image marker (case-insensitive).
pub fn is_negative_label(label: &str) -> bool {
    label.eq_ignore_ascii_case(NEGATIVE_LABEL)
}

/// All boxes for one image directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    /// Binary mask applied to every image in the directory.
    #[serde(default)]
    pub mask: Option<Mask>,

    #[serde(default)]
    pub mask_name: String,

    /// Image file name (relative to the document) to its entry.
    #[serde(default)]
    pub images: BTreeMap<String, ImageEntry>,

    /// Chain of reviewers, oldest first.
    #[serde(default)]
    pub analysts: Vec<String>,

    /// Images flagged for a second look.
    #[serde(default)]
    pub review: BTreeSet<String>,

    /// Images excluded from dataset export.
    #[serde(default)]
    pub skip_export: BTreeSet<String>,

    #[serde(default = "legacy_schema")]
    pub schema: String,
}

fn legacy_schema() -> String {
    LEGACY_DOCUMENT_SCHEMA.to_string()
}

impl Default for AnnotationDocument {
    fn default() -> Self {
        Self {
            mask: None,
            mask_name: String::new(),
            images: BTreeMap::new(),
            analysts: Vec::new(),
            review: BTreeSet::new(),
            skip_export: BTreeSet::new(),
            schema: DOCUMENT_SCHEMA.to_string(),
        }
    }
}

impl AnnotationDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations for `image`, empty when the image has no entry.
    pub fn annotations(&self, image: &str) -> &[AnnotationBlock] {
        self.images
            .get(image)
            .map(|entry| entry.annotations.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of boxes across all images.
    pub fn annotation_count(&self) -> usize {
        self.images.values().map(|e| e.annotations.len()).sum()
    }

    /// Drops entries whose annotation list is empty; an empty entry is
    /// equivalent to the image being absent.
    pub fn collapse_empty(&mut self) {
        self.images.retain(|_, entry| !entry.annotations.is_empty());
    }

    /// Reorders and clips every box into the unit square, then drops blocks
    /// that are still degenerate. Returns how many blocks were changed or
    /// dropped.
    pub fn repair_boxes(&mut self) -> usize {
        let mut touched = 0;
        for entry in self.images.values_mut() {
            entry.annotations.retain_mut(|block| {
                let repaired = BBox::from_corners(block.bbox.min, block.bbox.max).clip(1.0, 1.0);
                let valid = repaired.is_valid();
                if !valid || repaired != block.bbox {
                    touched += 1;
                }
                block.bbox = repaired;
                valid
            });
        }
        touched
    }
}

/// Moves a document tagged with the legacy schema to [`DOCUMENT_SCHEMA`].
///
/// Missing `review` and `skip_export` sets are already defaulted by serde,
/// so only the tag changes. Returns true when an upgrade happened.
pub fn upgrade_schema(document: &mut AnnotationDocument) -> bool {
    if document.schema == LEGACY_DOCUMENT_SCHEMA {
        document.schema = DOCUMENT_SCHEMA.to_string();
        true
    } else {
        false
    }
}

/// Per-image licensing and annotations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    #[serde(default)]
    pub attribution: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub license_url: String,

    #[serde(default)]
    pub annotations: Vec<AnnotationBlock>,
}

impl ImageEntry {
    /// Creates an empty entry carrying the given license.
    pub fn with_license(license: &LicenseInfo) -> Self {
        Self {
            attribution: license.attribution.clone(),
            license: license.name.clone(),
            license_url: license.url.clone(),
            annotations: Vec::new(),
        }
    }

    /// Overwrites the licensing fields.
    pub fn set_license(&mut self, license: &LicenseInfo) {
        self.attribution = license.attribution.clone();
        self.license = license.name.clone();
        self.license_url = license.url.clone();
    }
}

/// License fields applied to image entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub attribution: String,
}

/// Who drew a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Human,
    Machine,
}

/// Whether a human has touched a box since it was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Updater {
    #[default]
    #[serde(rename = "")]
    Nobody,
    #[serde(rename = "human")]
    Human,
}

/// A "Y"/"N" attribute flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum YesNo {
    #[serde(rename = "Y")]
    Yes,
    #[default]
    #[serde(rename = "N")]
    No,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        self == YesNo::Yes
    }

    pub fn toggled(self) -> Self {
        match self {
            YesNo::Yes => YesNo::No,
            YesNo::No => YesNo::Yes,
        }
    }
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value {
            YesNo::Yes
        } else {
            YesNo::No
        }
    }
}

/// Per-annotation attribute flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Occluded,
    Truncated,
    Difficult,
}

/// One labeled bounding box on one image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBlock {
    pub bbox: BBox<Normalized>,

    #[serde(default = "unclassified")]
    pub label: String,

    #[serde(default = "full_confidence")]
    pub confidence: f64,

    pub created_by: Author,

    #[serde(default)]
    pub updated_by: Updater,

    #[serde(default)]
    pub occluded: YesNo,

    #[serde(default)]
    pub truncated: YesNo,

    #[serde(default)]
    pub difficult: YesNo,
}

fn unclassified() -> String {
    UNCLASSIFIED_LABEL.to_string()
}

fn full_confidence() -> f64 {
    1.0
}

impl AnnotationBlock {
    /// A box drawn by an operator, with full confidence.
    pub fn human(bbox: BBox<Normalized>, label: impl Into<String>) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: 1.0,
            created_by: Author::Human,
            updated_by: Updater::Nobody,
            occluded: YesNo::No,
            truncated: YesNo::No,
            difficult: YesNo::No,
        }
    }

    /// A box proposed by a detector.
    pub fn machine(bbox: BBox<Normalized>, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            confidence,
            created_by: Author::Machine,
            ..Self::human(bbox, label)
        }
    }

    pub fn flag(&self, flag: Flag) -> YesNo {
        match flag {
            Flag::Occluded => self.occluded,
            Flag::Truncated => self.truncated,
            Flag::Difficult => self.difficult,
        }
    }

    pub fn set_flag(&mut self, flag: Flag, value: YesNo) {
        match flag {
            Flag::Occluded => self.occluded = value,
            Flag::Truncated => self.truncated = value,
            Flag::Difficult => self.difficult = value,
        }
    }

    /// Records a human edit: the box is now fully trusted.
    pub fn touch(&mut self) {
        self.updated_by = Updater::Human;
        self.confidence = 1.0;
    }
}

/// A 2-D binary mask, stored row-major as nested arrays of 0/1.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mask(pub Vec<Vec<u8>>);

impl Mask {
    /// Builds a mask of the given size where every cell is `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Mask(vec![vec![value; width as usize]; height as usize])
    }

    pub fn width(&self) -> u32 {
        self.0.first().map(|row| row.len() as u32).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.0.len() as u32
    }

    /// True when every row has the same length.
    pub fn is_rectangular(&self) -> bool {
        let width = self.width() as usize;
        self.0.iter().all(|row| row.len() == width)
    }

    /// Mask value at (x, y); out-of-range cells read as 0.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.0
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_document_defaults_missing_fields() {
        let json = r#"{
            "mask": null,
            "mask_name": "",
            "images": {},
            "analysts": ["alice"],
            "schema": "1.0.0"
        }"#;
        let mut doc: AnnotationDocument = serde_json::from_str(json).expect("parse");
        assert!(doc.review.is_empty());
        assert!(doc.skip_export.is_empty());
        assert!(upgrade_schema(&mut doc));
        assert_eq!(doc.schema, DOCUMENT_SCHEMA);
        assert!(!upgrade_schema(&mut doc));
    }

    #[test]
    fn block_serializes_flags_and_authors() {
        let block = AnnotationBlock::machine(BBox::from_xyxy(0.1, 0.1, 0.2, 0.2), "deer", 0.8);
        let json = serde_json::to_value(&block).expect("serialize");
        assert_eq!(json["created_by"], "machine");
        assert_eq!(json["updated_by"], "");
        assert_eq!(json["occluded"], "N");

        let mut touched = block.clone();
        touched.touch();
        touched.set_flag(Flag::Truncated, YesNo::Yes);
        let json = serde_json::to_value(&touched).expect("serialize");
        assert_eq!(json["updated_by"], "human");
        assert_eq!(json["truncated"], "Y");
        assert_eq!(json["confidence"], 1.0);
    }

    #[test]
    fn collapse_empty_removes_entries() {
        let mut doc = AnnotationDocument::new();
        doc.images.insert("a.jpg".into(), ImageEntry::default());
        doc.collapse_empty();
        assert!(doc.images.is_empty());
    }

    #[test]
    fn mask_dimensions() {
        let mask = Mask::filled(4, 3, 1);
        assert_eq!(mask.width(), 4);
        assert_eq!(mask.height(), 3);
        assert!(mask.is_rectangular());
        assert_eq!(mask.get(10, 10), 0);

        let ragged = Mask(vec![vec![1, 1], vec![1]]);
        assert!(!ragged.is_rectangular());
    }
}
