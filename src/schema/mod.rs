//! Annotation schema and document store.
//!
//! This module defines the on-disk shapes bboxee reads and writes: the
//! `.bbx` annotation document, the package document used for portable
//! bundles, the `bboxee_config.json` configuration, label remaps, and
//! detector label maps.
//!
//! # Design Principles
//!
//! 1. **Type Safety**: boxes carry a marker type for their coordinate space,
//!    so editor pixels and stored normalized values cannot be mixed.
//!
//! 2. **Forward Compatibility**: every document field defaults when absent,
//!    and legacy schema tags are upgraded in memory on read.
//!
//! # Example
//!
//! ```
//! use bboxee::schema::{AnnotationBlock, AnnotationDocument, BBox, ImageEntry, Normalized};
//!
//! let mut document = AnnotationDocument::new();
//! let mut entry = ImageEntry::default();
//! entry.annotations.push(AnnotationBlock::human(
//!     BBox::<Normalized>::from_xyxy(0.1, 0.1, 0.5, 0.4),
//!     "deer",
//! ));
//! document.images.insert("IMG_0001.JPG".to_string(), entry);
//! assert_eq!(document.annotation_count(), 1);
//! ```

mod bbox;
pub mod config;
mod coord;
mod document;
pub mod io_bbx;
pub mod label_map;
mod package;
pub mod remap;
mod space;

pub use bbox::BBox;
pub use config::Config;
pub use coord::Coord;
pub use document::{
    is_negative_label, upgrade_schema, AnnotationBlock, AnnotationDocument, Author, Flag,
    ImageEntry, LicenseInfo, Mask, Updater, YesNo, DOCUMENT_SCHEMA, LEGACY_DOCUMENT_SCHEMA,
    NEGATIVE_LABEL, UNCLASSIFIED_LABEL,
};
pub use label_map::LabelMap;
pub use package::{ImageData, PackageDocument, PackageEntry};
pub use remap::{LabelRemap, RemapTarget};
pub use space::{Normalized, Pixel};
