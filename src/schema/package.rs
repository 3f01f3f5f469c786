//! The package document: a portable bundle of curated images.
//!
//! `metadata.json` holds a [`PackageDocument`]; the JPEG bytes of every entry
//! live back to back in a companion `images.bin`, addressed by
//! [`ImageData::start`] and [`ImageData::size`].

use serde::{Deserialize, Serialize};

use super::document::AnnotationBlock;

/// Label vocabulary plus one entry per bundled image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub images: Vec<PackageEntry>,
}

/// One image in a package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Directory the image was read from.
    #[serde(default)]
    pub directory: String,

    pub file_name: String,

    #[serde(default)]
    pub mask_name: String,

    #[serde(default)]
    pub attribution: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub license_url: String,

    /// Capture timestamp. Reserved: image metadata is not read, so writers
    /// leave it empty.
    #[serde(default)]
    pub date_captured: String,

    #[serde(default)]
    pub annotations: Vec<AnnotationBlock>,

    pub image_data: ImageData,
}

/// Location and size of one JPEG inside `images.bin`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub start: u64,
    pub size: u64,
    pub height: u32,
    pub width: u32,
}

impl ImageData {
    /// Byte range of the image inside the blob, or `None` when the end
    /// does not fit in `usize`.
    pub fn range(&self) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(self.start).ok()?;
        let end = usize::try_from(self.start.checked_add(self.size)?).ok()?;
        Some(start..end)
    }
}
