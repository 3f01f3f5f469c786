//! Reading and writing `.bbx` annotation documents.
//!
//! Documents are UTF-8 JSON. Readers accept schema `1.0.0` and upgrade it in
//! memory; writers always tag [`DOCUMENT_SCHEMA`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::document::{upgrade_schema, AnnotationDocument, DOCUMENT_SCHEMA};
use crate::error::BboxeeError;

/// File extension of annotation documents.
pub const BBX_EXTENSION: &str = "bbx";

/// Reads a document from disk, upgrading legacy schemas.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_bbx(path: &Path) -> Result<AnnotationDocument, BboxeeError> {
    let file = File::open(path).map_err(|err| BboxeeError::from_io(path, err))?;
    let reader = BufReader::new(file);

    let mut document: AnnotationDocument =
        serde_json::from_reader(reader).map_err(|source| BboxeeError::DocumentParse {
            path: path.to_path_buf(),
            source,
        })?;

    if upgrade_schema(&mut document) {
        log::info!("Upgraded {} to schema {}", path.display(), DOCUMENT_SCHEMA);
    }
    let repaired = document.repair_boxes();
    if repaired > 0 {
        log::warn!(
            "Clipped or dropped {repaired} out-of-range boxes in {}",
            path.display()
        );
    }
    Ok(document)
}

/// Writes a document to disk with the current schema tag.
///
/// Entries with no annotations are dropped from the written form.
pub fn write_bbx(path: &Path, document: &AnnotationDocument) -> Result<(), BboxeeError> {
    let json = to_bbx_string(document).map_err(|source| BboxeeError::JsonWrite {
        path: path.to_path_buf(),
        source,
    })?;

    let file = File::create(path).map_err(|err| BboxeeError::from_io(path, err))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(json.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|err| BboxeeError::from_io(path, err))
}

/// Parses a document from a string, upgrading legacy schemas.
///
/// Boxes are clipped to the unit square; boxes with no area left are dropped.
pub fn from_bbx_str(json: &str) -> Result<AnnotationDocument, serde_json::Error> {
    let mut document: AnnotationDocument = serde_json::from_str(json)?;
    upgrade_schema(&mut document);
    document.repair_boxes();
    Ok(document)
}

/// Parses a document from raw bytes.
///
/// Useful for fuzzing and processing raw bytes without UTF-8 validation overhead.
pub fn from_bbx_slice(bytes: &[u8]) -> Result<AnnotationDocument, serde_json::Error> {
    let mut document: AnnotationDocument = serde_json::from_slice(bytes)?;
    upgrade_schema(&mut document);
    document.repair_boxes();
    Ok(document)
}

/// Serializes a document in its on-disk form.
pub fn to_bbx_string(document: &AnnotationDocument) -> Result<String, serde_json::Error> {
    let mut normalized = document.clone();
    normalized.schema = DOCUMENT_SCHEMA.to_string();
    normalized.collapse_empty();
    serde_json::to_string_pretty(&normalized)
}
