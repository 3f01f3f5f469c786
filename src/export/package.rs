//! Portable package writer and reader.
//!
//! A package is `images.bin`, the JPEG bytes of every image back to back,
//! plus `metadata.json`, a [`PackageDocument`] locating each image in the
//! blob. Packages are not split; every image is written in shuffle order.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{DatasetWriter, EncodedImage, ExportContext, Split};
use crate::error::BboxeeError;
use crate::filter::CandidateImage;
use crate::schema::{ImageData, PackageDocument, PackageEntry};

pub const IMAGES_BIN: &str = "images.bin";
pub const METADATA_JSON: &str = "metadata.json";

pub(crate) struct PackageWriter {
    context: ExportContext,
    blob: Option<BufWriter<File>>,
    offset: u64,
    document: PackageDocument,
}

impl PackageWriter {
    pub fn new(context: ExportContext) -> Self {
        let document = PackageDocument {
            labels: context.labels.clone(),
            images: Vec::new(),
        };
        Self {
            context,
            blob: None,
            offset: 0,
            document,
        }
    }
}

impl DatasetWriter for PackageWriter {
    fn targets(&self) -> Vec<PathBuf> {
        vec![PathBuf::from(IMAGES_BIN), PathBuf::from(METADATA_JSON)]
    }

    fn begin(&mut self) -> Result<(), BboxeeError> {
        let path = self.context.dir.join(IMAGES_BIN);
        let file = File::create(&path).map_err(|err| BboxeeError::from_io(&path, err))?;
        self.blob = Some(BufWriter::new(file));
        Ok(())
    }

    fn write(
        &mut self,
        _split: Split,
        _index: usize,
        image: &CandidateImage,
        encoded: EncodedImage,
    ) -> Result<(), BboxeeError> {
        let blob = self
            .blob
            .as_mut()
            .ok_or_else(|| BboxeeError::InvalidArgument("package blob is not open".into()))?;
        blob.write_all(&encoded.bytes)?;

        let size = encoded.bytes.len() as u64;
        self.document.images.push(PackageEntry {
            directory: image.directory.to_string_lossy().into_owned(),
            file_name: image.file_name.clone(),
            mask_name: image.mask_name.clone(),
            attribution: image.attribution.clone(),
            license: image.license.clone(),
            license_url: image.license_url.clone(),
            date_captured: String::new(),
            annotations: image.annotations.clone(),
            image_data: ImageData {
                start: self.offset,
                size,
                height: encoded.height,
                width: encoded.width,
            },
        });
        self.offset += size;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BboxeeError> {
        if let Some(mut blob) = self.blob.take() {
            blob.flush()?;
        }
        let path = self.context.dir.join(METADATA_JSON);
        let json = serde_json::to_string_pretty(&self.document).map_err(|source| {
            BboxeeError::JsonWrite {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(|err| BboxeeError::from_io(&path, err))
    }
}

/// A package read back from disk.
#[derive(Clone, Debug, PartialEq)]
pub struct Package {
    pub document: PackageDocument,
    blob: Vec<u8>,
}

impl Package {
    pub fn entries(&self) -> &[PackageEntry] {
        &self.document.images
    }

    /// JPEG bytes of `entry`.
    pub fn image_bytes(&self, entry: &PackageEntry) -> Result<&[u8], BboxeeError> {
        let range = entry.image_data.range();
        range.and_then(|range| self.blob.get(range)).ok_or_else(|| {
            BboxeeError::InvalidArgument(format!(
                "image {} lies outside {IMAGES_BIN} ({} bytes)",
                entry.file_name,
                self.blob.len()
            ))
        })
    }
}

/// Reads `metadata.json` and `images.bin` from `dir`.
pub fn read_package(dir: &Path) -> Result<Package, BboxeeError> {
    let metadata = dir.join(METADATA_JSON);
    let text = fs::read_to_string(&metadata).map_err(|err| BboxeeError::from_io(&metadata, err))?;
    let document: PackageDocument =
        serde_json::from_str(&text).map_err(|source| BboxeeError::DocumentParse {
            path: metadata.clone(),
            source,
        })?;

    let blob_path = dir.join(IMAGES_BIN);
    let blob = fs::read(&blob_path).map_err(|err| BboxeeError::from_io(&blob_path, err))?;
    log::debug!(
        "Read package {} with {} images",
        dir.display(),
        document.images.len()
    );
    Ok(Package { document, blob })
}
