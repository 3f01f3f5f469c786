//! The annotation session: one document bound to one image directory.
//!
//! The session exclusively owns the current [`AnnotationDocument`]. Editing
//! operations act on the current image and mark the session dirty; saving
//! is only allowed back into the bound image directory. Background jobs
//! never touch the document; their results come back through
//! [`Session::merge_detections`].

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::editor::{EditEvent, MIN_BOX_SIZE};
use crate::error::BboxeeError;
use crate::image_source::{apply_mask, ImageSource, ToneMap};
use crate::schema::io_bbx::{read_bbx, write_bbx, BBX_EXTENSION};
use crate::schema::{
    AnnotationBlock, AnnotationDocument, BBox, Config, Coord, Flag, ImageEntry, LicenseInfo,
    Normalized, Pixel, UNCLASSIFIED_LABEL,
};

/// Answer to "there are unsaved changes".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptChoice {
    Save,
    Cancel,
    Discard,
}

/// Asks the operator what to do with unsaved changes.
pub trait DirtyPrompt {
    fn ask(&mut self) -> PromptChoice;
}

impl<F: FnMut() -> PromptChoice> DirtyPrompt for F {
    fn ask(&mut self) -> PromptChoice {
        self()
    }
}

/// How a detector result is folded into the session's document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// The result becomes the document; mask and analysts are kept.
    Replace,
    /// Only images without an entry receive the detected boxes.
    Merge,
}

/// The decoded current image.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub name: String,
    pub pixels: RgbImage,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct Session {
    document: AnnotationDocument,
    document_path: Option<PathBuf>,
    source: Option<ImageSource>,
    current_index: usize,
    current_image: Option<LoadedImage>,
    current_row: Option<usize>,
    dirty: bool,
    last_label: String,
    last_license: LicenseInfo,
    config: Config,
    tone_map: ToneMap,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            document: AnnotationDocument::new(),
            document_path: None,
            source: None,
            current_index: 0,
            current_image: None,
            current_row: None,
            dirty: false,
            last_label: UNCLASSIFIED_LABEL.to_string(),
            last_license: config.license.default.clone(),
            config,
            tone_map: ToneMap::default(),
        }
    }

    pub fn document(&self) -> &AnnotationDocument {
        &self.document
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Labels offered to the operator.
    pub fn labels(&self) -> Vec<String> {
        self.config.labels()
    }

    pub fn last_label(&self) -> &str {
        &self.last_label
    }

    pub fn last_license(&self) -> &LicenseInfo {
        &self.last_license
    }

    pub fn image_directory(&self) -> Option<&Path> {
        self.source.as_ref().map(ImageSource::directory)
    }

    pub fn images(&self) -> &[String] {
        self.source.as_ref().map(ImageSource::files).unwrap_or(&[])
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_image(&self) -> Option<&LoadedImage> {
        self.current_image.as_ref()
    }

    /// Name of the current image, if the directory has any.
    pub fn current_name(&self) -> Option<&str> {
        self.images().get(self.current_index).map(String::as_str)
    }

    pub fn current_row(&self) -> Option<usize> {
        self.current_row
    }

    pub fn select_row(&mut self, row: Option<usize>) {
        self.current_row = row.filter(|row| *row < self.current_annotations().len());
    }

    pub fn tone_map_mut(&mut self) -> &mut ToneMap {
        &mut self.tone_map
    }

    /// Current image with the tone map applied, for display.
    pub fn display_pixels(&self) -> Option<RgbImage> {
        let mut pixels = self.current_image.as_ref()?.pixels.clone();
        self.tone_map.apply(&mut pixels);
        Some(pixels)
    }

    /// Annotations of the current image.
    pub fn current_annotations(&self) -> &[AnnotationBlock] {
        match self.current_name() {
            Some(name) => self.document.annotations(name),
            None => &[],
        }
    }

    /// Default document location for a directory: `<dir>/<dirname>.bbx`.
    pub fn default_document_path(directory: &Path) -> PathBuf {
        let stem = directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "annotations".to_string());
        directory.join(format!("{stem}.{BBX_EXTENSION}"))
    }

    /// Gives the operator a chance to keep unsaved changes.
    ///
    /// Returns `Ok(false)` when the operator cancels; the caller must then
    /// abandon whatever would have discarded the changes.
    pub fn confirm_discard(&mut self, prompt: &mut dyn DirtyPrompt) -> Result<bool, BboxeeError> {
        if !self.dirty {
            return Ok(true);
        }
        match prompt.ask() {
            PromptChoice::Cancel => Ok(false),
            PromptChoice::Discard => Ok(true),
            PromptChoice::Save => {
                let path = match (&self.document_path, self.image_directory()) {
                    (Some(path), _) => path.clone(),
                    (None, Some(directory)) => Self::default_document_path(directory),
                    (None, None) => return Ok(true),
                };
                self.save(&path)?;
                Ok(true)
            }
        }
    }

    /// Starts a fresh document over the images of `directory`.
    pub fn open_directory(
        &mut self,
        directory: &Path,
        prompt: &mut dyn DirtyPrompt,
    ) -> Result<bool, BboxeeError> {
        if !self.confirm_discard(prompt)? {
            return Ok(false);
        }
        self.bind(directory, AnnotationDocument::new(), None)?;
        Ok(true)
    }

    /// Reads the document at `path` and binds its parent directory.
    pub fn open_document(
        &mut self,
        path: &Path,
        prompt: &mut dyn DirtyPrompt,
    ) -> Result<bool, BboxeeError> {
        if !self.confirm_discard(prompt)? {
            return Ok(false);
        }
        let document = read_bbx(path)?;
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.bind(directory, document, Some(path.to_path_buf()))?;
        Ok(true)
    }

    fn bind(
        &mut self,
        directory: &Path,
        document: AnnotationDocument,
        document_path: Option<PathBuf>,
    ) -> Result<(), BboxeeError> {
        let source = ImageSource::open(directory)?;
        let config = Config::discover(directory)?;

        self.last_license = config.license.default.clone();
        self.config = config;
        self.document = document;
        self.document_path = document_path;
        self.source = Some(source);
        self.dirty = false;
        self.current_image = None;
        self.current_row = None;
        self.current_index = 0;

        if self.images().is_empty() {
            return Ok(());
        }
        // A mask that misfits the first image may still fit others, so it
        // stays on the document; go_to reports the mismatch per image.
        match self.go_to(0) {
            Err(BboxeeError::DimensionMismatch { .. }) => Ok(()),
            other => other,
        }
    }

    /// Loads image `index` and applies the document mask.
    ///
    /// A mask whose size does not match the image is skipped: the image is
    /// still loaded, unmasked, and the mismatch is returned so the operator
    /// can be told.
    pub fn go_to(&mut self, index: usize) -> Result<(), BboxeeError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| BboxeeError::InvalidArgument("no image directory is open".into()))?;
        let name = source
            .files()
            .get(index)
            .cloned()
            .ok_or_else(|| BboxeeError::ImageNotFound(format!("image #{index}")))?;

        let (mut pixels, (width, height)) = source.load(&name)?;
        self.current_index = index;
        self.current_row = None;

        let masked = match &self.document.mask {
            Some(mask) => apply_mask(&name, &mut pixels, mask),
            None => Ok(()),
        };
        self.current_image = Some(LoadedImage {
            name,
            pixels,
            width,
            height,
        });
        if let Err(err) = &masked {
            log::warn!("Mask not applied: {err}");
        }
        masked
    }

    pub fn next_image(&mut self) -> Result<(), BboxeeError> {
        let last = self.images().len().saturating_sub(1);
        self.go_to((self.current_index + 1).min(last))
    }

    pub fn previous_image(&mut self) -> Result<(), BboxeeError> {
        self.go_to(self.current_index.saturating_sub(1))
    }

    /// Writes the document to `path`, which must be inside the bound image
    /// directory. On failure the session stays dirty.
    pub fn save(&mut self, path: &Path) -> Result<(), BboxeeError> {
        let image_directory = self
            .image_directory()
            .map(Path::to_path_buf)
            .ok_or_else(|| BboxeeError::InvalidArgument("no image directory is open".into()))?;

        let target = path.parent().unwrap_or_else(|| Path::new("."));
        if !same_directory(target, &image_directory) {
            return Err(BboxeeError::Scope {
                path: path.to_path_buf(),
                image_directory,
            });
        }

        write_bbx(path, &self.document)?;
        self.document.collapse_empty();
        self.document_path = Some(path.to_path_buf());
        self.dirty = false;
        log::info!("Saved {}", path.display());
        Ok(())
    }

    /// Appends `name` to the analyst chain unless it is already last.
    pub fn add_analyst(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || self.document.analysts.last().map(String::as_str) == Some(name) {
            return;
        }
        self.document.analysts.push(name.to_string());
        self.dirty = true;
    }

    fn ensure_known(&self, image: &str) -> Result<(), BboxeeError> {
        if self.document.images.contains_key(image) || self.images().iter().any(|f| f == image) {
            Ok(())
        } else {
            Err(BboxeeError::ImageNotFound(image.to_string()))
        }
    }

    /// Flags or unflags `image` for review. Returns the new state.
    pub fn toggle_review(&mut self, image: &str) -> Result<bool, BboxeeError> {
        self.ensure_known(image)?;
        self.dirty = true;
        if self.document.review.remove(image) {
            Ok(false)
        } else {
            self.document.review.insert(image.to_string());
            Ok(true)
        }
    }

    /// Excludes or re-includes `image` in exports. Returns the new state.
    pub fn toggle_skip_export(&mut self, image: &str) -> Result<bool, BboxeeError> {
        self.ensure_known(image)?;
        self.dirty = true;
        if self.document.skip_export.remove(image) {
            Ok(false)
        } else {
            self.document.skip_export.insert(image.to_string());
            Ok(true)
        }
    }

    /// Overwrites the license of every annotated image.
    pub fn apply_license_to_all(&mut self, license: &LicenseInfo) {
        for entry in self.document.images.values_mut() {
            if !entry.annotations.is_empty() {
                entry.set_license(license);
            }
        }
        self.last_license = license.clone();
        self.dirty = true;
    }

    /// Adds a human box to `image` and selects it. Without a label the last
    /// used one is applied. Returns the new row.
    pub fn create_annotation(
        &mut self,
        image: &str,
        bbox: BBox<Normalized>,
        label: Option<&str>,
    ) -> Result<usize, BboxeeError> {
        let bbox = bbox.clip(1.0, 1.0);
        if !bbox.is_valid() {
            return Err(BboxeeError::InvalidArgument(format!(
                "box {bbox:?} is empty or outside the image"
            )));
        }

        let label = label.unwrap_or(&self.last_label).to_string();
        let license = &self.last_license;
        let entry = self
            .document
            .images
            .entry(image.to_string())
            .or_insert_with(|| ImageEntry::with_license(license));
        entry.annotations.push(AnnotationBlock::human(bbox, label));

        let row = entry.annotations.len() - 1;
        if self.current_name() == Some(image) {
            self.current_row = Some(row);
        }
        self.dirty = true;
        Ok(row)
    }

    fn block_mut(&mut self, row: usize) -> Result<&mut AnnotationBlock, BboxeeError> {
        let image = self.current_name().unwrap_or_default().to_string();
        self.document
            .images
            .get_mut(&image)
            .and_then(|entry| entry.annotations.get_mut(row))
            .ok_or(BboxeeError::InvalidRow { image, row })
    }

    /// Moves or resizes a box on the current image. Boxes smaller than
    /// [`MIN_BOX_SIZE`] pixels are ignored. Returns whether it was applied.
    pub fn update_bbox(&mut self, row: usize, bbox: BBox<Normalized>) -> Result<bool, BboxeeError> {
        let bbox = bbox.clip(1.0, 1.0);
        let (min_w, min_h) = match &self.current_image {
            Some(image) => (
                MIN_BOX_SIZE / image.width as f64,
                MIN_BOX_SIZE / image.height as f64,
            ),
            None => (0.0, 0.0),
        };
        if !bbox.is_valid() || bbox.width() < min_w || bbox.height() < min_h {
            log::debug!("Ignoring undersized box {bbox:?}");
            return Ok(false);
        }

        let block = self.block_mut(row)?;
        block.bbox = bbox;
        block.touch();
        self.dirty = true;
        Ok(true)
    }

    pub fn change_label(&mut self, row: usize, label: &str) -> Result<(), BboxeeError> {
        let block = self.block_mut(row)?;
        block.label = label.to_string();
        block.touch();
        self.last_label = label.to_string();
        self.dirty = true;
        Ok(())
    }

    /// Flips one attribute flag. Returns the new value.
    pub fn toggle_flag(&mut self, row: usize, flag: Flag) -> Result<bool, BboxeeError> {
        let block = self.block_mut(row)?;
        let value = block.flag(flag).toggled();
        block.set_flag(flag, value);
        self.dirty = true;
        Ok(value.is_yes())
    }

    /// Removes a box; an image left without boxes loses its entry.
    pub fn delete(&mut self, row: usize) -> Result<AnnotationBlock, BboxeeError> {
        let image = self.current_name().unwrap_or_default().to_string();
        let entry = self
            .document
            .images
            .get_mut(&image)
            .filter(|entry| row < entry.annotations.len())
            .ok_or_else(|| BboxeeError::InvalidRow {
                image: image.clone(),
                row,
            })?;

        let removed = entry.annotations.remove(row);
        if entry.annotations.is_empty() {
            self.document.images.remove(&image);
        }
        self.current_row = None;
        self.dirty = true;
        Ok(removed)
    }

    /// Copies a box, centered at `center` and clipped to the image.
    /// Returns the new row.
    pub fn duplicate(&mut self, row: usize, center: Coord<Normalized>) -> Result<usize, BboxeeError> {
        let source = self.block_mut(row)?.clone();
        let (w, h) = (source.bbox.width(), source.bbox.height());
        let bbox = BBox::from_cxcywh(center.x, center.y, w, h).clip(1.0, 1.0);
        if !bbox.is_valid() {
            return Err(BboxeeError::InvalidArgument(format!(
                "duplicate at ({}, {}) falls outside the image",
                center.x, center.y
            )));
        }

        let mut copy = AnnotationBlock::human(bbox, source.label);
        copy.occluded = source.occluded;
        copy.truncated = source.truncated;
        copy.difficult = source.difficult;

        let image = self.current_name().unwrap_or_default().to_string();
        let annotations = &mut self
            .document
            .images
            .get_mut(&image)
            .ok_or(BboxeeError::InvalidRow { image, row })?
            .annotations;
        annotations.push(copy);
        let new_row = annotations.len() - 1;
        self.current_row = Some(new_row);
        self.dirty = true;
        Ok(new_row)
    }

    /// Folds a detector result into the document.
    pub fn merge_detections(&mut self, detected: AnnotationDocument, mode: MergeMode) {
        let license = self.last_license.clone();
        let with_license = |mut entry: ImageEntry| {
            if entry.license.is_empty() && entry.attribution.is_empty() {
                entry.set_license(&license);
            }
            entry
        };

        match mode {
            MergeMode::Replace => {
                self.document.images = detected
                    .images
                    .into_iter()
                    .filter(|(_, entry)| !entry.annotations.is_empty())
                    .map(|(name, entry)| (name, with_license(entry)))
                    .collect();
            }
            MergeMode::Merge => {
                for (name, entry) in detected.images {
                    if entry.annotations.is_empty() || self.document.images.contains_key(&name) {
                        continue;
                    }
                    self.document.images.insert(name, with_license(entry));
                }
            }
        }
        self.current_row = None;
        self.dirty = true;
    }

    /// Current image boxes in pixels, parallel to [`Session::current_annotations`].
    pub fn pixel_boxes(&self) -> Vec<BBox<Pixel>> {
        let Some(image) = &self.current_image else {
            return Vec::new();
        };
        let (w, h) = (image.width as f64, image.height as f64);
        self.current_annotations()
            .iter()
            .map(|block| block.bbox.to_pixel(w, h))
            .collect()
    }

    /// Applies an editor event to the current image.
    pub fn apply_edit(&mut self, event: &EditEvent) -> Result<(), BboxeeError> {
        let Some(image) = &self.current_image else {
            return Err(BboxeeError::InvalidArgument("no image is loaded".into()));
        };
        let (w, h) = (image.width as f64, image.height as f64);
        let name = image.name.clone();

        match event {
            EditEvent::Created(bbox) => {
                self.create_annotation(&name, bbox.to_normalized(w, h), None)?;
            }
            EditEvent::Moved { row, bbox } | EditEvent::Resized { row, bbox } => {
                self.update_bbox(*row, bbox.to_normalized(w, h))?;
            }
            EditEvent::Deleted(row) => {
                self.delete(*row)?;
            }
            EditEvent::Duplicated { row, center } => {
                self.duplicate(*row, Coord::new(center.x / w, center.y / h))?;
            }
            EditEvent::Selected(row) => self.select_row(*row),
            EditEvent::Zoom(_) | EditEvent::Pan { .. } => {}
        }
        Ok(())
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    let a = if a.as_os_str().is_empty() { Path::new(".") } else { a };
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
