//! Image discovery, loading, masking, and tone mapping.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::BboxeeError;
use crate::schema::Mask;

/// Extensions recognized as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Returns true when `path` has one of [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    IMAGE_EXTENSIONS
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed))
}

/// Lists image file names directly inside `dir`, sorted lexicographically.
pub fn list_images(dir: &Path) -> Result<Vec<String>, BboxeeError> {
    let entries = fs::read_dir(dir).map_err(|err| BboxeeError::from_io(dir, err))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| BboxeeError::from_io(dir, err))?;
        let path = entry.path();
        if path.is_file() && is_image_file(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

/// Decodes an image into three-channel RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, BboxeeError> {
    let decoded = image::open(path).map_err(|source| match source {
        image::ImageError::IoError(err) => BboxeeError::from_io(path, err),
        source => BboxeeError::ImageDecode {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(decoded.to_rgb8())
}

/// The images of one directory.
#[derive(Clone, Debug)]
pub struct ImageSource {
    directory: PathBuf,
    files: Vec<String>,
}

impl ImageSource {
    /// Scans `directory` for images.
    pub fn open(directory: &Path) -> Result<Self, BboxeeError> {
        let files = list_images(directory)?;
        log::info!("Found {} images in {}", files.len(), directory.display());
        Ok(Self {
            directory: directory.to_path_buf(),
            files,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// Loads `name` and returns its pixels and `(width, height)`.
    pub fn load(&self, name: &str) -> Result<(RgbImage, (u32, u32)), BboxeeError> {
        let pixels = load_image(&self.path(name))?;
        let dims = pixels.dimensions();
        Ok((pixels, dims))
    }
}

/// Checks that `mask` can be applied to an image of the given size.
pub fn check_mask(image: &str, mask: &Mask, width: u32, height: u32) -> Result<(), BboxeeError> {
    if !mask.is_rectangular() || mask.width() != width || mask.height() != height {
        return Err(BboxeeError::DimensionMismatch {
            image: image.to_string(),
            mask_width: mask.width(),
            mask_height: mask.height(),
            image_width: width,
            image_height: height,
        });
    }
    Ok(())
}

/// Multiplies every channel of every pixel by the mask value at that pixel.
pub fn apply_mask(image: &str, pixels: &mut RgbImage, mask: &Mask) -> Result<(), BboxeeError> {
    let (width, height) = pixels.dimensions();
    check_mask(image, mask, width, height)?;

    for (x, y, pixel) in pixels.enumerate_pixels_mut() {
        let m = mask.get(x, y);
        for channel in pixel.0.iter_mut() {
            *channel = channel.saturating_mul(m);
        }
    }
    Ok(())
}

/// A 256-entry lookup that stretches shadows below a mid point.
///
/// Values below `mid_point` map linearly onto `[0, 128)`, values at or
/// above it onto `[128, 255]`. The table is rebuilt only when the mid point
/// changes.
#[derive(Clone, Debug)]
pub struct ToneMap {
    mid_point: u8,
    lut: [u8; 256],
}

impl ToneMap {
    pub fn new(mid_point: u8) -> Self {
        Self {
            mid_point,
            lut: build_lut(mid_point),
        }
    }

    pub fn mid_point(&self) -> u8 {
        self.mid_point
    }

    pub fn set_mid_point(&mut self, mid_point: u8) {
        if mid_point != self.mid_point {
            self.mid_point = mid_point;
            self.lut = build_lut(mid_point);
        }
    }

    #[inline]
    pub fn map(&self, value: u8) -> u8 {
        self.lut[value as usize]
    }

    /// Applies the lookup to every channel in place.
    pub fn apply(&self, pixels: &mut RgbImage) {
        for value in pixels.iter_mut() {
            *value = self.lut[*value as usize];
        }
    }
}

impl Default for ToneMap {
    /// Mid point 128 is the identity mapping.
    fn default() -> Self {
        Self::new(128)
    }
}

fn build_lut(mid_point: u8) -> [u8; 256] {
    let mid = mid_point as f64;
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let v = value as f64;
        *slot = if v < mid {
            (v * 128.0 / mid).floor() as u8
        } else if mid_point == u8::MAX {
            128
        } else {
            (128.0 + (v - mid) * 127.0 / (255.0 - mid)).round() as u8
        };
    }
    lut
}
