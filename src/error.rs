use std::path::PathBuf;
use thiserror::Error;

/// The main error type for bboxee operations.
#[derive(Debug, Error)]
pub enum BboxeeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse annotation document {path}: {source}")]
    DocumentParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Permission denied for {path}")]
    Permission { path: PathBuf },

    #[error(
        "Cannot save {path}: annotation documents must be saved in the image directory {image_directory}"
    )]
    Scope {
        path: PathBuf,
        image_directory: PathBuf,
    },

    #[error(
        "Mask is {mask_width}x{mask_height} but image {image} is {image_width}x{image_height}"
    )]
    DimensionMismatch {
        image: String,
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("No inference runtime available for {family} models")]
    ModelMissing { family: String },

    #[error("Inference failed on {image}: {message}")]
    Inference { image: String, message: String },

    #[error("Export target already exists: {path}")]
    ExportLayoutConflict { path: PathBuf },

    #[error("Failed to parse label map {path} at byte {offset}: {message}")]
    LabelMapParse {
        path: PathBuf,
        offset: usize,
        message: String,
    },

    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to parse dataset.yaml at {path}: {source}")]
    DatasetYamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("No annotation at row {row} on image {image}")]
    InvalidRow { image: String, row: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BboxeeError {
    /// Maps an IO error on `path` to [`BboxeeError::Permission`] when the
    /// OS reports a permission failure, otherwise keeps it as `Io`.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            BboxeeError::Permission { path: path.into() }
        } else {
            BboxeeError::Io(err)
        }
    }
}
