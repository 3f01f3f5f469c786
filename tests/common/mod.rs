#![allow(dead_code)]

use std::fs;
use std::path::Path;

use bboxee::schema::io_bbx::write_bbx;
use bboxee::schema::{AnnotationBlock, AnnotationDocument, BBox, ImageEntry, Normalized};
use image::{ImageFormat, Rgb, RgbImage};

/// Writes a solid grey JPEG of `width` x `height` pixels.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    RgbImage::from_pixel(width, height, Rgb([96, 96, 96]))
        .save_with_format(path, ImageFormat::Jpeg)
        .expect("write jpeg file");
}

pub fn human(xmin: f64, ymin: f64, xmax: f64, ymax: f64, label: &str) -> AnnotationBlock {
    AnnotationBlock::human(BBox::<Normalized>::from_xyxy(xmin, ymin, xmax, ymax), label)
}

pub fn machine(
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    label: &str,
    confidence: f64,
) -> AnnotationBlock {
    AnnotationBlock::machine(
        BBox::<Normalized>::from_xyxy(xmin, ymin, xmax, ymax),
        label,
        confidence,
    )
}

pub fn document_with(images: Vec<(&str, Vec<AnnotationBlock>)>) -> AnnotationDocument {
    let mut document = AnnotationDocument::new();
    for (name, annotations) in images {
        document.images.insert(
            name.to_string(),
            ImageEntry {
                annotations,
                ..Default::default()
            },
        );
    }
    document
}

/// Creates `<root>/<dir>` with one 64x48 JPEG per entry of `document` and
/// writes the document as `<root>/<dir>/<dir>.bbx`.
pub fn write_camera_dir(root: &Path, dir: &str, document: &AnnotationDocument) {
    let directory = root.join(dir);
    for name in document.images.keys() {
        write_jpeg(&directory.join(name), 64, 48);
    }
    fs::create_dir_all(&directory).expect("create camera dir");
    write_bbx(&directory.join(format!("{dir}.bbx")), document).expect("write bbx");
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
