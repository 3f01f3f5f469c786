#![allow(dead_code)]

use bboxee::schema::{
    AnnotationBlock, AnnotationDocument, Author, BBox, ImageEntry, Normalized, Updater, YesNo,
};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const EPS_JSON: f64 = 1e-12;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// A valid normalized box: ordered, inside the unit square, non-empty.
pub fn arb_normalized_bbox() -> BoxedStrategy<BBox<Normalized>> {
    (0.0f64..0.9, 0.0f64..0.9)
        .prop_flat_map(|(xmin, ymin)| {
            (
                Just(xmin),
                Just(ymin),
                (xmin + 0.01)..=1.0,
                (ymin + 0.01)..=1.0,
            )
        })
        .prop_map(|(xmin, ymin, xmax, ymax)| BBox::from_xyxy(xmin, ymin, xmax, ymax))
        .boxed()
}

pub fn arb_label() -> BoxedStrategy<String> {
    prop_oneof![
        Just("deer".to_string()),
        Just("elk".to_string()),
        Just("negative".to_string()),
        Just("N/A".to_string()),
        "[a-z][a-z ]{0,11}".prop_map(|s| s.to_string()),
    ]
    .boxed()
}

fn arb_yes_no() -> BoxedStrategy<YesNo> {
    any::<bool>().prop_map(YesNo::from).boxed()
}

pub fn arb_block() -> BoxedStrategy<AnnotationBlock> {
    (
        arb_normalized_bbox(),
        arb_label(),
        0.0f64..=1.0,
        any::<bool>(),
        any::<bool>(),
        arb_yes_no(),
        arb_yes_no(),
        arb_yes_no(),
    )
        .prop_map(
            |(bbox, label, confidence, human, updated, occluded, truncated, difficult)| {
                AnnotationBlock {
                    bbox,
                    label,
                    confidence: if human { 1.0 } else { confidence },
                    created_by: if human { Author::Human } else { Author::Machine },
                    updated_by: if updated { Updater::Human } else { Updater::Nobody },
                    occluded,
                    truncated,
                    difficult,
                }
            },
        )
        .boxed()
}

/// Documents with up to `max_images` non-empty entries.
pub fn arb_document(max_images: usize, max_boxes: usize) -> BoxedStrategy<AnnotationDocument> {
    let entry = (
        "[A-Z]{3}_[0-9]{4}\\.(jpg|JPG|png)",
        prop::collection::vec(arb_block(), 1..=max_boxes),
        "[a-z ]{0,8}",
    );
    (
        prop::collection::vec(entry, 0..=max_images),
        prop::collection::vec("[a-z]{1,8}", 0..3),
        any::<bool>(),
    )
        .prop_map(|(entries, analysts, review_first)| {
            let mut document = AnnotationDocument::new();
            for (name, annotations, attribution) in entries {
                document.images.insert(
                    name,
                    ImageEntry {
                        attribution,
                        annotations,
                        ..Default::default()
                    },
                );
            }
            document.analysts = analysts;
            if review_first {
                if let Some(name) = document.images.keys().next().cloned() {
                    document.review.insert(name);
                }
            }
            document
        })
        .boxed()
}

fn blocks_equivalent(a: &AnnotationBlock, b: &AnnotationBlock, eps: f64) -> Result<(), String> {
    let coords = [
        (a.bbox.xmin(), b.bbox.xmin()),
        (a.bbox.ymin(), b.bbox.ymin()),
        (a.bbox.xmax(), b.bbox.xmax()),
        (a.bbox.ymax(), b.bbox.ymax()),
        (a.confidence, b.confidence),
    ];
    if coords.iter().any(|(x, y)| (x - y).abs() > eps) {
        return Err(format!("box mismatch: {a:?} vs {b:?}"));
    }
    let same_attributes = a.label == b.label
        && a.created_by == b.created_by
        && a.updated_by == b.updated_by
        && a.occluded == b.occluded
        && a.truncated == b.truncated
        && a.difficult == b.difficult;
    if !same_attributes {
        return Err(format!("attribute mismatch: {a:?} vs {b:?}"));
    }
    Ok(())
}

/// Compares two documents, allowing `eps` on floating-point fields.
pub fn assert_documents_equivalent(
    a: &AnnotationDocument,
    b: &AnnotationDocument,
    eps: f64,
) -> Result<(), String> {
    if a.images.keys().ne(b.images.keys()) {
        return Err(format!(
            "image sets differ: {:?} vs {:?}",
            a.images.keys().collect::<Vec<_>>(),
            b.images.keys().collect::<Vec<_>>()
        ));
    }
    for (name, entry) in &a.images {
        let other = &b.images[name];
        if entry.attribution != other.attribution || entry.license != other.license {
            return Err(format!("metadata mismatch on {name}"));
        }
        if entry.annotations.len() != other.annotations.len() {
            return Err(format!("annotation count mismatch on {name}"));
        }
        for (x, y) in entry.annotations.iter().zip(&other.annotations) {
            blocks_equivalent(x, y, eps)?;
        }
    }
    if a.analysts != b.analysts || a.review != b.review || a.skip_export != b.skip_export {
        return Err("document lists differ".to_string());
    }
    Ok(())
}
