//! Accuracy of predicted boxes against a reference document.
//!
//! Both documents describe the same image directory. For every image the
//! predicted and reference boxes are paired greedily by IoU in both
//! directions; each box ends up in at most one pair. Unpaired predictions
//! are false positives and unpaired reference boxes false negatives, except
//! on images the reference marks as negative.
//!
//! Ties in IoU go to the first candidate in document order. Labels are not
//! consulted while pairing.

mod report;

pub use report::AccuracyReport;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::BboxeeError;
use crate::schema::{is_negative_label, AnnotationDocument, BBox, LabelRemap, Normalized};
use crate::worker::{Reporter, WorkerHandle};

/// Options for [`evaluate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccuracyOptions {
    /// Applied to both sides before pairing.
    pub remap: LabelRemap,
    /// Predicted boxes below this confidence are ignored.
    pub threshold: f64,
}

/// Per-image counts published as progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageTally {
    pub matched: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

pub type AccuracyOutcome = Result<AccuracyReport, BboxeeError>;

/// A box paired across the two sides.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pair {
    pub predicted: usize,
    pub reference: usize,
    pub iou: f64,
}

/// Pairs `predicted` with `reference` boxes.
///
/// Each predicted box claims the reference it overlaps most; when two claim
/// the same reference the higher IoU keeps it. Reference boxes left
/// unpaired then claim their best predicted box under the same rule. Boxes
/// that do not overlap are never paired.
pub fn match_boxes(predicted: &[BBox<Normalized>], reference: &[BBox<Normalized>]) -> Vec<Pair> {
    let iou: Vec<Vec<f64>> = predicted
        .iter()
        .map(|p| reference.iter().map(|r| p.iou(r)).collect())
        .collect();

    let mut owner_of_ref: Vec<Option<(usize, f64)>> = vec![None; reference.len()];
    let mut owner_of_pred: Vec<Option<(usize, f64)>> = vec![None; predicted.len()];

    for (p, row) in iou.iter().enumerate() {
        let Some((r, value)) = best(row.iter().copied()) else {
            continue;
        };
        match owner_of_ref[r] {
            Some((_, held)) if held >= value => {}
            previous => {
                if let Some((loser, _)) = previous {
                    owner_of_pred[loser] = None;
                }
                owner_of_ref[r] = Some((p, value));
                owner_of_pred[p] = Some((r, value));
            }
        }
    }

    for r in 0..reference.len() {
        if owner_of_ref[r].is_some() {
            continue;
        }
        let Some((p, value)) = best(iou.iter().map(|row| row[r])) else {
            continue;
        };
        match owner_of_pred[p] {
            Some((_, held)) if held >= value => {}
            previous => {
                if let Some((loser, _)) = previous {
                    owner_of_ref[loser] = None;
                }
                owner_of_pred[p] = Some((r, value));
                owner_of_ref[r] = Some((p, value));
            }
        }
    }

    owner_of_pred
        .iter()
        .enumerate()
        .filter_map(|(p, owner)| {
            owner.map(|(r, iou)| Pair {
                predicted: p,
                reference: r,
                iou,
            })
        })
        .collect()
}

/// Index and value of the first strictly largest positive entry.
fn best(values: impl Iterator<Item = f64>) -> Option<(usize, f64)> {
    let mut found: Option<(usize, f64)> = None;
    for (idx, value) in values.enumerate() {
        if value > 0.0 && found.map_or(true, |(_, held)| value > held) {
            found = Some((idx, value));
        }
    }
    found
}

/// Labeled boxes of one image after remapping and thresholding.
struct Side {
    boxes: Vec<BBox<Normalized>>,
    labels: Vec<String>,
    negative: bool,
}

impl Side {
    fn collect(
        document: &AnnotationDocument,
        image: &str,
        options: &AccuracyOptions,
        thresholded: bool,
    ) -> Self {
        let mut side = Side {
            boxes: Vec::new(),
            labels: Vec::new(),
            negative: false,
        };
        for block in document.annotations(image) {
            if is_negative_label(&block.label) {
                side.negative = true;
                continue;
            }
            if thresholded && block.confidence < options.threshold {
                continue;
            }
            let Some(label) = options.remap.apply(&block.label) else {
                continue;
            };
            side.boxes.push(block.bbox);
            side.labels.push(label);
        }
        side
    }
}

#[derive(Default)]
struct Accumulator {
    images: usize,
    labels: BTreeSet<String>,
    confusion: BTreeMap<String, BTreeMap<String, usize>>,
    matched: usize,
    iou_sum: f64,
    false_positives: BTreeMap<String, usize>,
    false_negatives: BTreeMap<String, usize>,
}

impl Accumulator {
    fn add_image(&mut self, predicted: &Side, reference: &Side) -> ImageTally {
        self.images += 1;
        self.labels.extend(predicted.labels.iter().cloned());
        self.labels.extend(reference.labels.iter().cloned());

        let pairs = match_boxes(&predicted.boxes, &reference.boxes);
        let mut pred_used = vec![false; predicted.boxes.len()];
        let mut ref_used = vec![false; reference.boxes.len()];
        for pair in &pairs {
            pred_used[pair.predicted] = true;
            ref_used[pair.reference] = true;
            *self
                .confusion
                .entry(predicted.labels[pair.predicted].clone())
                .or_default()
                .entry(reference.labels[pair.reference].clone())
                .or_insert(0) += 1;
            self.iou_sum += pair.iou;
        }
        self.matched += pairs.len();

        let mut tally = ImageTally {
            matched: pairs.len(),
            ..Default::default()
        };
        for (label, used) in predicted.labels.iter().zip(&pred_used) {
            if !used {
                *self.false_positives.entry(label.clone()).or_insert(0) += 1;
                tally.false_positives += 1;
            }
        }
        // A negative reference image is meant to be empty.
        if !reference.negative {
            for (label, used) in reference.labels.iter().zip(&ref_used) {
                if !used {
                    *self.false_negatives.entry(label.clone()).or_insert(0) += 1;
                    tally.false_negatives += 1;
                }
            }
        }
        tally
    }

    fn finish(self, threshold: f64) -> AccuracyReport {
        let mut report = AccuracyReport {
            threshold,
            images: self.images,
            labels: self.labels.into_iter().collect(),
            confusion_matrix: self.confusion,
            matched: self.matched,
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
            ..Default::default()
        };
        if report.matched > 0 {
            report.accuracy = report.correct() as f64 / report.matched as f64;
            report.average_iou = self.iou_sum / report.matched as f64;
        }
        report
    }
}

fn image_names<'a>(
    reference: &'a AnnotationDocument,
    predicted: &'a AnnotationDocument,
) -> BTreeSet<&'a String> {
    reference
        .images
        .keys()
        .chain(predicted.images.keys())
        .collect()
}

/// Compares `predicted` against `reference`, publishing one progress event
/// per image. Cancellation returns the report over the images seen so far.
pub fn evaluate_with(
    reference: &AnnotationDocument,
    predicted: &AnnotationDocument,
    options: &AccuracyOptions,
    reporter: &Reporter<ImageTally, AccuracyOutcome>,
) -> AccuracyOutcome {
    let mut acc = Accumulator::default();
    for (index, name) in image_names(reference, predicted).into_iter().enumerate() {
        if reporter.is_cancelled() {
            break;
        }
        let tally = acc.add_image(
            &Side::collect(predicted, name, options, true),
            &Side::collect(reference, name, options, false),
        );
        reporter.progress(index, name.clone(), tally);
    }

    let report = acc.finish(options.threshold);
    log::info!(
        "Accuracy over {} images: {} matched, {:.2}%",
        report.images,
        report.matched,
        report.accuracy * 100.0
    );
    Ok(report)
}

/// Compares on the calling thread.
pub fn evaluate(
    reference: &AnnotationDocument,
    predicted: &AnnotationDocument,
    options: &AccuracyOptions,
) -> AccuracyReport {
    let mut acc = Accumulator::default();
    for name in image_names(reference, predicted) {
        acc.add_image(
            &Side::collect(predicted, name, options, true),
            &Side::collect(reference, name, options, false),
        );
    }
    acc.finish(options.threshold)
}

/// Compares on a worker thread.
pub fn start(
    reference: AnnotationDocument,
    predicted: AnnotationDocument,
    options: AccuracyOptions,
) -> Result<WorkerHandle<ImageTally, AccuracyOutcome>, BboxeeError> {
    WorkerHandle::spawn("accuracy", move |reporter| {
        evaluate_with(&reference, &predicted, &options, reporter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AnnotationBlock, ImageEntry};

    fn bbox(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> BBox<Normalized> {
        BBox::from_xyxy(xmin, ymin, xmax, ymax)
    }

    fn document(images: &[(&str, Vec<AnnotationBlock>)]) -> AnnotationDocument {
        let mut document = AnnotationDocument::new();
        for (name, blocks) in images {
            let mut entry = ImageEntry::default();
            entry.annotations = blocks.clone();
            document.images.insert(name.to_string(), entry);
        }
        document
    }

    #[test]
    fn greedy_pairs_are_one_to_one() {
        let reference = [bbox(0.0, 0.5, 0.0, 0.5), bbox(0.6, 1.0, 0.6, 1.0)];
        let predicted = [
            bbox(0.01, 0.51, 0.0, 0.5),
            bbox(0.0, 0.5, 0.0, 0.5),
            bbox(0.6, 1.0, 0.6, 1.0),
        ];
        let pairs = match_boxes(&predicted, &reference);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| p.predicted == 1 && p.reference == 0));
        assert!(pairs.iter().any(|p| p.predicted == 2 && p.reference == 1));
    }

    #[test]
    fn reference_side_claims_leftovers() {
        // Both predictions prefer reference 0; the loser still overlaps
        // reference 1 and is picked up by it.
        let reference = [bbox(0.0, 0.4, 0.0, 0.4), bbox(0.3, 0.7, 0.0, 0.4)];
        let predicted = [bbox(0.0, 0.4, 0.0, 0.4), bbox(0.1, 0.45, 0.0, 0.4)];
        let pairs = match_boxes(&predicted, &reference);
        assert_eq!(
            pairs.iter().map(|p| (p.predicted, p.reference)).collect::<Vec<_>>(),
            vec![(0, 0), (1, 1)]
        );
    }

    #[test]
    fn disjoint_boxes_never_pair() {
        let pairs = match_boxes(&[bbox(0.0, 0.1, 0.0, 0.1)], &[bbox(0.5, 0.6, 0.5, 0.6)]);
        assert!(pairs.is_empty());
    }

    #[test]
    fn confusion_and_accuracy() {
        let reference = document(&[(
            "a.jpg",
            vec![
                AnnotationBlock::human(bbox(0.0, 0.5, 0.0, 0.5), "X"),
                AnnotationBlock::human(bbox(0.6, 1.0, 0.6, 1.0), "Y"),
            ],
        )]);
        let predicted = document(&[(
            "a.jpg",
            vec![
                AnnotationBlock::machine(bbox(0.01, 0.51, 0.0, 0.5), "X", 0.9),
                AnnotationBlock::machine(bbox(0.6, 1.0, 0.6, 1.0), "X", 0.8),
            ],
        )]);

        let report = evaluate(&reference, &predicted, &AccuracyOptions::default());
        assert_eq!(report.matched, 2);
        assert_eq!(report.false_positive_total(), 0);
        assert_eq!(report.false_negative_total(), 0);
        assert_eq!(report.confusion("X", "Y"), 1);
        assert_eq!(report.confusion("X", "X"), 1);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        assert!(!report.is_diagonal());
    }

    #[test]
    fn negative_reference_has_no_false_negatives() {
        let reference = document(&[(
            "a.jpg",
            vec![AnnotationBlock::human(bbox(0.0, 1.0, 0.0, 1.0), "negative")],
        )]);
        let predicted = AnnotationDocument::new();

        let report = evaluate(&reference, &predicted, &AccuracyOptions::default());
        assert_eq!(report.images, 1);
        assert_eq!(report.false_negative_total(), 0);
        assert_eq!(report.matched, 0);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn missing_side_counts_every_box() {
        let reference = document(&[(
            "a.jpg",
            vec![AnnotationBlock::human(bbox(0.0, 0.5, 0.0, 0.5), "deer")],
        )]);
        let predicted = document(&[(
            "b.jpg",
            vec![AnnotationBlock::machine(bbox(0.0, 0.5, 0.0, 0.5), "elk", 0.9)],
        )]);
        let report = evaluate(&reference, &predicted, &AccuracyOptions::default());
        assert_eq!(report.false_negatives["deer"], 1);
        assert_eq!(report.false_positives["elk"], 1);
        assert_eq!(report.labels, vec!["deer", "elk"]);
    }

    #[test]
    fn threshold_and_remap_apply() {
        let reference = document(&[(
            "a.jpg",
            vec![AnnotationBlock::human(bbox(0.0, 0.5, 0.0, 0.5), "Mule Deer")],
        )]);
        let predicted = document(&[(
            "a.jpg",
            vec![
                AnnotationBlock::machine(bbox(0.0, 0.5, 0.0, 0.5), "deer", 0.9),
                AnnotationBlock::machine(bbox(0.6, 0.9, 0.6, 0.9), "deer", 0.2),
            ],
        )]);
        let mut remap = LabelRemap::new();
        remap.insert("Mule Deer", "deer");
        let options = AccuracyOptions {
            remap,
            threshold: 0.5,
        };

        let report = evaluate(&reference, &predicted, &options);
        assert_eq!(report.matched, 1);
        assert_eq!(report.false_positive_total(), 0);
        assert!(report.is_diagonal());
        assert_eq!(report.accuracy, 1.0);
        assert!((report.average_iou - 1.0).abs() < 1e-12);
        assert!(report.to_string().contains("Accuracy: 100.00%"));
    }

    #[test]
    fn worker_reports_each_image() {
        let doc = document(&[
            ("a.jpg", vec![AnnotationBlock::human(bbox(0.0, 0.5, 0.0, 0.5), "deer")]),
            ("b.jpg", vec![AnnotationBlock::human(bbox(0.2, 0.5, 0.0, 0.5), "elk")]),
        ]);
        let handle = start(doc.clone(), doc, AccuracyOptions::default()).expect("spawn");
        let mut seen = Vec::new();
        let report = handle
            .wait(|index, name, tally| seen.push((index, name.to_string(), tally.matched)))
            .expect("finished")
            .expect("report");
        assert_eq!(seen, vec![(0, "a.jpg".into(), 1), (1, "b.jpg".into(), 1)]);
        assert!(report.is_diagonal());
        assert_eq!(report.accuracy, 1.0);
    }
}
