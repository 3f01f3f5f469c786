//! Accuracy report types and text formatting.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Outcome of comparing predicted boxes against a reference.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// Confidence threshold predicted boxes were held to.
    pub threshold: f64,
    /// Images seen on either side.
    pub images: usize,
    /// Sorted union of labels seen on either side.
    pub labels: Vec<String>,
    /// Matched pair counts, keyed by predicted label then reference label.
    pub confusion_matrix: BTreeMap<String, BTreeMap<String, usize>>,
    pub matched: usize,
    /// Diagonal over matched pairs; 0 without pairs.
    pub accuracy: f64,
    /// Mean IoU of matched pairs; 0 without pairs.
    pub average_iou: f64,
    pub false_positives: BTreeMap<String, usize>,
    pub false_negatives: BTreeMap<String, usize>,
}

impl AccuracyReport {
    /// Pairs where the prediction said `predicted` and the reference said
    /// `reference`.
    pub fn confusion(&self, predicted: &str, reference: &str) -> usize {
        self.confusion_matrix
            .get(predicted)
            .and_then(|row| row.get(reference))
            .copied()
            .unwrap_or(0)
    }

    /// Matched pairs with agreeing labels.
    pub fn correct(&self) -> usize {
        self.labels.iter().map(|label| self.confusion(label, label)).sum()
    }

    /// True when every matched pair agrees on its label.
    pub fn is_diagonal(&self) -> bool {
        self.confusion_matrix
            .iter()
            .all(|(predicted, row)| row.iter().all(|(reference, n)| predicted == reference || *n == 0))
    }

    pub fn false_positive_total(&self) -> usize {
        self.false_positives.values().sum()
    }

    pub fn false_negative_total(&self) -> usize {
        self.false_negatives.values().sum()
    }
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Threshold: {:.2}  Images: {}  Matched: {}",
            self.threshold, self.images, self.matched
        )?;
        writeln!(
            f,
            "Accuracy: {:.2}%  Average IoU: {:.4}",
            self.accuracy * 100.0,
            self.average_iou
        )?;
        writeln!(
            f,
            "False positives: {}  False negatives: {}",
            self.false_positive_total(),
            self.false_negative_total()
        )?;

        if self.labels.is_empty() {
            return Ok(());
        }

        let width = self
            .labels
            .iter()
            .map(|label| label.len())
            .max()
            .unwrap_or(0)
            .max("predicted \\ reference".len());

        writeln!(f)?;
        write!(f, "{:<width$}", "predicted \\ reference")?;
        for label in &self.labels {
            write!(f, " {:>w$}", label, w = label.len().max(5))?;
        }
        writeln!(f)?;
        for predicted in &self.labels {
            write!(f, "{predicted:<width$}")?;
            for reference in &self.labels {
                write!(
                    f,
                    " {:>w$}",
                    self.confusion(predicted, reference),
                    w = reference.len().max(5)
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "{:<width$} {:>6} {:>6}", "label", "FP", "FN")?;
        for label in &self.labels {
            writeln!(
                f,
                "{:<width$} {:>6} {:>6}",
                label,
                self.false_positives.get(label).copied().unwrap_or(0),
                self.false_negatives.get(label).copied().unwrap_or(0)
            )?;
        }
        Ok(())
    }
}
