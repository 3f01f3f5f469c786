//! Per-file summaries of scanned annotation documents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::schema::{AnnotationDocument, Flag};

/// What one `.bbx` file contains.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    /// Images with at least one box.
    pub images: usize,
    pub boxes: usize,
    /// Box count per label.
    pub labels: BTreeMap<String, usize>,
    /// Attribute flags set on at least one box, per image.
    pub flags: BTreeMap<String, BTreeSet<&'static str>>,
    /// True when any image is flagged for review.
    pub has_review: bool,
    pub mask_name: String,
}

impl FileSummary {
    pub fn from_document(path: PathBuf, document: &AnnotationDocument) -> Self {
        let mut summary = FileSummary {
            path,
            has_review: !document.review.is_empty(),
            mask_name: document.mask_name.clone(),
            ..Default::default()
        };

        for (name, entry) in &document.images {
            if entry.annotations.is_empty() {
                continue;
            }
            summary.images += 1;
            for block in &entry.annotations {
                summary.boxes += 1;
                *summary.labels.entry(block.label.clone()).or_insert(0) += 1;

                for flag in [Flag::Occluded, Flag::Truncated, Flag::Difficult] {
                    if block.flag(flag).is_yes() {
                        summary
                            .flags
                            .entry(name.clone())
                            .or_default()
                            .insert(flag_name(flag));
                    }
                }
            }
        }
        summary
    }
}

fn flag_name(flag: Flag) -> &'static str {
    match flag {
        Flag::Occluded => "occluded",
        Flag::Truncated => "truncated",
        Flag::Difficult => "difficult",
    }
}

/// Summaries for every scanned file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub files: Vec<FileSummary>,
}

impl Summary {
    /// Box count per label across all files.
    pub fn label_totals(&self) -> BTreeMap<String, usize> {
        let mut totals = BTreeMap::new();
        for file in &self.files {
            for (label, count) in &file.labels {
                *totals.entry(label.clone()).or_insert(0) += count;
            }
        }
        totals
    }

    pub fn total_images(&self) -> usize {
        self.files.iter().map(|f| f.images).sum()
    }

    pub fn total_boxes(&self) -> usize {
        self.files.iter().map(|f| f.boxes).sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} files, {} images, {} boxes",
            self.files.len(),
            self.total_images(),
            self.total_boxes()
        )?;

        for file in &self.files {
            writeln!(f)?;
            write!(f, "{}", file.path.display())?;
            if !file.mask_name.is_empty() {
                write!(f, " [mask: {}]", file.mask_name)?;
            }
            if file.has_review {
                write!(f, " [review]")?;
            }
            writeln!(f)?;
            for (label, count) in &file.labels {
                writeln!(f, "  {label:<24} {count:>6}")?;
            }
            let flagged = file.flags.len();
            if flagged > 0 {
                writeln!(f, "  {flagged} images with flagged boxes")?;
            }
        }

        let totals = self.label_totals();
        if !totals.is_empty() {
            writeln!(f)?;
            writeln!(f, "Totals")?;
            for (label, count) in totals {
                writeln!(f, "  {label:<24} {count:>6}")?;
            }
        }
        Ok(())
    }
}
