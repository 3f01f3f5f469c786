//! YOLO dataset writer (v5 and v9 layouts).
//!
//! Both layouts store one `.txt` label file per image, one line per box:
//!
//! ```text
//! <class_index> <x_center> <y_center> <width> <height>
//! ```
//!
//! with every coordinate normalized to `[0, 1]`. A negative image gets an
//! empty label file so it still trains as background.
//!
//! v5 nests splits under `images/` and `labels/`; v9 nests `images/` and
//! `labels/` under each split. The `dataset.yaml` index differs only in how
//! `names` is written.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{create_dir, write_file, DatasetWriter, EncodedImage, ExportContext, Split};
use crate::error::BboxeeError;
use crate::filter::CandidateImage;

pub const DATASET_YAML: &str = "dataset.yaml";
pub const LABEL_REMAP_JSON: &str = "label_remap.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum YoloLayout {
    V5,
    V9,
}

impl YoloLayout {
    fn images_dir(self, split: Split) -> PathBuf {
        match self {
            YoloLayout::V5 => Path::new("images").join(split.dir_name()),
            YoloLayout::V9 => Path::new(split.dir_name()).join("images"),
        }
    }

    fn labels_dir(self, split: Split) -> PathBuf {
        match self {
            YoloLayout::V5 => Path::new("labels").join(split.dir_name()),
            YoloLayout::V9 => Path::new(split.dir_name()).join("labels"),
        }
    }

    fn top_level(self) -> [&'static str; 2] {
        match self {
            YoloLayout::V5 => ["images", "labels"],
            YoloLayout::V9 => ["train", "validation"],
        }
    }
}

pub(crate) struct YoloWriter {
    layout: YoloLayout,
    context: ExportContext,
}

impl YoloWriter {
    pub fn new(layout: YoloLayout, context: ExportContext) -> Self {
        Self { layout, context }
    }

    fn label_lines(&self, image: &CandidateImage) -> String {
        let mut out = String::new();
        if image.is_negative() {
            return out;
        }
        for block in &image.annotations {
            let Some(class) = self.context.class_index(&block.label) else {
                log::debug!(
                    "Skipping '{}' box on {}: not in vocabulary",
                    block.label,
                    image.file_name
                );
                continue;
            };
            let (cx, cy, w, h) = block.bbox.to_cxcywh();
            let _ = writeln!(out, "{class} {cx} {cy} {w} {h}");
        }
        out
    }

    fn dataset_yaml(&self) -> String {
        let layout = self.layout;
        let mut yaml = String::new();
        let _ = writeln!(
            yaml,
            "path: {}",
            yaml_single_quoted(&self.context.dir.to_string_lossy())
        );
        let _ = writeln!(
            yaml,
            "train: {}",
            layout.images_dir(Split::Train).to_string_lossy()
        );
        let _ = writeln!(
            yaml,
            "val: {}",
            layout.images_dir(Split::Validation).to_string_lossy()
        );
        let _ = writeln!(yaml, "nc: {}", self.context.labels.len());

        match layout {
            YoloLayout::V5 => {
                let names = serde_json::to_string(&self.context.labels)
                    .unwrap_or_else(|_| "[]".to_string());
                let _ = writeln!(yaml, "names: {names}");
            }
            YoloLayout::V9 => {
                yaml.push_str("names:\n");
                for (idx, label) in self.context.labels.iter().enumerate() {
                    let _ = writeln!(yaml, "  {}: {}", idx, yaml_single_quoted(label));
                }
            }
        }
        yaml
    }
}

impl DatasetWriter for YoloWriter {
    fn targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = self
            .layout
            .top_level()
            .iter()
            .map(PathBuf::from)
            .collect();
        targets.push(PathBuf::from(DATASET_YAML));
        targets.push(PathBuf::from(LABEL_REMAP_JSON));
        targets
    }

    fn begin(&mut self) -> Result<(), BboxeeError> {
        for split in [Split::Train, Split::Validation] {
            create_dir(&self.context.dir.join(self.layout.images_dir(split)))?;
            create_dir(&self.context.dir.join(self.layout.labels_dir(split)))?;
        }
        Ok(())
    }

    fn write(
        &mut self,
        split: Split,
        index: usize,
        image: &CandidateImage,
        encoded: EncodedImage,
    ) -> Result<(), BboxeeError> {
        let stem = split.file_stem(index);
        let dir = &self.context.dir;
        write_file(
            &dir.join(self.layout.images_dir(split))
                .join(format!("{stem}.jpg")),
            &encoded.bytes,
        )?;
        write_file(
            &dir.join(self.layout.labels_dir(split))
                .join(format!("{stem}.txt")),
            self.label_lines(image).as_bytes(),
        )
    }

    fn finish(&mut self) -> Result<(), BboxeeError> {
        let dir = &self.context.dir;
        write_file(&dir.join(DATASET_YAML), self.dataset_yaml().as_bytes())?;
        self.context.remap.write(&dir.join(LABEL_REMAP_JSON))
    }
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// A parsed `dataset.yaml`. `names` is accepted as a list or as an
/// index-keyed map.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetYaml {
    pub path: Option<String>,
    pub train: String,
    pub val: String,
    pub nc: usize,
    pub names: Vec<String>,
}

#[derive(Deserialize)]
struct RawDatasetYaml {
    #[serde(default)]
    path: Option<String>,
    train: String,
    val: String,
    nc: usize,
    names: RawNames,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNames {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

/// Reads a YOLO `dataset.yaml`.
pub fn read_dataset_yaml(path: &Path) -> Result<DatasetYaml, BboxeeError> {
    let text = fs::read_to_string(path).map_err(|err| BboxeeError::from_io(path, err))?;
    let raw: RawDatasetYaml =
        serde_yaml::from_str(&text).map_err(|source| BboxeeError::DatasetYamlParse {
            path: path.to_path_buf(),
            source,
        })?;
    let names = match raw.names {
        RawNames::List(names) => names,
        RawNames::Map(names) => names.into_values().collect(),
    };
    Ok(DatasetYaml {
        path: raw.path,
        train: raw.train,
        val: raw.val,
        nc: raw.nc,
        names,
    })
}
