//! COCO object-detection writer.
//!
//! Images are copied into `train/` and `validation/` under their renamed
//! stems; each split gets its own `train.json` / `validation.json`.
//!
//! # Conventions
//!
//! - Boxes are pixel `[x, y, width, height]` with `(x, y)` the top-left
//!   corner.
//! - Category ids are 0-based positions in the sorted vocabulary.
//! - The license table is shared by both splits. Id 0 is "No License";
//!   every new `(name, url)` pair gets the next id.
//! - `area` is 0.0, `iscrowd` is 0 and `segmentation` is empty.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{create_dir, write_file, DatasetWriter, EncodedImage, ExportContext, Split};
use crate::error::BboxeeError;
use crate::filter::CandidateImage;

const NO_LICENSE: &str = "No License";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CocoDataset {
    info: CocoInfo,
    licenses: Vec<CocoLicense>,
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CocoInfo {
    description: String,
    version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CocoLicense {
    id: u64,
    name: String,
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
    license: u64,
    /// Reserved; always empty since EXIF capture times are not read.
    date_captured: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
    supercategory: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,
    bbox: [f64; 4],
    area: f64,
    iscrowd: u8,
    segmentation: Vec<Vec<f64>>,
}

pub(crate) struct CocoWriter {
    context: ExportContext,
    licenses: Vec<CocoLicense>,
    train: CocoDataset,
    validation: CocoDataset,
}

impl CocoWriter {
    pub fn new(context: ExportContext) -> Self {
        Self {
            context,
            licenses: vec![CocoLicense {
                id: 0,
                name: NO_LICENSE.to_string(),
                url: String::new(),
            }],
            train: CocoDataset::default(),
            validation: CocoDataset::default(),
        }
    }

    /// Id of the `(name, url)` license, registering it on first use.
    fn license_id(&mut self, name: &str, url: &str) -> u64 {
        if name.is_empty() {
            return 0;
        }
        if let Some(found) = self
            .licenses
            .iter()
            .find(|license| license.name == name && license.url == url)
        {
            return found.id;
        }
        let id = self.licenses.len() as u64;
        self.licenses.push(CocoLicense {
            id,
            name: name.to_string(),
            url: url.to_string(),
        });
        id
    }

    fn categories(&self) -> Vec<CocoCategory> {
        self.context
            .labels
            .iter()
            .enumerate()
            .map(|(id, name)| CocoCategory {
                id: id as u64,
                name: name.clone(),
                supercategory: String::new(),
            })
            .collect()
    }

    fn dataset_mut(&mut self, split: Split) -> &mut CocoDataset {
        match split {
            Split::Train => &mut self.train,
            Split::Validation => &mut self.validation,
        }
    }
}

impl DatasetWriter for CocoWriter {
    fn targets(&self) -> Vec<PathBuf> {
        [Split::Train, Split::Validation]
            .into_iter()
            .flat_map(|split| {
                [
                    PathBuf::from(split.dir_name()),
                    PathBuf::from(format!("{}.json", split.dir_name())),
                ]
            })
            .collect()
    }

    fn begin(&mut self) -> Result<(), BboxeeError> {
        for split in [Split::Train, Split::Validation] {
            create_dir(&self.context.dir.join(split.dir_name()))?;
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
        let file_name = format!("{}.jpg", split.file_stem(index));
        write_file(
            &self.context.dir.join(split.dir_name()).join(&file_name),
            &encoded.bytes,
        )?;

        let license = self.license_id(&image.license, &image.license_url);
        let (width, height) = (encoded.width as f64, encoded.height as f64);
        let classes: Vec<(Option<usize>, [f64; 4])> = if image.is_negative() {
            Vec::new()
        } else {
            image
                .annotations
                .iter()
                .map(|block| {
                    let (x, y, w, h) = block.bbox.to_pixel(width, height).to_xywh();
                    (self.context.class_index(&block.label), [x, y, w, h])
                })
                .collect()
        };

        let image_id = index as u64;
        let dataset = self.dataset_mut(split);
        dataset.images.push(CocoImage {
            id: image_id,
            width: encoded.width,
            height: encoded.height,
            file_name,
            license,
            date_captured: String::new(),
        });
        for (class, bbox) in classes {
            let Some(class) = class else { continue };
            let id = dataset.annotations.len() as u64;
            dataset.annotations.push(CocoAnnotation {
                id,
                image_id,
                category_id: class as u64,
                bbox,
                area: 0.0,
                iscrowd: 0,
                segmentation: Vec::new(),
            });
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BboxeeError> {
        for split in [Split::Train, Split::Validation] {
            let path = self.context.dir.join(format!("{}.json", split.dir_name()));
            let categories = self.categories();
            let licenses = self.licenses.clone();
            let dataset = self.dataset_mut(split);
            dataset.info = CocoInfo {
                description: format!("bboxee {} split", split.dir_name()),
                version: env!("CARGO_PKG_VERSION").to_string(),
            };
            dataset.licenses = licenses;
            dataset.categories = categories;
            write_json(&path, dataset)?;
        }
        Ok(())
    }
}

fn write_json(path: &Path, dataset: &CocoDataset) -> Result<(), BboxeeError> {
    let file = File::create(path).map_err(|err| BboxeeError::from_io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, dataset).map_err(|source| {
        BboxeeError::JsonWrite {
            path: path.to_path_buf(),
            source,
        }
    })?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{testing, ExportFormat, ExportOptions, Exporter};
    use super::*;
    use crate::schema::LabelRemap;

    fn read(path: &Path) -> CocoDataset {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).expect("parse coco")
    }

    #[test]
    fn writes_both_splits() {
        let temp = tempfile::tempdir().expect("temp dir");
        let source = temp.path().join("src");
        let out = temp.path().join("out");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        let mut selection = testing::selection(&source, 5, |i| {
            if i % 2 == 0 { "fox" } else { "badger" }.to_string()
        });
        selection.images[0].license = String::new();

        let options = ExportOptions {
            validation_split: 0.4,
            seed: Some(3),
            ..Default::default()
        };
        let exported = Exporter::new(&out, selection, LabelRemap::new(), options)
            .export(ExportFormat::Coco)
            .expect("export");
        assert_eq!((exported.train, exported.validation), (3, 2));

        let train = read(&out.join("train.json"));
        let validation = read(&out.join("validation.json"));
        assert_eq!(train.images.len(), 3);
        assert_eq!(validation.images.len(), 2);
        assert_eq!(train.annotations.len(), 3);
        assert!(out.join("train").join(&train.images[0].file_name).is_file());
        assert!(out.join("validation/val_0000000001.jpg").is_file());

        assert_eq!(train.licenses, validation.licenses);
        assert_eq!(train.licenses.len(), 2);
        assert_eq!(train.licenses[0].name, NO_LICENSE);
        assert_eq!(train.licenses[1].name, "CC-BY");

        let names: Vec<_> = train.categories.iter().map(|c| (c.id, c.name.as_str())).collect();
        assert_eq!(names, vec![(0, "badger"), (1, "fox")]);

        let ann = &train.annotations[0];
        for (got, want) in ann.bbox.iter().zip([10.0, 2.0, 20.0, 10.0]) {
            assert!((got - want).abs() < 1e-9, "bbox {:?}", ann.bbox);
        }
        assert_eq!(ann.area, 0.0);
        assert_eq!(ann.iscrowd, 0);
        assert!(ann.segmentation.is_empty());
    }

    #[test]
    fn license_ids_are_incremental() {
        let mut writer = CocoWriter::new(ExportContext {
            dir: PathBuf::new(),
            labels: Vec::new(),
            remap: LabelRemap::new(),
            shards: 1,
        });
        assert_eq!(writer.license_id("", ""), 0);
        assert_eq!(writer.license_id("CC-BY", "a"), 1);
        assert_eq!(writer.license_id("CC0", ""), 2);
        assert_eq!(writer.license_id("CC-BY", "a"), 1);
        assert_eq!(writer.license_id("CC-BY", "b"), 3);
    }
}
