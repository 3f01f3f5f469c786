//! TFRecord dataset writer.
//!
//! Each split is spread over `shards` files named
//! `<split>_dataset.tfrecord-SSSSS-of-TTTTT`; the `n`th image of a split goes
//! to shard `n mod shards`. Every record is a serialized `tf.train.Example`
//! framed as:
//!
//! ```text
//! u64 length (LE) | u32 masked crc32c(length) | data | u32 masked crc32c(data)
//! ```
//!
//! Class ids in the records and in `label_map.pbtxt` are 1-based.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use sha2::{Digest, Sha256};

use super::{write_file, DatasetWriter, EncodedImage, ExportContext, Split};
use crate::error::BboxeeError;
use crate::filter::CandidateImage;
use crate::schema::LabelMap;

pub const LABEL_MAP_PBTXT: &str = "label_map.pbtxt";

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// `tf.train.BytesList`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

/// `tf.train.FloatList`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

/// `tf.train.Int64List`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

/// `tf.train.Feature`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

/// `tf.train.Features`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

/// `tf.train.Example`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

impl Feature {
    pub fn bytes(values: Vec<Vec<u8>>) -> Self {
        Self {
            kind: Some(feature::Kind::BytesList(BytesList { value: values })),
        }
    }

    pub fn floats(values: Vec<f32>) -> Self {
        Self {
            kind: Some(feature::Kind::FloatList(FloatList { value: values })),
        }
    }

    pub fn ints(values: Vec<i64>) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value: values })),
        }
    }

    fn text(value: &str) -> Self {
        Self::bytes(vec![value.as_bytes().to_vec()])
    }
}

impl Example {
    /// Feature named `key`, if present.
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.as_ref()?.feature.get(key)
    }

    pub fn ints(&self, key: &str) -> &[i64] {
        match self.feature(key).and_then(|f| f.kind.as_ref()) {
            Some(feature::Kind::Int64List(list)) => &list.value,
            _ => &[],
        }
    }

    pub fn floats(&self, key: &str) -> &[f32] {
        match self.feature(key).and_then(|f| f.kind.as_ref()) {
            Some(feature::Kind::FloatList(list)) => &list.value,
            _ => &[],
        }
    }

    pub fn bytes(&self, key: &str) -> &[Vec<u8>] {
        match self.feature(key).and_then(|f| f.kind.as_ref()) {
            Some(feature::Kind::BytesList(list)) => &list.value,
            _ => &[],
        }
    }
}

fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(CRC_MASK_DELTA)
}

/// Appends one framed record to `out`.
pub fn write_record(out: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = (data.len() as u64).to_le_bytes();
    out.write_all(&len)?;
    out.write_all(&masked_crc(&len).to_le_bytes())?;
    out.write_all(data)?;
    out.write_all(&masked_crc(data).to_le_bytes())
}

fn corrupt(path: &Path, message: &str) -> BboxeeError {
    BboxeeError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: {message}", path.display()),
    ))
}

/// Reads every example from a TFRecord file, checking both checksums of
/// each record.
pub fn read_records(path: &Path) -> Result<Vec<Example>, BboxeeError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|err| BboxeeError::from_io(path, err))?;
    parse_records(&bytes, path)
}

fn parse_records(bytes: &[u8], path: &Path) -> Result<Vec<Example>, BboxeeError> {
    let mut examples = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.len() < 12 {
            return Err(corrupt(path, "truncated record header"));
        }
        let (len_bytes, tail) = rest.split_at(8);
        let (len_crc, tail) = tail.split_at(4);
        if masked_crc(len_bytes).to_le_bytes() != len_crc {
            return Err(corrupt(path, "length checksum mismatch"));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(len_bytes);
        let len = u64::from_le_bytes(len);
        if tail.len() < 4 || ((tail.len() - 4) as u64) < len {
            return Err(corrupt(path, "truncated record body"));
        }
        let (data, tail) = tail.split_at(len as usize);
        let (data_crc, tail) = tail.split_at(4);
        if masked_crc(data).to_le_bytes() != data_crc {
            return Err(corrupt(path, "data checksum mismatch"));
        }
        let example = Example::decode(data).map_err(|err| corrupt(path, &err.to_string()))?;
        examples.push(example);
        rest = tail;
    }
    Ok(examples)
}

/// Fuzz-only entrypoint for TFRecord framing and example decoding.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_records(bytes: &[u8]) -> Result<usize, BboxeeError> {
    parse_records(bytes, Path::new("<fuzz>")).map(|examples| examples.len())
}

/// File name of one shard.
pub fn shard_name(split: Split, shard: usize, shards: usize) -> String {
    format!(
        "{}_dataset.tfrecord-{:05}-of-{:05}",
        split.dir_name(),
        shard,
        shards
    )
}

pub(crate) struct TfRecordWriter {
    context: ExportContext,
    outputs: BTreeMap<(Split, usize), BufWriter<File>>,
}

impl TfRecordWriter {
    pub fn new(context: ExportContext) -> Self {
        Self {
            context,
            outputs: BTreeMap::new(),
        }
    }

    fn example(
        &self,
        split: Split,
        index: usize,
        image: &CandidateImage,
        encoded: EncodedImage,
    ) -> Example {
        let mut xmin = Vec::new();
        let mut xmax = Vec::new();
        let mut ymin = Vec::new();
        let mut ymax = Vec::new();
        let mut text = Vec::new();
        let mut label = Vec::new();
        let mut difficult = Vec::new();
        let mut truncated = Vec::new();
        let mut occluded = Vec::new();

        if !image.is_negative() {
            for block in &image.annotations {
                let Some(class) = self.context.class_index(&block.label) else {
                    continue;
                };
                xmin.push(block.bbox.xmin() as f32);
                xmax.push(block.bbox.xmax() as f32);
                ymin.push(block.bbox.ymin() as f32);
                ymax.push(block.bbox.ymax() as f32);
                text.push(block.label.as_bytes().to_vec());
                label.push(class as i64 + 1);
                difficult.push(block.difficult.is_yes() as i64);
                truncated.push(block.truncated.is_yes() as i64);
                occluded.push(block.occluded.is_yes() as i64);
            }
        }

        let sha256 = format!("{:x}", Sha256::digest(&encoded.bytes));
        let source_id = split.file_stem(index);

        let mut feature = BTreeMap::new();
        feature.insert("image/height".into(), Feature::ints(vec![encoded.height as i64]));
        feature.insert("image/width".into(), Feature::ints(vec![encoded.width as i64]));
        feature.insert("image/filename".into(), Feature::text(&image.file_name));
        feature.insert("image/source_id".into(), Feature::text(&source_id));
        feature.insert("image/key/sha256".into(), Feature::text(&sha256));
        feature.insert("image/encoded".into(), Feature::bytes(vec![encoded.bytes]));
        feature.insert("image/format".into(), Feature::text("jpeg"));
        feature.insert("image/object/bbox/xmin".into(), Feature::floats(xmin));
        feature.insert("image/object/bbox/xmax".into(), Feature::floats(xmax));
        feature.insert("image/object/bbox/ymin".into(), Feature::floats(ymin));
        feature.insert("image/object/bbox/ymax".into(), Feature::floats(ymax));
        feature.insert("image/object/class/text".into(), Feature::bytes(text));
        feature.insert("image/object/class/label".into(), Feature::ints(label));
        feature.insert("image/object/difficult".into(), Feature::ints(difficult));
        feature.insert("image/object/truncated".into(), Feature::ints(truncated));
        feature.insert("image/object/occluded".into(), Feature::ints(occluded));

        Example {
            features: Some(Features { feature }),
        }
    }
}

impl DatasetWriter for TfRecordWriter {
    fn targets(&self) -> Vec<PathBuf> {
        let shards = self.context.shards;
        let mut targets: Vec<PathBuf> = [Split::Train, Split::Validation]
            .into_iter()
            .flat_map(|split| (0..shards).map(move |shard| shard_name(split, shard, shards)))
            .map(PathBuf::from)
            .collect();
        targets.push(PathBuf::from(LABEL_MAP_PBTXT));
        targets
    }

    fn begin(&mut self) -> Result<(), BboxeeError> {
        let shards = self.context.shards;
        for split in [Split::Train, Split::Validation] {
            for shard in 0..shards {
                let path = self.context.dir.join(shard_name(split, shard, shards));
                let file = File::create(&path).map_err(|err| BboxeeError::from_io(&path, err))?;
                self.outputs.insert((split, shard), BufWriter::new(file));
            }
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
        let shard = index % self.context.shards;
        let data = self.example(split, index, image, encoded).encode_to_vec();
        let out = self.outputs.get_mut(&(split, shard)).ok_or_else(|| {
            BboxeeError::InvalidArgument(format!("no open shard {shard} for {}", split.dir_name()))
        })?;
        write_record(out, &data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BboxeeError> {
        for out in self.outputs.values_mut() {
            out.flush()?;
        }
        let label_map = LabelMap::from_vocabulary(&self.context.labels);
        write_file(
            &self.context.dir.join(LABEL_MAP_PBTXT),
            label_map.to_pbtxt().as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::{testing, ExportFormat, ExportOptions, Exporter};
    use super::*;
    use crate::schema::LabelRemap;

    #[test]
    fn sharded_export_reads_back() {
        let temp = tempfile::tempdir().expect("temp dir");
        let source = temp.path().join("src");
        let out = temp.path().join("out");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        let selection = testing::selection(&source, 6, |i| {
            if i < 3 { "elk" } else { "deer" }.to_string()
        });
        let options = ExportOptions {
            validation_split: 0.5,
            shards: 2,
            seed: Some(1),
            ..Default::default()
        };
        let exported = Exporter::new(&out, selection, LabelRemap::new(), options)
            .export(ExportFormat::TfRecord)
            .expect("export");
        assert_eq!((exported.train, exported.validation), (3, 3));

        let first = read_records(&out.join(shard_name(Split::Train, 0, 2))).expect("read");
        let second = read_records(&out.join(shard_name(Split::Train, 1, 2))).expect("read");
        assert_eq!((first.len(), second.len()), (2, 1));
        let validation: usize = (0..2)
            .map(|s| read_records(&out.join(shard_name(Split::Validation, s, 2))).unwrap().len())
            .sum();
        assert_eq!(validation, 3);

        let example = &first[0];
        assert_eq!(example.ints("image/width"), [40]);
        assert_eq!(example.ints("image/height"), [20]);
        assert_eq!(example.bytes("image/format"), [b"jpeg".to_vec()]);
        assert_eq!(example.bytes("image/source_id"), [b"train_0000000000".to_vec()]);
        let label = example.ints("image/object/class/label")[0];
        let text = &example.bytes("image/object/class/text")[0];
        assert_eq!(label, if text == b"deer" { 1 } else { 2 });
        assert!((example.floats("image/object/bbox/xmin")[0] - 0.25).abs() < 1e-6);
        assert_eq!(example.ints("image/object/occluded"), [0]);

        let encoded = &example.bytes("image/encoded")[0];
        let expected = format!("{:x}", Sha256::digest(encoded));
        assert_eq!(example.bytes("image/key/sha256"), [expected.into_bytes()]);

        let pbtxt = std::fs::read_to_string(out.join(LABEL_MAP_PBTXT)).unwrap();
        let map = LabelMap::parse(&pbtxt).expect("parse label map");
        assert_eq!(map.label(1), "deer");
        assert_eq!(map.label(2), "elk");
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("bad.tfrecord");
        let mut bytes = Vec::new();
        write_record(&mut bytes, &Example::default().encode_to_vec()).unwrap();
        write_record(&mut bytes, b"\x0a\x00").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_records(&path).unwrap_err();
        assert!(err.to_string().contains("data checksum mismatch"));
    }

    #[test]
    fn masked_crc_matches_reference() {
        // Masked CRC32C of an empty buffer as written by TensorFlow.
        assert_eq!(masked_crc(b""), 0xa282_ead8);
    }
}
