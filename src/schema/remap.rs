//! Label remapping applied before export and accuracy runs.
//!
//! On disk a remap is a JSON object `{ "source": "target" }`. An empty
//! target keeps the source label and `"exclude"` (any case) drops the box.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BboxeeError;

/// Sentinel target that drops an annotation.
pub const EXCLUDE: &str = "exclude";

/// What happens to one source label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemapTarget {
    Identity,
    Rename(String),
    Exclude,
}

impl RemapTarget {
    fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            RemapTarget::Identity
        } else if raw.eq_ignore_ascii_case(EXCLUDE) {
            RemapTarget::Exclude
        } else {
            RemapTarget::Rename(raw.to_string())
        }
    }

    fn as_raw(&self) -> &str {
        match self {
            RemapTarget::Identity => "",
            RemapTarget::Rename(target) => target,
            RemapTarget::Exclude => EXCLUDE,
        }
    }
}

/// A source-label to target mapping. Unmapped labels pass through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelRemap {
    targets: BTreeMap<String, RemapTarget>,
}

impl LabelRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a rule using the raw on-disk target syntax.
    pub fn insert(&mut self, source: impl Into<String>, target: &str) {
        self.targets.insert(source.into(), RemapTarget::parse(target));
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, label: &str) -> &RemapTarget {
        self.targets.get(label).unwrap_or(&RemapTarget::Identity)
    }

    /// Returns the output label, or `None` when the label is excluded.
    pub fn apply(&self, label: &str) -> Option<String> {
        match self.target(label) {
            RemapTarget::Identity => Some(label.to_string()),
            RemapTarget::Rename(target) => Some(target.clone()),
            RemapTarget::Exclude => None,
        }
    }

    /// The sorted output vocabulary for a set of source labels.
    ///
    /// Class indices used by the exporters are positions in this list.
    pub fn vocabulary<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let set: BTreeSet<String> = labels
            .into_iter()
            .filter_map(|label| self.apply(label))
            .collect();
        set.into_iter().collect()
    }

    /// Reads a remap file.
    pub fn from_path(path: &Path) -> Result<Self, BboxeeError> {
        let text = fs::read_to_string(path).map_err(|err| BboxeeError::from_io(path, err))?;
        Self::from_json_str(&text).map_err(|source| BboxeeError::Config {
            path: path.to_path_buf(),
            message: source.to_string(),
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut remap = Self::new();
        for (source, target) in raw {
            remap.insert(source, &target);
        }
        Ok(remap)
    }

    /// Writes the remap in its on-disk form.
    pub fn write(&self, path: &Path) -> Result<(), BboxeeError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| BboxeeError::JsonWrite {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|err| BboxeeError::from_io(path, err))
    }
}

impl Serialize for LabelRemap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.targets.len()))?;
        for (source, target) in &self.targets {
            map.serialize_entry(source, target.as_raw())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LabelRemap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut remap = Self::new();
        for (source, target) in raw {
            remap.insert(source, &target);
        }
        Ok(remap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_rename_and_exclude() {
        let remap =
            LabelRemap::from_json_str(r#"{"deer": "animal", "person": "EXCLUDE", "elk": ""}"#)
                .expect("parse");

        assert_eq!(remap.apply("deer"), Some("animal".into()));
        assert_eq!(remap.apply("person"), None);
        assert_eq!(remap.apply("elk"), Some("elk".into()));
        assert_eq!(remap.apply("bear"), Some("bear".into()));
        assert_eq!(remap.target("person"), &RemapTarget::Exclude);
    }

    #[test]
    fn vocabulary_is_sorted_and_deduplicated() {
        let mut remap = LabelRemap::new();
        remap.insert("deer", "animal");
        remap.insert("elk", "animal");
        remap.insert("person", "exclude");

        let vocab = remap.vocabulary(["person", "elk", "deer", "bear"]);
        assert_eq!(vocab, vec!["animal", "bear"]);
    }

    #[test]
    fn serializes_back_to_raw_form() {
        let remap = LabelRemap::from_json_str(r#"{"a": "", "b": "Exclude", "c": "d"}"#)
            .expect("parse");
        let json = serde_json::to_string(&remap).expect("serialize");
        assert_eq!(json, r#"{"a":"","b":"exclude","c":"d"}"#);
    }
}
