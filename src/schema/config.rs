//! `bboxee_config.json`: label vocabulary and license presets.
//!
//! The file is looked up in the image directory and then in each parent up
//! to the filesystem root; the first one found wins.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::document::{LicenseInfo, UNCLASSIFIED_LABEL};
use crate::error::BboxeeError;

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "bboxee_config.json";

/// Editor defaults loaded from `bboxee_config.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    labels: Vec<String>,

    #[serde(default)]
    pub license: LicenseConfig,
}

/// License presets offered to the operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default)]
    pub default: LicenseInfo,

    #[serde(default)]
    pub licenses: Vec<LicenseChoice>,
}

/// One selectable license.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseChoice {
    pub name: String,

    #[serde(default)]
    pub url: String,
}

impl Config {
    /// Builds a configuration from a label list and license presets.
    pub fn new(labels: Vec<String>, license: LicenseConfig) -> Self {
        Self { labels, license }
    }

    /// Label vocabulary with "N/A" guaranteed to be first.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = self.labels.clone();
        if !labels.iter().any(|l| l == UNCLASSIFIED_LABEL) {
            labels.insert(0, UNCLASSIFIED_LABEL.to_string());
        }
        labels
    }

    /// Reads a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, BboxeeError> {
        let text = fs::read_to_string(path).map_err(|err| BboxeeError::from_io(path, err))?;
        serde_json::from_str(&text).map_err(|source| BboxeeError::Config {
            path: path.to_path_buf(),
            message: source.to_string(),
        })
    }

    /// Finds the nearest configuration file at or above `dir`.
    pub fn locate(dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .map(|ancestor| ancestor.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Loads the nearest configuration, or the defaults when none exists.
    pub fn discover(dir: &Path) -> Result<Self, BboxeeError> {
        match Self::locate(dir) {
            Some(path) => {
                log::debug!("Using configuration {}", path.display());
                Self::from_path(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_prepend_unclassified() {
        let config = Config::new(vec!["deer".into(), "elk".into()], LicenseConfig::default());
        assert_eq!(config.labels(), vec!["N/A", "deer", "elk"]);

        let config = Config::new(vec!["deer".into(), "N/A".into()], LicenseConfig::default());
        assert_eq!(config.labels(), vec!["deer", "N/A"]);
    }

    #[test]
    fn discover_searches_parent_directories() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let nested = temp.path().join("site/camera01");
        fs::create_dir_all(&nested).expect("create dirs");
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            r#"{
                "labels": ["deer"],
                "license": {
                    "default": {"name": "CC0", "url": "https://cc0", "attribution": "Parks"},
                    "licenses": [{"name": "CC0", "url": "https://cc0"}]
                }
            }"#,
        )
        .expect("write config");

        let config = Config::discover(&nested).expect("discover");
        assert_eq!(config.labels(), vec!["N/A", "deer"]);
        assert_eq!(config.license.default.attribution, "Parks");
        assert_eq!(config.license.licenses.len(), 1);
    }

    #[test]
    fn malformed_config_is_config_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::write(temp.path().join(CONFIG_FILE_NAME), "{ labels: ").expect("write config");

        let err = Config::discover(temp.path()).unwrap_err();
        assert!(matches!(err, BboxeeError::Config { .. }));
    }
}
