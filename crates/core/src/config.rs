use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::domain::identity_resolver::DEFAULT_SIMILARITY_THRESHOLD;
use crate::identity::domain::person_id_generator::DEFAULT_MAX_ATTEMPTS;
use crate::pipeline::organize_photos_use_case::DEFAULT_FACE_PADDING;
use crate::shared::constants::APP_DIR_NAME;

const CONFIG_FILE_NAME: &str = "config.json";
const STORE_FILE_NAME: &str = "persons.json";
const JOURNAL_FILE_NAME: &str = "intents.json";
const DEFAULT_CONFIDENCE: f64 = 0.25;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacesortConfig {
    /// Inclusive cosine-similarity cutoff for matching a known person.
    pub similarity_threshold: f64,
    /// Minimum face detector confidence.
    pub confidence_threshold: f64,
    /// Fraction of the face size added on every side before embedding.
    pub face_padding: f64,
    pub max_id_attempts: usize,
    pub store_path: PathBuf,
    pub journal_path: PathBuf,
}

impl Default for FacesortConfig {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE,
            face_padding: DEFAULT_FACE_PADDING,
            max_id_attempts: DEFAULT_MAX_ATTEMPTS,
            store_path: data_dir.join(STORE_FILE_NAME),
            journal_path: data_dir.join(JOURNAL_FILE_NAME),
        }
    }
}

impl FacesortConfig {
    /// `<config dir>/Facesort/config.json`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads `path` if given, else the default location.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold {} is outside [-1, 1]",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.face_padding) {
            return Err(ConfigError::Invalid(format!(
                "face_padding {} is outside [0, 1]",
                self.face_padding
            )));
        }
        if self.max_id_attempts == 0 {
            return Err(ConfigError::Invalid("max_id_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".facesort"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = FacesortConfig::default();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.confidence_threshold, 0.25);
        assert_eq!(config.max_id_attempts, 16);
        assert!(config.store_path.ends_with("persons.json"));
        assert!(config.journal_path.ends_with("intents.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{ "similarity_threshold": 0.7, "store_path": "/tmp/p.json" }"#).unwrap();

        let config = FacesortConfig::load(Some(&path)).unwrap();

        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.store_path, PathBuf::from("/tmp/p.json"));
        assert_eq!(config.face_padding, DEFAULT_FACE_PADDING);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = FacesortConfig::load(Some(&tmp.path().join("nope.json")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ similarity_threshold: }").unwrap();

        let result = FacesortConfig::load(Some(&path));

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[rstest]
    #[case(r#"{ "similarity_threshold": 1.5 }"#)]
    #[case(r#"{ "confidence_threshold": -0.1 }"#)]
    #[case(r#"{ "face_padding": 2.0 }"#)]
    #[case(r#"{ "max_id_attempts": 0 }"#)]
    fn test_out_of_range_values_are_rejected(#[case] json: &str) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, json).unwrap();

        let result = FacesortConfig::load(Some(&path));

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
