//! Compression pipeline configuration.
//!
//! One JSON document carries the settings for every stage:
//!
//! ```json
//! {
//!   "calibration": { "levels": 16, "lr": 0.001, "epochs": 5 },
//!   "calibration_targets": ["fc1"],
//!   "pruning": { "amount": 0.5, "method": "l1_unstructured", "scope": "global" },
//!   "pruning_targets": ["fc"],
//!   "training": { "epochs": 3, "lr": 1e-4, "optimizer": "adamw" }
//! }
//! ```
//!
//! Missing sections and fields take their defaults.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pruning::PruningConfig;
use crate::quantization::CalibrationConfig;
use crate::training::TrainingConfig;

/// Read a JSON file into `T`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `value` as pretty JSON, creating parent directories.
pub(crate) fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let file_err = |source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(file_err)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
    fs::write(path, json).map_err(file_err)
}

/// Settings for calibration, pruning, and fine-tuning in one place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scale calibration settings.
    pub calibration: CalibrationConfig,
    /// Pruning settings.
    pub pruning: PruningConfig,
    /// Train loop settings.
    pub training: TrainingConfig,
    /// Name substrings of the layers to calibrate.
    pub calibration_targets: Vec<String>,
    /// Name substrings of the layers to prune.
    pub pruning_targets: Vec<String>,
}

impl PipelineConfig {
    /// Validate every section.
    ///
    /// Empty target lists are allowed; the stage is then skipped.
    ///
    /// # Errors
    ///
    /// The first section error found, or `InvalidValue` for a blank target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;
        self.pruning.validate()?;
        self.training.validate()?;

        if self.calibration_targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid_value(
                "calibration_targets",
                "target names must not be blank",
            ));
        }
        if self.pruning_targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid_value(
                "pruning_targets",
                "target names must not be blank",
            ));
        }
        Ok(())
    }

    /// Load and validate a pipeline configuration.
    ///
    /// # Errors
    ///
    /// `File` when the file cannot be read, `Parse` for malformed JSON, or
    /// any validation error.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let config: PipelineConfig = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// `File` when the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pruning::PruningScope;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        PipelineConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"pruning": {"amount": 0.5, "scope": "global"}}"#).expect("json");
        assert!((config.pruning.amount - 0.5).abs() < 1e-6);
        assert_eq!(config.pruning.scope, PruningScope::Global);
        assert_eq!(config.calibration, CalibrationConfig::default());
        assert_eq!(config.training, TrainingConfig::default());
        assert!(config.pruning_targets.is_empty());
    }

    #[test]
    fn test_blank_target_rejected() {
        let config = PipelineConfig {
            pruning_targets: vec!["fc1".into(), "  ".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "pruning_targets", .. })
        ));
    }

    #[test]
    fn test_section_errors_surface() {
        let mut config = PipelineConfig::default();
        config.calibration.levels = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("configs").join("pipeline.json");
        let config = PipelineConfig {
            calibration_targets: vec!["encoder".into()],
            pruning_targets: vec!["fc".into()],
            ..Default::default()
        };
        config.to_json(&path).expect("write");
        assert_eq!(PipelineConfig::from_json(&path).expect("read"), config);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            PipelineConfig::from_json(&missing),
            Err(ConfigError::File { .. })
        ));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").expect("write");
        assert!(matches!(PipelineConfig::from_json(&bad), Err(ConfigError::Parse { .. })));
    }
}
