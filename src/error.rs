//! Error types for nanoquant operations.
//!
//! ```text
//! NanoQuantError (top-level)
//! ├── ConfigError        (config validation / file loading)
//! ├── QuantizationError  (fake quantization, scale calibration)
//! ├── PruningError       (mask generation, finalize)
//! └── TrainError         (train / eval loop)
//! ```
//!
//! Operator entry points return [`Result<T>`]; module-level errors convert
//! into [`NanoQuantError`] through `From`.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::pruning::PruningError;

/// Convenient `Result` alias used across the crate.
pub type Result<T> = std::result::Result<T, NanoQuantError>;

/// Top-level error type.
///
/// # Examples
///
/// ```
/// use nanoquant::error::{ConfigError, NanoQuantError};
///
/// let err: NanoQuantError = ConfigError::invalid_value("lr", "must be positive").into();
/// assert!(err.to_string().contains("lr"));
/// ```
#[derive(Debug, Error)]
pub enum NanoQuantError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Calibration or fake-quantization failure.
    #[error("Quantization error: {0}")]
    Quantization(#[from] QuantizationError),

    /// Pruning failure.
    #[error("Pruning error: {0}")]
    Pruning(#[from] PruningError),

    /// Train or eval loop failure.
    #[error("Training error: {0}")]
    Train(#[from] TrainError),

    /// A tensor did not have the shape an operation required.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NanoQuantError {
    /// Construct a [`NanoQuantError::ShapeMismatch`].
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        NanoQuantError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// The requested compute device is not available in this build.
    #[error("Unsupported device `{device}`: only `cpu` is available")]
    UnsupportedDevice {
        /// Device string as given.
        device: String,
    },

    /// A configuration file could not be read or written.
    #[error("Cannot access config file `{path}`: {source}")]
    File {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// QuantizationError
// ---------------------------------------------------------------------------

/// Errors raised by fake quantization and scale calibration.
#[derive(Debug, Error)]
pub enum QuantizationError {
    /// The module handed to calibration exposes no weight.
    #[error("Layer `{layer}` has no weight to quantize")]
    MissingWeight {
        /// Hierarchical layer name.
        layer: String,
    },

    /// The quantization grid needs at least two levels.
    #[error("Invalid number of quantization levels {levels}: must be >= 2")]
    InvalidLevels {
        /// Levels requested.
        levels: u32,
    },

    /// Calibration input does not fit the layer.
    #[error("Layer `{layer}` expects {expected} input features, got {actual}")]
    ShapeMismatch {
        /// Hierarchical layer name.
        layer: String,
        /// Input width the layer expects.
        expected: usize,
        /// Input width provided.
        actual: usize,
    },

    /// The calibration objective diverged.
    #[error("Non-finite calibration loss for `{layer}` at epoch {epoch}")]
    NonFiniteLoss {
        /// Hierarchical layer name.
        layer: String,
        /// Zero-based epoch.
        epoch: usize,
    },
}

// ---------------------------------------------------------------------------
// TrainError
// ---------------------------------------------------------------------------

/// Errors raised by the train / eval loop.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A batch or model output lacks a required field.
    #[error("Missing field `{field}`")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A data source or collection yielded nothing where data is required.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Logits and labels disagree in shape.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A label is not a class index in `[0, classes)`.
    #[error("Invalid label {value}: expected an integer in [0, {classes})")]
    InvalidLabel {
        /// Offending label value.
        value: f32,
        /// Number of classes.
        classes: usize,
    },

    /// The model's forward pass failed.
    #[error("Model forward failed: {0}")]
    Model(String),
}

impl TrainError {
    /// Construct a [`TrainError::MissingField`].
    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        TrainError::MissingField {
            field: field.into(),
        }
    }

    /// Construct a [`TrainError::Model`].
    pub fn model<S: Into<String>>(msg: S) -> Self {
        TrainError::Model(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: NanoQuantError = ConfigError::invalid_value("epochs", "must be >= 1").into();
        assert!(matches!(err, NanoQuantError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value for `epochs`: must be >= 1"
        );
    }

    #[test]
    fn test_quantization_error_display() {
        let err = QuantizationError::MissingWeight {
            layer: "encoder.fc1".to_string(),
        };
        assert!(err.to_string().contains("encoder.fc1"));

        let err = QuantizationError::InvalidLevels { levels: 1 };
        assert!(err.to_string().contains(">= 2"));
    }

    #[test]
    fn test_train_error_helpers() {
        let err = TrainError::missing_field("label");
        assert_eq!(err.to_string(), "Missing field `label`");

        let err: NanoQuantError = TrainError::model("boom").into();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_pruning_error_converts() {
        let err: NanoQuantError = PruningError::UnsupportedMethod {
            method: "ln_structured".to_string(),
        }
        .into();
        assert!(matches!(err, NanoQuantError::Pruning(_)));
        assert!(err.to_string().contains("ln_structured"));
    }

    #[test]
    fn test_shape_mismatch_helper() {
        let err = NanoQuantError::shape_mismatch(&[2, 3], &[3, 2]);
        assert_eq!(err.to_string(), "Shape mismatch: expected [2, 3], got [3, 2]");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: NanoQuantError = io.into();
        assert!(matches!(err, NanoQuantError::Io(_)));
    }
}
