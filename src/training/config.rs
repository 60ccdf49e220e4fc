//! Fine-tuning configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::device::Device;
use crate::autograd::Tensor;
use crate::error::ConfigError;
use crate::nn::{Adam, AdamW, Optimizer, SGD};

/// Which optimizer the train loop builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with L2 weight decay.
    Adam,
    /// Adam with decoupled weight decay.
    #[default]
    AdamW,
    /// SGD with optional momentum.
    Sgd,
}

/// Train loop hyperparameters.
///
/// ```
/// use nanoquant::training::TrainingConfig;
///
/// let config = TrainingConfig::default();
/// assert_eq!(config.epochs, 1);
/// assert_eq!(config.label_field, "label");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Passes over the training source.
    pub epochs: usize,
    /// Initial learning rate.
    pub lr: f32,
    /// Optimizer family.
    pub optimizer: OptimizerKind,
    /// Weight decay (L2 for Adam and SGD, decoupled for AdamW).
    pub weight_decay: f32,
    /// SGD momentum; ignored by the Adam family.
    pub momentum: f32,
    /// Clip the global gradient norm to this value before each step.
    pub max_grad_norm: Option<f32>,
    /// Micro-batches accumulated per optimizer step.
    pub accumulation_steps: usize,
    /// Batch field holding class labels.
    pub label_field: String,
    /// Compute device name.
    pub device: String,
    /// Seed for data shuffling.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            lr: 1e-5,
            optimizer: OptimizerKind::default(),
            weight_decay: 0.01,
            momentum: 0.0,
            max_grad_norm: None,
            accumulation_steps: 1,
            label_field: "label".to_string(),
            device: "cpu".to_string(),
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Load and validate a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// `File` if the file cannot be read, `Parse` for malformed JSON, or the
    /// first validation failure.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let config: TrainingConfig = crate::config::read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// `File` if the directory or file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        crate::config::write_json(self, path)
    }

    /// Parsed compute device.
    ///
    /// # Errors
    ///
    /// `UnsupportedDevice` for anything but `cpu`.
    pub fn device(&self) -> Result<Device, ConfigError> {
        self.device.parse()
    }

    /// Validate every field.
    ///
    /// # Errors
    ///
    /// `InvalidValue` naming the first bad field, or `UnsupportedDevice`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::invalid_value("epochs", "must be >= 1"));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(ConfigError::invalid_value("lr", format!("must be > 0, got {}", self.lr)));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::invalid_value("weight_decay", "must be >= 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::invalid_value("momentum", "must be in [0, 1)"));
        }
        if let Some(norm) = self.max_grad_norm {
            if !norm.is_finite() || norm <= 0.0 {
                return Err(ConfigError::invalid_value("max_grad_norm", "must be > 0 when set"));
            }
        }
        if self.accumulation_steps == 0 {
            return Err(ConfigError::invalid_value("accumulation_steps", "must be >= 1"));
        }
        if self.label_field.is_empty() {
            return Err(ConfigError::invalid_value("label_field", "must not be empty"));
        }
        self.device()?;
        Ok(())
    }

    /// Build the configured optimizer over `params`.
    #[must_use]
    pub fn build_optimizer(&self, params: &[&Tensor]) -> Box<dyn Optimizer> {
        match self.optimizer {
            OptimizerKind::Adam => Box::new(Adam::new(params, self.lr).weight_decay(self.weight_decay)),
            OptimizerKind::AdamW => Box::new(AdamW::new(params, self.lr).weight_decay(self.weight_decay)),
            OptimizerKind::Sgd => Box::new(
                SGD::with_momentum(params, self.lr, self.momentum).weight_decay(self.weight_decay),
            ),
        }
    }
}
