//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use nanoquant::prelude::*;
//! ```

pub use crate::autograd::{clear_graph, no_grad, Tensor};
pub use crate::nn::{Linear, Module, Optimizer, ReLU, Sequential, WeightedLayer};
pub use crate::pruning::{prune_model, PruningConfig, PruningMethod, PruningResult, PruningScope};
pub use crate::quantization::{calibrate_layer, calibrate_model, fake_quantize, CalibrationConfig};
pub use crate::training::{evaluate, train, Batch, Classifier, DataLoader, Model, TrainingConfig};
pub use crate::config::PipelineConfig;
pub use crate::error::{NanoQuantError, Result};
