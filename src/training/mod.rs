//! Generic fine-tuning loop.
//!
//! A [`Model`] maps a named-field [`Batch`] to logits; [`train`] drives it
//! with cross-entropy against the batch's label field, and [`evaluate`]
//! reports accuracy, a confusion matrix and forward latency under
//! `no_grad`.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::Tensor;
//! use nanoquant::nn::Linear;
//! use nanoquant::training::{train, Batch, Classifier, TrainingConfig};
//!
//! let mut model = Classifier::new(Linear::with_seed(2, 2, Some(0)), "x");
//! let mut data = vec![Batch::new()
//!     .with("x", Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]))
//!     .with("label", Tensor::from_slice(&[0.0, 1.0]))];
//!
//! let history = train(&mut model, &mut data, None, &TrainingConfig::default(), None)
//!     .expect("train");
//! assert_eq!(history.train_loss.len(), 1);
//! ```

mod batch;
mod config;
mod data;
mod device;
mod metrics;
mod model;
mod trainer;

pub use batch::{Batch, BatchSource};
pub use config::{OptimizerKind, TrainingConfig};
pub use data::DataLoader;
pub use device::{select_device, Device};
pub use metrics::{class_reports, ClassReport};
pub use model::{Classifier, Model, ModelOutput, LOGITS_KEY};
pub use trainer::{evaluate, evaluate_with_label, train, EvalMetrics, TrainingHistory};
