//! NanoQuant: model compression primitives in pure Rust.
//!
//! NanoQuant learns quantization scales, prunes weights, and fine-tunes the
//! compressed model, all on a small tape-based autograd engine.
//!
//! # Quick Start
//!
//! ```
//! use nanoquant::prelude::*;
//!
//! let mut model = Sequential::new()
//!     .add_named("fc1", Linear::with_seed(8, 8, Some(0)))
//!     .add(ReLU::new())
//!     .add_named("fc2", Linear::with_seed(8, 2, Some(1)));
//!
//! // Learn an 8-bit scale for fc1 and bake the quantized weights in
//! let input = Tensor::ones(&[4, 8]);
//! let reports = calibrate_model(&mut model, &input, &["fc1".to_string()], &CalibrationConfig::default())
//!     .expect("calibrate");
//! assert_eq!(reports.len(), 1);
//!
//! // Remove half of fc2's weights by magnitude
//! let config = PruningConfig { amount: 0.5, ..Default::default() };
//! let result = prune_model(&mut model, &["fc2".to_string()], &config).expect("prune");
//! assert!((result.layer_sparsity["fc2"] - 0.5).abs() < 1e-6);
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tensors and reverse-mode differentiation
//! - [`nn`]: Layers, losses, optimizers, and LR schedulers
//! - [`quantization`]: STE fake quantization and KL scale calibration
//! - [`pruning`]: L1 / random unstructured pruning with finalize
//! - [`training`]: Generic train / eval loop over named-field batches
//! - [`config`]: JSON pipeline configuration
//! - [`logging`]: `tracing` subscriber setup

pub mod autograd;
pub mod config;
pub mod error;
pub mod logging;
pub mod nn;
pub mod prelude;
pub mod pruning;
pub mod quantization;
pub mod training;

pub use error::{NanoQuantError, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
