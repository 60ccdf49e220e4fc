//! Differentiable weight quantization.
//!
//! [`fake_quantize`] snaps weights to a symmetric integer grid times a
//! learnable scale while letting gradients through (straight-through
//! estimator). [`calibrate_layer`] learns that scale per layer by matching
//! the quantized layer's output distribution to the full-precision one, then
//! bakes the quantized weights into the layer.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::Tensor;
//! use nanoquant::nn::{Linear, WeightedLayer};
//! use nanoquant::quantization::{calibrate_layer, CalibrationConfig};
//!
//! let mut layer = Linear::with_seed(16, 4, Some(0));
//! let input = Tensor::ones(&[8, 16]);
//! let report = calibrate_layer(&mut layer, &input, &CalibrationConfig::default())
//!     .expect("calibration runs");
//!
//! assert!(report.scale > 0.0);
//! assert_eq!(report.losses.len(), 5);
//! assert_eq!(layer.weight().shape(), &[4, 16]);
//! ```
//!
//! # References
//!
//! - Bengio, Y., et al. (2013). Estimating or propagating gradients through
//!   stochastic neurons for conditional computation. arXiv:1308.3432.
//! - Esser, S. K., et al. (2020). Learned step size quantization. ICLR.

mod calibration;
mod fake_quant;

pub use calibration::{calibrate_layer, calibrate_model, CalibrationConfig, CalibrationReport};
pub use fake_quant::{fake_quantize, init_scale, quantize_values, QuantGrid, SCALE_EPSILON};
