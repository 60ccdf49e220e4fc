//! Fake quantization with a straight-through estimator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::autograd::{record_op, GradFn, Tensor};
use crate::error::QuantizationError;

/// Smallest scale the calibration loop allows.
pub const SCALE_EPSILON: f32 = 1e-8;

/// Symmetric signed integer grid `[-L/2, L/2 - 1]`.
///
/// ```
/// use nanoquant::quantization::QuantGrid;
///
/// let grid = QuantGrid::new(256).expect("valid level count");
/// assert_eq!((grid.qmin(), grid.qmax()), (-128.0, 127.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantGrid {
    levels: u32,
}

impl QuantGrid {
    /// Grid with `levels` integer steps.
    ///
    /// # Errors
    ///
    /// `InvalidLevels` when `levels < 2`.
    pub fn new(levels: u32) -> Result<Self, QuantizationError> {
        if levels < 2 {
            return Err(QuantizationError::InvalidLevels { levels });
        }
        Ok(Self { levels })
    }

    /// Number of levels.
    #[must_use]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Lowest integer on the grid.
    #[must_use]
    pub fn qmin(&self) -> f32 {
        -((self.levels / 2) as f32)
    }

    /// Highest integer on the grid.
    #[must_use]
    pub fn qmax(&self) -> f32 {
        (self.levels / 2) as f32 - 1.0
    }

    /// Grid index of `w` at scale `s`: `clamp(round(w / s), qmin, qmax)`.
    #[must_use]
    pub fn quantize(&self, w: f32, s: f32) -> f32 {
        (w / s).round().clamp(self.qmin(), self.qmax())
    }
}

impl Default for QuantGrid {
    fn default() -> Self {
        Self { levels: 256 }
    }
}

/// Symmetric initial scale `max|W| / qmax`.
///
/// Falls back to [`SCALE_EPSILON`] when the weight is all zeros, contains
/// non-finite values, or the result is otherwise unusable. Grids whose
/// `qmax` is 0 (two or three levels) divide by 1 instead.
#[must_use]
pub fn init_scale(weight: &Tensor, grid: QuantGrid) -> f32 {
    let max_abs = weight.data().iter().fold(0.0_f32, |acc, &w| acc.max(w.abs()));
    let scale = max_abs / grid.qmax().max(1.0);
    if weight.is_finite() && scale.is_finite() && scale > 0.0 {
        scale
    } else {
        SCALE_EPSILON
    }
}

/// Dequantized values `clamp(round(w / s), qmin, qmax) * s` without tracking.
#[must_use]
pub fn quantize_values(weight: &[f32], scale: f32, grid: QuantGrid) -> Vec<f32> {
    weight.iter().map(|&w| grid.quantize(w, scale) * scale).collect()
}

/// `clamp(round(W / s), qmin, qmax) * s`, differentiable in `W` and `s`.
///
/// `scale` must hold a single element. Gradients:
///
/// - `∂/∂W` is 1 where `qmin <= round(W/s) <= qmax` and 0 where the clamp
///   saturates.
/// - `∂/∂s` is `round(W/s) - W/s` inside the range and `qmin` / `qmax`
///   where it saturates, summed over all elements.
///
/// # Panics
///
/// Panics if `scale` does not have exactly one element.
#[must_use]
pub fn fake_quantize(weight: &Tensor, scale: &Tensor, grid: QuantGrid) -> Tensor {
    let s = scale.item();
    let mut result = Tensor::from_vec(quantize_values(weight.data(), s, grid), weight.shape());

    let grad_fn = Arc::new(FakeQuantBackward {
        weight: weight.clone(),
        scale: s,
        scale_shape: scale.shape().to_vec(),
        grid,
    });
    record_op(&mut result, grad_fn, &[weight, scale]);
    result
}

/// Straight-through backward of [`fake_quantize`]; returns `[dW, ds]`.
struct FakeQuantBackward {
    weight: Tensor,
    scale: f32,
    scale_shape: Vec<usize>,
    grid: QuantGrid,
}

impl GradFn for FakeQuantBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (qmin, qmax) = (self.grid.qmin(), self.grid.qmax());
        let mut grad_weight = Vec::with_capacity(self.weight.numel());
        let mut grad_scale = 0.0_f32;

        for (&w, &g) in self.weight.data().iter().zip(grad_output.data()) {
            let v = w / self.scale;
            let r = v.round();
            if r < qmin {
                grad_weight.push(0.0);
                grad_scale += g * qmin;
            } else if r > qmax {
                grad_weight.push(0.0);
                grad_scale += g * qmax;
            } else {
                grad_weight.push(g);
                grad_scale += g * (r - v);
            }
        }

        vec![
            Tensor::from_vec(grad_weight, self.weight.shape()),
            Tensor::from_vec(vec![grad_scale], &self.scale_shape),
        ]
    }

    fn name(&self) -> &'static str {
        "FakeQuantBackward"
    }
}
