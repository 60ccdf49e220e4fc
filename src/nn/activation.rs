//! Activation function modules.
//!
//! These modules wrap activation functions for use in Sequential containers.
//! For functional versions, see `nn::functional`.
//!
//! # References
//!
//! - Nair, V., & Hinton, G. E. (2010). Rectified linear units improve restricted
//!   Boltzmann machines. ICML.

use super::module::Module;
use crate::autograd::Tensor;

/// Rectified Linear Unit activation: ReLU(x) = max(0, x)
///
/// Has no weight, so compression operators pass over it.
///
/// # Example
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::nn::{Module, ReLU};
///
/// let relu = ReLU::new();
/// let y = relu.forward(&Tensor::from_slice(&[-1.0, 0.0, 1.0, 2.0]));
/// assert_eq!(y.data(), &[0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    /// Create a new ReLU activation.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_has_no_weight() {
        let mut relu = ReLU::new();
        assert!(relu.parameters().is_empty());
        assert!(relu.as_weighted().is_none());
        assert!(relu.as_weighted_mut().is_none());
    }

    #[test]
    fn test_relu_preserves_shape() {
        let y = ReLU::new().forward(&Tensor::new(&[-1.0, 2.0, -3.0, 4.0], &[2, 2]));
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.data(), &[0.0, 2.0, 0.0, 4.0]);
    }
}
