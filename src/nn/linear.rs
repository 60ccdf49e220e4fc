//! Fully connected (linear) layer.
//!
//! Implements the transformation y = xW^T + b.
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.

use super::functional;
use super::init::xavier_uniform;
use super::module::{check_shape, Module, WeightedLayer};
use crate::autograd::Tensor;
use crate::error::Result;

/// Fully connected layer: y = xW^T + b
///
/// Weight initialization follows Xavier/Glorot (Glorot & Bengio, 2010).
/// The layer is the unit every compression operator works on: it exposes
/// its weight through [`WeightedLayer`] and can carry a pruning mask.
///
/// # Shape
///
/// - Input: `(*, in_features)` where `*` means any number of batch dimensions
/// - Output: `(*, out_features)`
///
/// # Example
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::nn::{Linear, Module};
///
/// let layer = Linear::with_seed(20, 30, Some(7));
/// let x = Tensor::ones(&[128, 20]);
/// let output = layer.forward(&x);
///
/// assert_eq!(output.shape(), &[128, 30]);
/// ```
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Bias vector, shape: [out_features], or None if bias=false
    bias: Option<Tensor>,

    /// Pruning mask congruent with `weight` while pruning is in progress
    mask: Option<Tensor>,

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    #[must_use]
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(
            &[out_features, in_features],
            in_features,
            out_features,
            seed,
        )
        .requires_grad();
        let bias = Tensor::zeros(&[out_features]).requires_grad();

        Self {
            weight,
            bias: Some(bias),
            mask: None,
            in_features,
            out_features,
        }
    }

    /// Create a Linear layer without bias.
    #[must_use]
    pub fn without_bias(in_features: usize, out_features: usize) -> Self {
        let mut layer = Self::with_seed(in_features, out_features, None);
        layer.bias = None;
        layer
    }

    /// Build a layer from explicit weight `[out, in]` and optional bias `[out]`.
    ///
    /// # Panics
    ///
    /// Panics if the weight is not 2D or the bias length differs from the
    /// weight's row count.
    #[must_use]
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> Self {
        assert_eq!(weight.ndim(), 2, "Linear weight must be 2D");
        let (out_features, in_features) = (weight.shape()[0], weight.shape()[1]);
        if let Some(b) = &bias {
            assert_eq!(
                b.shape(),
                &[out_features],
                "Linear bias must have shape [{out_features}]"
            );
        }

        Self {
            weight: weight.requires_grad(),
            bias: bias.map(Tensor::requires_grad),
            mask: None,
            in_features,
            out_features,
        }
    }

    /// Check if this layer has a bias term.
    #[must_use]
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Whether a pruning mask is currently attached.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

impl WeightedLayer for Linear {
    fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    fn set_weight(&mut self, weight: &Tensor) -> Result<()> {
        check_shape(&self.weight, weight)?;
        self.weight.data_mut().copy_from_slice(weight.data());
        Ok(())
    }

    fn weight_mask(&self) -> Option<&Tensor> {
        self.mask.as_ref()
    }

    fn set_weight_mask(&mut self, mask: Option<Tensor>) -> Result<()> {
        if let Some(m) = &mask {
            check_shape(&self.weight, m)?;
        }
        self.mask = mask;
        Ok(())
    }

    fn forward_with_weight(&self, input: &Tensor, weight: &Tensor) -> Tensor {
        functional::linear(input, weight, self.bias.as_ref())
    }

    fn in_features(&self) -> usize {
        self.in_features
    }

    fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        match &self.mask {
            Some(mask) => self.forward_with_weight(input, &self.weight.mul(mask)),
            None => self.forward_with_weight(input, &self.weight),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match &mut self.bias {
            Some(b) => vec![&mut self.weight, b],
            None => vec![&mut self.weight],
        }
    }

    fn as_weighted(&self) -> Option<&dyn WeightedLayer> {
        Some(self)
    }

    fn as_weighted_mut(&mut self) -> Option<&mut dyn WeightedLayer> {
        Some(self)
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .field("masked", &self.mask.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(10, 5);
        let output = layer.forward(&Tensor::ones(&[32, 10]));
        assert_eq!(output.shape(), &[32, 5]);
    }

    #[test]
    fn test_linear_forward_3d_input() {
        let layer = Linear::with_seed(4, 3, Some(1));
        let output = layer.forward(&Tensor::ones(&[2, 5, 4]));
        assert_eq!(output.shape(), &[2, 5, 3]);
    }

    #[test]
    fn test_linear_parameters() {
        let layer = Linear::new(10, 5);
        let params = layer.parameters();

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].shape(), &[5, 10]);
        assert_eq!(params[1].shape(), &[5]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_without_bias() {
        let layer = Linear::without_bias(10, 5);
        assert_eq!(layer.parameters().len(), 1);
        assert!(!layer.has_bias());
    }

    #[test]
    fn test_linear_reproducible() {
        let layer1 = Linear::with_seed(10, 5, Some(42));
        let layer2 = Linear::with_seed(10, 5, Some(42));
        assert_eq!(layer1.weight.data(), layer2.weight.data());
    }

    #[test]
    fn test_linear_with_known_weights() {
        let layer = Linear::from_weights(
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Some(Tensor::new(&[10.0, 20.0], &[2])),
        );

        // [1, 2] @ I + [10, 20]
        let output = layer.forward(&Tensor::new(&[1.0, 2.0], &[1, 2]));
        let out_data = output.data();
        assert!((out_data[0] - 11.0).abs() < 1e-5);
        assert!((out_data[1] - 22.0).abs() < 1e-5);
    }

    #[test]
    fn test_set_weight_keeps_identity() {
        let mut layer = Linear::with_seed(2, 2, Some(0));
        let id = layer.weight().id();
        layer
            .set_weight(&Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]))
            .expect("same shape");
        assert_eq!(layer.weight().id(), id);
        assert_eq!(layer.weight().data(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(layer.weight().requires_grad_enabled());
    }

    #[test]
    fn test_set_weight_rejects_wrong_shape() {
        let mut layer = Linear::with_seed(2, 2, Some(0));
        assert!(layer.set_weight(&Tensor::zeros(&[4])).is_err());
        assert!(layer.set_weight_mask(Some(Tensor::ones(&[2, 3]))).is_err());
        assert!(!layer.is_masked());
    }

    #[test]
    fn test_masked_forward_zeroes_pruned_entries() {
        let mut layer = Linear::from_weights(Tensor::new(&[2.0, 3.0], &[1, 2]), None);
        layer
            .set_weight_mask(Some(Tensor::new(&[1.0, 0.0], &[1, 2])))
            .expect("same shape");

        let output = layer.forward(&Tensor::new(&[1.0, 1.0], &[1, 2]));
        assert!((output.data()[0] - 2.0).abs() < 1e-6);

        layer.set_weight_mask(None).expect("removing a mask");
        let output = layer.forward(&Tensor::new(&[1.0, 1.0], &[1, 2]));
        assert!((output.data()[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_masked_weight_gets_masked_gradient() {
        clear_graph();
        let mut layer = Linear::from_weights(Tensor::new(&[2.0, 3.0], &[1, 2]), None);
        layer
            .set_weight_mask(Some(Tensor::new(&[1.0, 0.0], &[1, 2])))
            .expect("same shape");

        layer.forward(&Tensor::new(&[1.0, 1.0], &[1, 2])).sum().backward();
        let grad = get_grad(layer.weight().id()).expect("weight gradient");
        assert_eq!(grad.data(), &[1.0, 0.0]);
    }
}
