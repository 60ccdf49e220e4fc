//! Differentiable loss functions.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::Tensor;
//! use nanoquant::nn::CrossEntropyLoss;
//!
//! let criterion = CrossEntropyLoss::new();
//! let logits = Tensor::new(&[1.0, 2.0, 0.5, 0.1, 3.0, 0.2], &[2, 3]).requires_grad();
//! let targets = Tensor::from_slice(&[1.0, 1.0]);
//! let loss = criterion.forward(&logits, &targets);
//! assert!(loss.item() > 0.0);
//! ```
//!
//! # References
//!
//! - Bishop, C. M. (2006). Pattern Recognition and Machine Learning. Springer.
//! - Kullback, S., & Leibler, R. A. (1951). On information and sufficiency.

use std::sync::Arc;

use crate::autograd::grad_fn::{CrossEntropyBackward, KlDivBackward};
use crate::autograd::{record_op, Tensor};

/// Reduction mode for loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Return loss per sample (no reduction)
    None,
    /// Return mean of losses (default)
    #[default]
    Mean,
    /// Return sum of losses
    Sum,
}

/// Cross-Entropy Loss for classification.
///
/// Fuses log-softmax and negative log likelihood:
/// ```text
/// loss = -log(softmax(logits)[target_class])
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    /// Mean-reduced cross entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross entropy with an explicit reduction.
    #[must_use]
    pub fn with_reduction(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Reduction in use.
    #[must_use]
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Compute cross-entropy loss.
    ///
    /// * `logits` - Shape [batch, num_classes]
    /// * `targets` - Shape [batch], integer class indices stored as f32
    ///
    /// # Panics
    ///
    /// Panics on shape disagreement or a target outside `[0, num_classes)`.
    /// The training loop validates labels before calling this.
    #[must_use]
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        assert_eq!(logits.ndim(), 2, "Logits must be 2D [batch, classes]");
        assert_eq!(targets.ndim(), 1, "Targets must be 1D [batch]");
        assert_eq!(
            logits.shape()[0],
            targets.shape()[0],
            "Batch sizes must match"
        );

        let batch_size = logits.shape()[0];
        let num_classes = logits.shape()[1];

        let log_probs = logits.detach().log_softmax();
        let softmax_output = logits.detach().softmax();

        let target_indices: Vec<usize> = targets
            .data()
            .iter()
            .map(|&t| {
                let idx = t as usize;
                assert!(
                    t >= 0.0 && idx < num_classes,
                    "Target class {t} out of bounds for {num_classes} classes"
                );
                idx
            })
            .collect();

        let losses: Vec<f32> = target_indices
            .iter()
            .enumerate()
            .map(|(b, &target)| -log_probs.data()[b * num_classes + target])
            .collect();

        let (mut loss, scale) = match self.reduction {
            Reduction::None => (Tensor::from_vec(losses, &[batch_size]), 1.0),
            Reduction::Mean => {
                let n = batch_size.max(1) as f32;
                (Tensor::scalar(losses.iter().sum::<f32>() / n), 1.0 / n)
            }
            Reduction::Sum => (Tensor::scalar(losses.iter().sum::<f32>()), 1.0),
        };

        let grad_fn = Arc::new(CrossEntropyBackward {
            softmax_output,
            targets: target_indices,
            scale,
        });
        record_op(&mut loss, grad_fn, &[logits]);
        loss
    }
}

/// Kullback-Leibler divergence with `batchmean` reduction.
///
/// `input` holds log-probabilities, `target` holds probabilities, and the
/// loss is
/// ```text
/// L = Σ target · (ln target − input) / batch
/// ```
/// where `batch` is the size of the first dimension. Terms with a zero
/// target contribute nothing. Gradients flow into both arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct KLDivLoss;

impl KLDivLoss {
    /// Batch-mean KL divergence.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compute the divergence as a `[1]` tensor.
    ///
    /// Rounding can push an analytically zero divergence slightly below zero;
    /// the reported value is floored at 0.
    ///
    /// # Panics
    ///
    /// Panics if `input` and `target` differ in shape.
    #[must_use]
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        assert_eq!(
            input.shape(),
            target.shape(),
            "KLDivLoss: input and target shapes must match"
        );
        let batch = input.shape().first().copied().unwrap_or(1).max(1);

        let total: f32 = input
            .data()
            .iter()
            .zip(target.data())
            .filter(|(_, &t)| t > 0.0)
            .map(|(&x, &t)| t * (t.ln() - x))
            .sum();

        let mut loss = Tensor::scalar((total / batch as f32).max(0.0));
        let grad_fn = Arc::new(KlDivBackward {
            input: input.clone(),
            target: target.clone(),
            batch,
        });
        record_op(&mut loss, grad_fn, &[input, target]);
        loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let logits = Tensor::zeros(&[2, 4]);
        let targets = Tensor::from_slice(&[0.0, 3.0]);
        let loss = CrossEntropyLoss::new().forward(&logits, &targets);
        assert!((loss.item() - 4.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_gradient_mean() {
        clear_graph();
        let logits = Tensor::new(&[0.0, 0.0, 0.0, 0.0], &[2, 2]).requires_grad();
        let targets = Tensor::from_slice(&[0.0, 1.0]);
        CrossEntropyLoss::new().forward(&logits, &targets).backward();

        let grad = get_grad(logits.id()).expect("logits grad");
        // (softmax - onehot) / batch = (0.5 - 1) / 2, 0.5 / 2
        assert_eq!(grad.data(), &[-0.25, 0.25, 0.25, -0.25]);
    }

    #[test]
    fn test_cross_entropy_sum_and_none() {
        let logits = Tensor::new(&[2.0, 0.0, 0.0, 2.0], &[2, 2]);
        let targets = Tensor::from_slice(&[0.0, 1.0]);

        let none = CrossEntropyLoss::with_reduction(Reduction::None).forward(&logits, &targets);
        assert_eq!(none.shape(), &[2]);

        let sum = CrossEntropyLoss::with_reduction(Reduction::Sum).forward(&logits, &targets);
        let mean = CrossEntropyLoss::new().forward(&logits, &targets);
        assert!((sum.item() - 2.0 * mean.item()).abs() < 1e-5);
        assert!((none.data()[0] - none.data()[1]).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_cross_entropy_rejects_bad_target() {
        let _ = CrossEntropyLoss::new().forward(&Tensor::zeros(&[1, 2]), &Tensor::from_slice(&[5.0]));
    }

    #[test]
    fn test_kl_zero_for_identical_distributions() {
        let logits = Tensor::new(&[0.3, -0.2, 1.0, 0.0, 0.0, 2.0], &[2, 3]);
        let loss = KLDivLoss::new().forward(&logits.log_softmax(), &logits.softmax());
        assert!(loss.item().abs() < 1e-5);
        assert!(loss.item() >= 0.0);
    }

    #[test]
    fn test_kl_positive_for_different_distributions() {
        let p = Tensor::new(&[0.0, 0.0], &[1, 2]).log_softmax();
        let q = Tensor::new(&[0.9, 0.1], &[1, 2]);
        // 0.9 ln(0.9/0.5) + 0.1 ln(0.1/0.5)
        let expected = 0.9 * (1.8_f32).ln() + 0.1 * (0.2_f32).ln();
        let loss = KLDivLoss::new().forward(&p, &q);
        assert!((loss.item() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_kl_gradient_reaches_target_logits() {
        clear_graph();
        let full = Tensor::new(&[1.0, 0.0], &[1, 2]).log_softmax();
        let z = Tensor::new(&[0.0, 1.0], &[1, 2]).requires_grad();
        KLDivLoss::new()
            .forward(&full, &z.softmax().add_scalar(1e-8))
            .backward();

        let grad = get_grad(z.id()).expect("z grad");
        // Pulling q toward p means raising z[0] and lowering z[1].
        assert!(grad.data()[0] < 0.0);
        assert!(grad.data()[1] > 0.0);
        assert!((grad.data()[0] + grad.data()[1]).abs() < 1e-5);
    }
}
