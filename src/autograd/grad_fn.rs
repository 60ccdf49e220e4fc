//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how gradients
//! flow backward through it.

use super::ops::{matmul_data, transpose_data};
use super::tensor::Tensor;

/// Backward rule of one recorded operation.
///
/// `backward` receives the gradient of the loss with respect to the
/// operation's output and returns one gradient per input, in the order the
/// inputs were recorded.
pub trait GradFn: Send + Sync {
    /// Gradients with respect to each recorded input.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

/// Sum a gradient down to `target_shape` when the input was broadcast.
///
/// Handles trailing-dimension broadcasting (`[N, M]` against `[M]`) and
/// scalar broadcasting (`[..]` against `[1]`).
pub(crate) fn maybe_reduce_grad(grad: &Tensor, target_shape: &[usize]) -> Tensor {
    if grad.shape() == target_shape {
        return grad.clone();
    }
    let target_numel: usize = target_shape.iter().product();
    let mut reduced = vec![0.0; target_numel];
    if target_numel > 0 {
        for (i, &g) in grad.data().iter().enumerate() {
            reduced[i % target_numel] += g;
        }
    }
    Tensor::from_vec(reduced, target_shape)
}

fn map_grad(grad_output: &Tensor, f: impl Fn(usize, f32) -> f32) -> Tensor {
    let data = grad_output
        .data()
        .iter()
        .enumerate()
        .map(|(i, &g)| f(i, g))
        .collect();
    Tensor::from_vec(data, grad_output.shape())
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// z = x + y
pub(crate) struct AddBackward {
    pub(crate) x_shape: Vec<usize>,
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![
            maybe_reduce_grad(grad_output, &self.x_shape),
            maybe_reduce_grad(grad_output, &self.y_shape),
        ]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// z = x - y
pub(crate) struct SubBackward {
    pub(crate) x_shape: Vec<usize>,
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let neg = map_grad(grad_output, |_, g| -g);
        vec![
            maybe_reduce_grad(grad_output, &self.x_shape),
            maybe_reduce_grad(&neg, &self.y_shape),
        ]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x*y)/∂x = y, ∂(x*y)/∂y = x
        let grad_x = map_grad(grad_output, |i, g| g * self.y.data()[i]);
        let grad_y = map_grad(grad_output, |i, g| g * self.x.data()[i]);
        vec![
            maybe_reduce_grad(&grad_x, self.x.shape()),
            maybe_reduce_grad(&grad_y, self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// z = x / y
pub(crate) struct DivBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for DivBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x/y)/∂x = 1/y, ∂(x/y)/∂y = -x/y²
        let grad_x = map_grad(grad_output, |i, g| g / self.y.data()[i]);
        let grad_y = map_grad(grad_output, |i, g| {
            let y = self.y.data()[i];
            -g * self.x.data()[i] / (y * y)
        });
        vec![
            maybe_reduce_grad(&grad_x, self.x.shape()),
            maybe_reduce_grad(&grad_y, self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "DivBackward"
    }
}

/// z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |_, g| -g)]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// z = factor * x (+ constant)
pub(crate) struct ScaleBackward {
    pub(crate) factor: f32,
}

impl GradFn for ScaleBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |_, g| g * self.factor)]
    }

    fn name(&self) -> &'static str {
        "ScaleBackward"
    }
}

// ============================================================================
// Transcendental Operations
// ============================================================================

/// z = exp(x)
pub(crate) struct ExpBackward {
    pub(crate) output: Tensor,
}

impl GradFn for ExpBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |i, g| g * self.output.data()[i])]
    }

    fn name(&self) -> &'static str {
        "ExpBackward"
    }
}

/// z = ln(x)
pub(crate) struct LogBackward {
    pub(crate) x: Tensor,
}

impl GradFn for LogBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |i, g| g / self.x.data()[i])]
    }

    fn name(&self) -> &'static str {
        "LogBackward"
    }
}

/// z = x^n
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |i, g| {
            g * self.n * self.x.data()[i].powf(self.n - 1.0)
        })]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

// ============================================================================
// Reductions
// ============================================================================

/// z = Σ x
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::full(&self.input_shape, grad_output.item())]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// z = mean(x)
pub(crate) struct MeanBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.input_shape.iter().product();
        let grad_val = grad_output.item() / numel.max(1) as f32;
        vec![Tensor::full(&self.input_shape, grad_val)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

// ============================================================================
// Activations
// ============================================================================

/// z = max(0, x)
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![map_grad(grad_output, |i, g| {
            if self.x.data()[i] > 0.0 {
                g
            } else {
                0.0
            }
        })]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// Softmax over the last dimension:
/// ∂L/∂x_i = y_i * (g_i - Σ_j g_j y_j)
pub(crate) struct SoftmaxBackward {
    pub(crate) output: Tensor,
}

impl GradFn for SoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let features = self.output.last_dim();
        let out = self.output.data();
        let grad = grad_output.data();
        let mut grad_input = vec![0.0; out.len()];

        for row in (0..out.len()).step_by(features.max(1)) {
            let span = row..row + features;
            let dot: f32 = grad[span.clone()]
                .iter()
                .zip(&out[span.clone()])
                .map(|(g, y)| g * y)
                .sum();
            for idx in span {
                grad_input[idx] = out[idx] * (grad[idx] - dot);
            }
        }

        vec![Tensor::from_vec(grad_input, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "SoftmaxBackward"
    }
}

/// Log-softmax over the last dimension:
/// ∂L/∂x_i = g_i - softmax(x)_i * Σ_j g_j
pub(crate) struct LogSoftmaxBackward {
    pub(crate) softmax: Tensor,
}

impl GradFn for LogSoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let features = self.softmax.last_dim();
        let p = self.softmax.data();
        let grad = grad_output.data();
        let mut grad_input = vec![0.0; p.len()];

        for row in (0..p.len()).step_by(features.max(1)) {
            let span = row..row + features;
            let total: f32 = grad[span.clone()].iter().sum();
            for idx in span {
                grad_input[idx] = grad[idx] - p[idx] * total;
            }
        }

        vec![Tensor::from_vec(grad_input, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "LogSoftmaxBackward"
    }
}

// ============================================================================
// Linear Algebra and Shape
// ============================================================================

/// z = x @ y with x: [m, k], y: [k, n]
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (m, k) = (self.x.shape()[0], self.x.shape()[1]);
        let n = self.y.shape()[1];

        // dX = G @ Yᵀ, dY = Xᵀ @ G
        let y_t = transpose_data(self.y.data(), k, n);
        let grad_x = matmul_data(grad_output.data(), &y_t, m, n, k);
        let x_t = transpose_data(self.x.data(), m, k);
        let grad_y = matmul_data(&x_t, grad_output.data(), k, m, n);

        vec![
            Tensor::from_vec(grad_x, &[m, k]),
            Tensor::from_vec(grad_y, &[k, n]),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// z = xᵀ for 2D x
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (grad_output.shape()[0], grad_output.shape()[1]);
        vec![Tensor::from_vec(
            transpose_data(grad_output.data(), rows, cols),
            &[cols, rows],
        )]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// z = matrix + row-vector broadcast over rows
pub(crate) struct BroadcastAddBackward {
    pub(crate) y_shape: Vec<usize>,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![
            grad_output.clone(),
            maybe_reduce_grad(grad_output, &self.y_shape),
        ]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

/// Reshape without copying semantics.
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

// ============================================================================
// Losses
// ============================================================================

/// Cross-entropy over logits (softmax + NLL fused):
/// ∂L/∂x = (softmax(x) - onehot(target)) / batch for mean reduction.
pub(crate) struct CrossEntropyBackward {
    pub(crate) softmax_output: Tensor,
    pub(crate) targets: Vec<usize>,
    /// 1/batch for mean reduction, 1 for sum.
    pub(crate) scale: f32,
}

impl GradFn for CrossEntropyBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let classes = self.softmax_output.last_dim();
        let mut grad = self.softmax_output.data().to_vec();
        let per_sample = grad_output.numel() == self.targets.len() && self.targets.len() > 1;

        for (b, &target) in self.targets.iter().enumerate() {
            let g = if per_sample {
                grad_output.data()[b]
            } else {
                grad_output.data()[0] * self.scale
            };
            let row = &mut grad[b * classes..(b + 1) * classes];
            row[target] -= 1.0;
            for v in row.iter_mut() {
                *v *= g;
            }
        }

        vec![Tensor::from_vec(grad, self.softmax_output.shape())]
    }

    fn name(&self) -> &'static str {
        "CrossEntropyBackward"
    }
}

/// KL divergence with batch-mean reduction, input given as log-probabilities:
/// L = Σ t·(ln t − x) / batch.
///
/// ∂L/∂x = −t / batch, ∂L/∂t = (ln t + 1 − x) / batch.
pub(crate) struct KlDivBackward {
    pub(crate) input: Tensor,
    pub(crate) target: Tensor,
    pub(crate) batch: usize,
}

impl GradFn for KlDivBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item() / self.batch.max(1) as f32;
        let x = self.input.data();
        let t = self.target.data();

        let grad_input: Vec<f32> = t.iter().map(|&t| -t * g).collect();
        let grad_target: Vec<f32> = t
            .iter()
            .zip(x)
            .map(|(&t, &x)| {
                if t > 0.0 {
                    (t.ln() + 1.0 - x) * g
                } else {
                    0.0
                }
            })
            .collect();

        vec![
            Tensor::from_vec(grad_input, self.input.shape()),
            Tensor::from_vec(grad_target, self.target.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "KlDivBackward"
    }
}
