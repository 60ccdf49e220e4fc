//! Differentiable operations for tensors.
//!
//! Each operation computes its forward value and, when gradient tracking is
//! enabled and an input requires grad, records a `GradFn` on the tape.
//!
//! Matrix multiplication goes through trueno's SIMD kernels.

use std::sync::Arc;

use super::grad_fn::{
    AddBackward, BroadcastAddBackward, DivBackward, ExpBackward, GradFn, LogBackward,
    LogSoftmaxBackward, MatmulBackward, MeanBackward, MulBackward, NegBackward, PowBackward,
    ReluBackward, ScaleBackward, SoftmaxBackward, SubBackward, SumBackward, TransposeBackward,
    ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Record `result` as the output of `grad_fn` applied to `inputs`.
///
/// No-op unless recording is on and at least one input requires grad.
pub(crate) fn record_op(result: &mut Tensor, grad_fn: Arc<dyn GradFn>, inputs: &[&Tensor]) {
    if !is_grad_enabled() || !inputs.iter().any(|t| t.requires_grad_enabled()) {
        return;
    }
    result.requires_grad_(true);
    result.set_grad_fn(grad_fn.clone());

    with_graph(|graph| {
        for input in inputs {
            graph.register_tensor((*input).clone());
        }
        graph.record(
            result.id(),
            grad_fn,
            inputs.iter().map(|t| t.id()).collect(),
        );
    });
}

/// Row-major `[m, k] @ [k, n]`.
pub(crate) fn matmul_data(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let simd = trueno::Matrix::from_vec(m, k, a.to_vec())
        .and_then(|lhs| {
            trueno::Matrix::from_vec(k, n, b.to_vec()).and_then(|rhs| lhs.matmul(&rhs))
        })
        .map(|out| out.as_slice().to_vec());

    match simd {
        Ok(data) => data,
        // Degenerate shapes (a zero dimension) are rejected by trueno.
        Err(_) => {
            let mut out = vec![0.0; m * n];
            for i in 0..m {
                for p in 0..k {
                    let a_ip = a[i * k + p];
                    for j in 0..n {
                        out[i * n + j] += a_ip * b[p * n + j];
                    }
                }
            }
            out
        }
    }
}

/// Row-major transpose of a `[rows, cols]` buffer.
pub(crate) fn transpose_data(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    out
}

fn assert_same_shape(op: &str, a: &Tensor, b: &Tensor) {
    assert_eq!(
        a.shape(),
        b.shape(),
        "{op}: shape mismatch {:?} vs {:?}",
        a.shape(),
        b.shape()
    );
}

fn zip_map(a: &Tensor, b: &Tensor, f: impl Fn(f32, f32) -> f32) -> Tensor {
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Tensor::from_vec(data, a.shape())
}

fn unary_map(a: &Tensor, f: impl Fn(f32) -> f32) -> Tensor {
    Tensor::from_vec(a.data().iter().map(|&x| f(x)).collect(), a.shape())
}

// ============================================================================
// Element-wise Operations
// ============================================================================

impl Tensor {
    /// Element-wise addition of equally shaped tensors.
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_same_shape("add", self, other);
        let mut result = zip_map(self, other, |a, b| a + b);
        let grad_fn = Arc::new(AddBackward {
            x_shape: self.shape().to_vec(),
            y_shape: other.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Element-wise subtraction.
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_same_shape("sub", self, other);
        let mut result = zip_map(self, other, |a, b| a - b);
        let grad_fn = Arc::new(SubBackward {
            x_shape: self.shape().to_vec(),
            y_shape: other.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Element-wise multiplication.
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_same_shape("mul", self, other);
        let mut result = zip_map(self, other, |a, b| a * b);
        let grad_fn = Arc::new(MulBackward {
            x: self.clone(),
            y: other.clone(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Element-wise division.
    #[must_use]
    pub fn div(&self, other: &Tensor) -> Tensor {
        assert_same_shape("div", self, other);
        let mut result = zip_map(self, other, |a, b| a / b);
        let grad_fn = Arc::new(DivBackward {
            x: self.clone(),
            y: other.clone(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Element-wise negation.
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let mut result = unary_map(self, |a| -a);
        record_op(&mut result, Arc::new(NegBackward), &[self]);
        result
    }

    /// Multiply every element by a constant.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let mut result = unary_map(self, |a| a * scalar);
        record_op(&mut result, Arc::new(ScaleBackward { factor: scalar }), &[self]);
        result
    }

    /// Add a constant to every element.
    #[must_use]
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        let mut result = unary_map(self, |a| a + scalar);
        record_op(&mut result, Arc::new(ScaleBackward { factor: 1.0 }), &[self]);
        result
    }
}

// ============================================================================
// Transcendental Operations
// ============================================================================

impl Tensor {
    /// Element-wise exponential.
    #[must_use]
    pub fn exp(&self) -> Tensor {
        let mut result = unary_map(self, f32::exp);
        let grad_fn = Arc::new(ExpBackward {
            output: result.clone(),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }

    /// Element-wise natural logarithm.
    #[must_use]
    pub fn log(&self) -> Tensor {
        let mut result = unary_map(self, f32::ln);
        record_op(&mut result, Arc::new(LogBackward { x: self.clone() }), &[self]);
        result
    }

    /// Element-wise power `x^n`.
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let mut result = unary_map(self, |a| a.powf(n));
        record_op(&mut result, Arc::new(PowBackward { x: self.clone(), n }), &[self]);
        result
    }
}

// ============================================================================
// Reductions
// ============================================================================

impl Tensor {
    /// Sum of all elements, shape `[1]`.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let mut result = Tensor::scalar(total);
        let grad_fn = Arc::new(SumBackward {
            input_shape: self.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }

    /// Mean of all elements, shape `[1]`.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let mut result = Tensor::scalar(total / self.numel().max(1) as f32);
        let grad_fn = Arc::new(MeanBackward {
            input_shape: self.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }

    /// Index of the largest value in each row of the last dimension.
    ///
    /// Ties resolve to the lowest index. Not differentiable.
    #[must_use]
    pub fn argmax_last_dim(&self) -> Vec<usize> {
        let features = self.last_dim();
        if features == 0 {
            return Vec::new();
        }
        self.data()
            .chunks(features)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
                        if v > best_val {
                            (i, v)
                        } else {
                            (best, best_val)
                        }
                    })
                    .0
            })
            .collect()
    }
}

// ============================================================================
// Activation Functions
// ============================================================================

/// Max-subtracted softmax over each row of `features` values.
fn softmax_rows(data: &[f32], features: usize) -> Vec<f32> {
    let mut output = vec![0.0; data.len()];
    if features == 0 {
        return output;
    }
    for (row, out) in data.chunks(features).zip(output.chunks_mut(features)) {
        let max_val = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mut sum = 0.0;
        for (o, &x) in out.iter_mut().zip(row) {
            *o = (x - max_val).exp();
            sum += *o;
        }
        for o in out.iter_mut() {
            *o /= sum;
        }
    }
    output
}

impl Tensor {
    /// `ReLU` activation: max(0, x)
    #[must_use]
    pub fn relu(&self) -> Tensor {
        let mut result = unary_map(self, |a| a.max(0.0));
        record_op(&mut result, Arc::new(ReluBackward { x: self.clone() }), &[self]);
        result
    }

    /// Softmax over the last dimension.
    ///
    /// softmax(x)_i = exp(x_i - max) / Σ_j exp(x_j - max)
    #[must_use]
    pub fn softmax(&self) -> Tensor {
        let mut result = Tensor::from_vec(softmax_rows(self.data(), self.last_dim()), self.shape());
        let grad_fn = Arc::new(SoftmaxBackward {
            output: result.clone(),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }

    /// Log-softmax over the last dimension, computed as `x - max - ln Σ exp(x - max)`.
    #[must_use]
    pub fn log_softmax(&self) -> Tensor {
        let features = self.last_dim();
        let mut output = vec![0.0; self.numel()];
        if features > 0 {
            for (row, out) in self.data().chunks(features).zip(output.chunks_mut(features)) {
                let max_val = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let log_sum_exp = row.iter().map(|&v| (v - max_val).exp()).sum::<f32>().ln();
                for (o, &x) in out.iter_mut().zip(row) {
                    *o = x - max_val - log_sum_exp;
                }
            }
        }

        let mut result = Tensor::from_vec(output, self.shape());
        let grad_fn = Arc::new(LogSoftmaxBackward {
            softmax: Tensor::from_vec(softmax_rows(self.data(), features), self.shape()),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

impl Tensor {
    /// Matrix multiplication of 2D tensors.
    ///
    /// # Panics
    ///
    /// Panics unless both operands are 2D with matching inner dimension.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");

        let (m, k1) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let data = matmul_data(self.data(), other.data(), m, k1, n);
        let mut result = Tensor::from_vec(data, &[m, n]);
        let grad_fn = Arc::new(MatmulBackward {
            x: self.clone(),
            y: other.clone(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Transpose of a 2D tensor.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let mut result = Tensor::from_vec(transpose_data(self.data(), rows, cols), &[cols, rows]);
        record_op(&mut result, Arc::new(TransposeBackward), &[self]);
        result
    }

    /// Add a `[M]` vector to every row of a `[N, M]` matrix.
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires 2D matrix");
        assert_eq!(other.ndim(), 1, "broadcast_add requires 1D vector");
        let cols = self.shape()[1];
        assert_eq!(
            cols,
            other.shape()[0],
            "Matrix columns {} must match vector length {}",
            cols,
            other.shape()[0]
        );

        let data = self
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| x + other.data()[i % cols])
            .collect();
        let mut result = Tensor::from_vec(data, self.shape());
        let grad_fn = Arc::new(BroadcastAddBackward {
            y_shape: other.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self, other]);
        result
    }

    /// Reshape to `new_shape`; the element count must not change.
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view: number of elements must match ({} vs {new_numel})",
            self.numel()
        );

        let mut result = Tensor::new(self.data(), new_shape);
        let grad_fn = Arc::new(ViewBackward {
            input_shape: self.shape().to_vec(),
        });
        record_op(&mut result, grad_fn, &[self]);
        result
    }

    /// Flatten all leading dimensions: `[.., C]` becomes `[N, C]`.
    #[must_use]
    pub fn flatten_leading(&self) -> Tensor {
        let features = self.last_dim();
        let rows = if features == 0 { 0 } else { self.numel() / features };
        self.view(&[rows, features])
    }
}
