//! Functional interface for neural network operations.
//!
//! Stateless, differentiable counterparts of the layer modules. Calibration
//! uses these directly to run a layer's affine map with a substituted weight.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::Tensor;
//! use nanoquant::nn::F;
//!
//! let x = Tensor::new(&[1.0, -2.0, 3.0, 0.5], &[2, 2]);
//! let probs = F::softmax(&F::relu(&x));
//! assert_eq!(probs.shape(), &[2, 2]);
//! ```

use crate::autograd::Tensor;

/// `ReLU` activation: max(0, x)
#[must_use]
pub fn relu(x: &Tensor) -> Tensor {
    x.relu()
}

/// Softmax along the last dimension.
///
/// Equation: softmax(x)\_i = exp(x\_i - max) / sum\_j exp(x\_j - max)
#[must_use]
pub fn softmax(x: &Tensor) -> Tensor {
    x.softmax()
}

/// Log softmax along the last dimension.
///
/// More numerically stable than log(softmax(x)).
#[must_use]
pub fn log_softmax(x: &Tensor) -> Tensor {
    x.log_softmax()
}

/// Linear transformation: y = x @ weight^T + bias
///
/// `x` may have any number of leading batch dimensions; they are flattened
/// for the matmul and restored on the output.
///
/// # Panics
///
/// Panics if the last dimension of `x` differs from `weight`'s column count.
#[must_use]
pub fn linear(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Tensor {
    let out_features = weight.shape()[0];
    let leading: Vec<usize> = x.shape()[..x.ndim().saturating_sub(1)].to_vec();

    let flat = if x.ndim() == 2 {
        x.clone()
    } else {
        x.flatten_leading()
    };
    let output = flat.matmul(&weight.transpose());

    let output = match bias {
        Some(b) => output.broadcast_add(b),
        None => output,
    };

    if x.ndim() == 2 {
        output
    } else {
        let mut shape = leading;
        shape.push(out_features);
        output.view(&shape)
    }
}
