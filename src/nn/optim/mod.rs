//! Gradient-based optimizers.
//!
//! Optimizers read gradients from the autograd graph by parameter id and
//! update parameter data in place.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::{clear_graph, Tensor};
//! use nanoquant::nn::{Optimizer, SGD};
//!
//! clear_graph();
//! let mut param = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
//! let mut sgd = SGD::new(&[&param], 0.1);
//!
//! param.pow(2.0).sum().backward();
//! sgd.step_with_params(&mut [&mut param]);
//! sgd.zero_grad();
//!
//! assert!((param.data()[0] - 0.8).abs() < 1e-6);
//! ```
//!
//! # References
//!
//! - Robbins, H., & Monro, S. (1951). A stochastic approximation method.
//! - Kingma, D. P., & Ba, J. (2015). Adam: A method for stochastic optimization. ICLR.
//! - Loshchilov, I., & Hutter, F. (2019). Decoupled weight decay regularization. ICLR.

use crate::autograd::{clear_grad, get_grad, Tensor, TensorId};

/// Common trait for all optimizers.
pub trait Optimizer {
    /// Update `params` from their stored gradients.
    ///
    /// Parameters are matched to optimizer state by position, so pass them
    /// in the same order on every call. Parameters without a gradient are
    /// left unchanged.
    fn step_with_params(&mut self, params: &mut [&mut Tensor]);

    /// Drop the stored gradients of the registered parameters.
    fn zero_grad(&mut self);

    /// Current learning rate.
    fn lr(&self) -> f32;

    /// Set learning rate (for schedulers).
    fn set_lr(&mut self, lr: f32);
}

fn clear_grads(ids: &[TensorId]) {
    for &id in ids {
        clear_grad(id);
    }
}

/// Per-parameter state buffer, reset whenever the parameter's size changes.
fn state_slot(buffers: &mut Vec<Vec<f32>>, idx: usize, len: usize) -> &mut Vec<f32> {
    if idx >= buffers.len() {
        buffers.resize(idx + 1, Vec::new());
    }
    if buffers[idx].len() != len {
        buffers[idx] = vec![0.0; len];
    }
    &mut buffers[idx]
}

/// Stochastic Gradient Descent with optional momentum.
///
/// ```text
/// v_t = momentum * v_{t-1} + grad
/// param = param - lr * v_t
/// ```
#[derive(Debug)]
pub struct SGD {
    param_ids: Vec<TensorId>,
    lr: f32,
    momentum: f32,
    /// L2 penalty added to the gradient
    weight_decay: f32,
    velocities: Vec<Vec<f32>>,
}

impl SGD {
    /// Create a new SGD optimizer over `params`.
    #[must_use]
    pub fn new(params: &[&Tensor], lr: f32) -> Self {
        Self {
            param_ids: params.iter().map(|p| p.id()).collect(),
            lr,
            momentum: 0.0,
            weight_decay: 0.0,
            velocities: Vec::new(),
        }
    }

    /// Create SGD with momentum.
    #[must_use]
    pub fn with_momentum(params: &[&Tensor], lr: f32, momentum: f32) -> Self {
        Self {
            momentum,
            ..Self::new(params, lr)
        }
    }

    /// Set weight decay (L2 regularization).
    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }
}

impl Optimizer for SGD {
    fn step_with_params(&mut self, params: &mut [&mut Tensor]) {
        for (idx, param) in params.iter_mut().enumerate() {
            let Some(grad) = get_grad(param.id()) else {
                continue;
            };
            let velocity = state_slot(&mut self.velocities, idx, param.numel());
            let param_data = param.data_mut();

            for ((p, &g), v) in param_data.iter_mut().zip(grad.data()).zip(velocity.iter_mut()) {
                let g = g + self.weight_decay * *p;
                if self.momentum != 0.0 {
                    *v = self.momentum * *v + g;
                    *p -= self.lr * *v;
                } else {
                    *p -= self.lr * g;
                }
            }
        }
    }

    fn zero_grad(&mut self) {
        clear_grads(&self.param_ids);
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// First and second moment estimates shared by [`Adam`] and [`AdamW`].
#[derive(Debug)]
struct Moments {
    beta1: f32,
    beta2: f32,
    eps: f32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    t: i32,
}

impl Moments {
    fn new() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    /// One Adam update. `l2` is added to the gradient, `decoupled` shrinks
    /// the parameter directly before the adaptive step.
    fn update(&mut self, params: &mut [&mut Tensor], lr: f32, l2: f32, decoupled: f32) {
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t);

        for (idx, param) in params.iter_mut().enumerate() {
            let Some(grad) = get_grad(param.id()) else {
                continue;
            };
            let len = param.numel();
            state_slot(&mut self.m, idx, len);
            state_slot(&mut self.v, idx, len);
            let (m, v) = (&mut self.m[idx], &mut self.v[idx]);

            for (i, p) in param.data_mut().iter_mut().enumerate() {
                let g = grad.data()[i] + l2 * *p;

                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;

                let m_hat = m[i] / bias_correction1;
                let v_hat = v[i] / bias_correction2;

                *p -= lr * decoupled * *p;
                *p -= lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

/// Adam optimizer (Kingma & Ba, 2015).
///
/// ```text
/// m_t = β₁ * m_{t-1} + (1 - β₁) * grad
/// v_t = β₂ * v_{t-1} + (1 - β₂) * grad²
/// param = param - lr * m̂_t / (√v̂_t + ε)
/// ```
///
/// Weight decay, if set, is an L2 term added to the gradient.
#[derive(Debug)]
pub struct Adam {
    param_ids: Vec<TensorId>,
    lr: f32,
    weight_decay: f32,
    moments: Moments,
}

impl Adam {
    /// Create Adam with β₁=0.9, β₂=0.999, ε=1e-8.
    #[must_use]
    pub fn new(params: &[&Tensor], lr: f32) -> Self {
        Self {
            param_ids: params.iter().map(|p| p.id()).collect(),
            lr,
            weight_decay: 0.0,
            moments: Moments::new(),
        }
    }

    /// Set beta parameters.
    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.moments.beta1 = beta1;
        self.moments.beta2 = beta2;
        self
    }

    /// Set weight decay (L2 regularization, applied to gradient).
    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    /// Number of steps taken.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.moments.t as usize
    }
}

impl Optimizer for Adam {
    fn step_with_params(&mut self, params: &mut [&mut Tensor]) {
        self.moments.update(params, self.lr, self.weight_decay, 0.0);
    }

    fn zero_grad(&mut self) {
        clear_grads(&self.param_ids);
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// `AdamW` optimizer (Loshchilov & Hutter, 2019): Adam with decoupled
/// weight decay.
///
/// ```text
/// param = param - lr * weight_decay * param
/// param = param - lr * m̂_t / (√v̂_t + ε)
/// ```
#[derive(Debug)]
pub struct AdamW {
    param_ids: Vec<TensorId>,
    lr: f32,
    weight_decay: f32,
    moments: Moments,
}

impl AdamW {
    /// Create `AdamW` with β₁=0.9, β₂=0.999, ε=1e-8, `weight_decay=0.01`.
    #[must_use]
    pub fn new(params: &[&Tensor], lr: f32) -> Self {
        Self {
            param_ids: params.iter().map(|p| p.id()).collect(),
            lr,
            weight_decay: 0.01,
            moments: Moments::new(),
        }
    }

    /// Set decoupled weight decay.
    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }
}

impl Optimizer for AdamW {
    fn step_with_params(&mut self, params: &mut [&mut Tensor]) {
        self.moments.update(params, self.lr, 0.0, self.weight_decay);
    }

    fn zero_grad(&mut self) {
        clear_grads(&self.param_ids);
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests;
