//! Gradient clipping.

use crate::autograd::{get_grad, set_grad, Tensor};

/// Rescale the gradients of `params` so their joint L2 norm is at most
/// `max_norm`.
///
/// Returns the norm measured before clipping. Parameters without a stored
/// gradient are ignored; a non-positive `max_norm` leaves gradients alone.
pub fn clip_grad_norm(params: &[&Tensor], max_norm: f32) -> f32 {
    let grads: Vec<(&Tensor, Tensor)> = params
        .iter()
        .filter_map(|p| get_grad(p.id()).map(|g| (*p, g)))
        .collect();

    let total_norm = grads
        .iter()
        .flat_map(|(_, g)| g.data().iter())
        .map(|v| v * v)
        .sum::<f32>()
        .sqrt();

    if max_norm > 0.0 && total_norm > max_norm {
        let coef = max_norm / (total_norm + 1e-6);
        for (param, grad) in grads {
            let scaled = grad.data().iter().map(|v| v * coef).collect();
            set_grad(param.id(), Tensor::from_vec(scaled, grad.shape()));
        }
    }

    total_norm
}
