//! Reverse-mode automatic differentiation.
//!
//! A define-by-run tape: differentiable operations on [`Tensor`] append a
//! [`GradFn`] to a thread-local [`ComputationGraph`] during the forward
//! pass, and [`Tensor::backward`] replays it in reverse.
//!
//! # Example
//!
//! ```
//! use nanoquant::autograd::{clear_graph, get_grad, Tensor};
//!
//! clear_graph();
//! let x = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();
//! let w = Tensor::from_slice(&[0.5, 0.5, 0.5]);
//!
//! let y = x.mul(&w).sum();
//! y.backward();
//!
//! let dx = get_grad(x.id()).expect("x is a leaf that requires grad");
//! assert_eq!(dx.data(), &[0.5, 0.5, 0.5]);
//! ```
//!
//! # References
//!
//! - Baydin, A. G., et al. (2018). Automatic differentiation in machine learning: a survey. JMLR.
//! - Griewank, A., & Walther, A. (2008). Evaluating derivatives. SIAM.

pub(crate) mod grad_fn;
mod graph;
mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

pub(crate) use ops::record_op;

use std::cell::RefCell;

thread_local! {
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Run `f` with gradient recording switched off.
///
/// The previous state is restored afterwards, so calls nest.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Whether operations are currently recorded.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Reset the thread's tape and every stored gradient.
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Gradient of a leaf tensor by id.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Overwrite the stored gradient of a tensor; `false` if it is not in the graph.
pub fn set_grad(id: TensorId, grad: Tensor) -> bool {
    with_graph(|graph| graph.set_grad(id, grad))
}

/// Drop the stored gradient of a tensor.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}
