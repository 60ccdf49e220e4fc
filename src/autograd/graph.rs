//! Tape-based computation graph.
//!
//! Operations append a [`TapeEntry`] in execution order; `backward` replays
//! the tape in reverse, routing each output gradient through its `GradFn`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
#[derive(Clone)]
pub(crate) struct TapeEntry {
    pub output_id: TensorId,
    pub grad_fn: Arc<dyn GradFn>,
    pub input_ids: Vec<TensorId>,
}

/// Computation graph that records operations for the backward pass.
///
/// One graph lives per thread (see the parent module). Leaf tensors are
/// registered by id; their gradients survive until [`ComputationGraph::clear`],
/// which lets several backward passes accumulate into the same leaves.
#[allow(missing_debug_implementations)]
pub struct ComputationGraph {
    tape: Vec<TapeEntry>,
    tensors: HashMap<TensorId, Tensor>,
    requires_grad: HashSet<TensorId>,
}

impl ComputationGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            tensors: HashMap::new(),
            requires_grad: HashSet::new(),
        }
    }

    /// Drop the tape, the registered tensors and their gradients.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
        self.requires_grad.clear();
    }

    /// Register a tensor taking part in a recorded operation.
    ///
    /// A tensor already known to the graph keeps its existing entry so that
    /// gradients accumulated by earlier backward passes are not lost.
    pub fn register_tensor(&mut self, tensor: Tensor) {
        if tensor.requires_grad_enabled() {
            self.requires_grad.insert(tensor.id());
        }
        self.tensors.entry(tensor.id()).or_insert(tensor);
    }

    /// Append an operation to the tape.
    pub fn record(&mut self, output_id: TensorId, grad_fn: Arc<dyn GradFn>, input_ids: Vec<TensorId>) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    /// Registered tensor by id.
    #[must_use]
    pub fn get_tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    /// Reverse-mode sweep from `output_id`.
    ///
    /// Gradients of intermediate tensors are summed when a tensor feeds
    /// several operations; the totals land on registered leaf tensors that
    /// require grad.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let Some(grad_out) = grads.get(&entry.output_id).cloned() else {
                continue;
            };

            let input_grads = entry.grad_fn.backward(&grad_out);

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                match grads.get_mut(input_id) {
                    Some(existing) => {
                        for (acc, g) in existing.data_mut().iter_mut().zip(input_grad.data()) {
                            *acc += g;
                        }
                    }
                    None => {
                        grads.insert(*input_id, input_grad);
                    }
                }
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                if tensor.requires_grad_enabled() && tensor.is_leaf() {
                    tensor.accumulate_grad(grad);
                }
            }
        }
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Gradient of a registered tensor, after backward.
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Overwrite the gradient of a registered tensor.
    ///
    /// Returns `false` when the tensor is unknown to the graph.
    pub fn set_grad(&mut self, id: TensorId, grad: Tensor) -> bool {
        match self.tensors.get_mut(&id) {
            Some(tensor) => {
                tensor.set_grad(grad);
                true
            }
            None => false,
        }
    }

    /// Drop the gradient of a registered tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.clear_grad();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}
