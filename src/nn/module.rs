//! The `Module` trait and the weighted-layer capability.
//!
//! Compression operators never downcast: they walk a model through
//! [`Module::named_children_mut`] and reach weights through
//! [`Module::as_weighted_mut`].

use crate::autograd::Tensor;
use crate::error::{NanoQuantError, Result};

/// Base trait for all neural network layers.
///
/// Containers report their children by name so that a layer can be
/// addressed by a dotted hierarchical path such as `encoder.fc1`.
pub trait Module {
    /// Forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Learnable parameters, in a stable order.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Mutable access to the learnable parameters, same order as [`Module::parameters`].
    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    /// Switch to training mode.
    fn train(&mut self) {}

    /// Switch to evaluation mode.
    fn eval(&mut self) {}

    /// Whether the module is in training mode.
    fn training(&self) -> bool {
        true
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    /// Direct children with their local names.
    fn named_children(&self) -> Vec<(String, &dyn Module)> {
        Vec::new()
    }

    /// Mutable direct children with their local names.
    fn named_children_mut(&mut self) -> Vec<(String, &mut dyn Module)> {
        Vec::new()
    }

    /// The weighted-layer view of this module, if it has one.
    fn as_weighted(&self) -> Option<&dyn WeightedLayer> {
        None
    }

    /// Mutable weighted-layer view of this module, if it has one.
    fn as_weighted_mut(&mut self) -> Option<&mut dyn WeightedLayer> {
        None
    }
}

/// A layer computing an affine map from a weight matrix `[out, in]` and an
/// optional bias `[out]`.
///
/// While a pruning mask is attached the layer behaves as if its weight were
/// `weight ⊙ mask`; the stored weight itself is untouched until the mask is
/// folded in.
pub trait WeightedLayer {
    /// Stored weight, shape `[out, in]`.
    fn weight(&self) -> &Tensor;

    /// Bias, shape `[out]`.
    fn bias(&self) -> Option<&Tensor>;

    /// Overwrite the weight values in place.
    ///
    /// The parameter keeps its identity, so optimizers holding it stay valid.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when `weight` does not have the stored shape.
    fn set_weight(&mut self, weight: &Tensor) -> Result<()>;

    /// Attached pruning mask (1 = keep, 0 = pruned), if any.
    fn weight_mask(&self) -> Option<&Tensor>;

    /// Attach or remove a pruning mask.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when the mask does not have the weight's shape.
    fn set_weight_mask(&mut self, mask: Option<Tensor>) -> Result<()>;

    /// Apply this layer's affine transform with `weight` substituted for the
    /// stored one. The bias, if any, is the layer's own.
    fn forward_with_weight(&self, input: &Tensor, weight: &Tensor) -> Tensor;

    /// Input feature width.
    fn in_features(&self) -> usize {
        self.weight().shape().get(1).copied().unwrap_or(0)
    }

    /// Output feature width.
    fn out_features(&self) -> usize {
        self.weight().shape().first().copied().unwrap_or(0)
    }

    /// Weight as seen by the forward pass: masked entries read as zero.
    fn effective_weight(&self) -> Tensor {
        match self.weight_mask() {
            Some(mask) => {
                let data = self
                    .weight()
                    .data()
                    .iter()
                    .zip(mask.data())
                    .map(|(&w, &m)| w * m)
                    .collect();
                Tensor::from_vec(data, self.weight().shape())
            }
            None => self.weight().detach(),
        }
    }
}

/// Check that `candidate` has `expected`'s shape.
pub(crate) fn check_shape(expected: &Tensor, candidate: &Tensor) -> Result<()> {
    if expected.shape() == candidate.shape() {
        Ok(())
    } else {
        Err(NanoQuantError::shape_mismatch(
            expected.shape(),
            candidate.shape(),
        ))
    }
}

/// Join a parent path and a child name with a dot.
pub(crate) fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Every weighted layer reachable from `module`, keyed by dotted name.
///
/// Traversal is depth-first in child order. A weighted module is reported
/// as a leaf even if it also has children. The root itself is named `""`.
pub fn named_weighted_layers_mut(module: &mut dyn Module) -> Vec<(String, &mut dyn WeightedLayer)> {
    let mut out = Vec::new();
    collect_weighted(String::new(), module, &mut out);
    out
}

fn collect_weighted<'a>(
    name: String,
    module: &'a mut dyn Module,
    out: &mut Vec<(String, &'a mut dyn WeightedLayer)>,
) {
    if module.as_weighted().is_some() {
        if let Some(layer) = module.as_weighted_mut() {
            out.push((name, layer));
        }
        return;
    }
    for (child_name, child) in module.named_children_mut() {
        collect_weighted(join_name(&name, &child_name), child, out);
    }
}

/// Names of every module in the tree, parents before children.
///
/// The root is omitted.
#[must_use]
pub fn module_names(module: &dyn Module) -> Vec<String> {
    let mut out = Vec::new();
    collect_names("", module, &mut out);
    out
}

fn collect_names(prefix: &str, module: &dyn Module, out: &mut Vec<String>) {
    for (child_name, child) in module.named_children() {
        let name = join_name(prefix, &child_name);
        out.push(name.clone());
        collect_names(&name, child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, ReLU, Sequential};

    fn encoder() -> Sequential {
        let inner = Sequential::new()
            .add_named("fc1", Linear::with_seed(4, 3, Some(1)))
            .add_named("act", ReLU::new())
            .add_named("fc2", Linear::with_seed(3, 2, Some(2)));
        Sequential::new()
            .add_named("encoder", inner)
            .add(Linear::with_seed(2, 2, Some(3)))
    }

    #[test]
    fn test_named_weighted_layers_are_dotted() {
        let mut model = encoder();
        let names: Vec<String> = named_weighted_layers_mut(&mut model)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["encoder.fc1", "encoder.fc2", "1"]);
    }

    #[test]
    fn test_root_linear_is_its_own_layer() {
        let mut layer = Linear::with_seed(2, 2, Some(0));
        let layers = named_weighted_layers_mut(&mut layer);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].0, "");
    }

    #[test]
    fn test_module_names_include_unweighted() {
        let model = encoder();
        assert_eq!(
            module_names(&model),
            vec!["encoder", "encoder.fc1", "encoder.act", "encoder.fc2", "1"]
        );
    }

    #[test]
    fn test_effective_weight_applies_mask() {
        let mut layer = Linear::with_seed(2, 1, Some(0));
        layer
            .set_weight(&Tensor::new(&[3.0, -4.0], &[1, 2]))
            .expect("same shape");
        layer
            .set_weight_mask(Some(Tensor::new(&[0.0, 1.0], &[1, 2])))
            .expect("same shape");
        assert_eq!(layer.effective_weight().data(), &[0.0, -4.0]);
        assert_eq!(layer.weight().data(), &[3.0, -4.0]);
    }

    #[test]
    fn test_check_shape() {
        let a = Tensor::zeros(&[2, 2]);
        assert!(check_shape(&a, &Tensor::ones(&[2, 2])).is_ok());
        assert!(check_shape(&a, &Tensor::ones(&[4])).is_err());
    }

    #[test]
    fn test_join_name() {
        assert_eq!(join_name("", "fc1"), "fc1");
        assert_eq!(join_name("encoder", "fc1"), "encoder.fc1");
    }
}
