//! Container modules for composing neural networks.

use super::module::Module;
use crate::autograd::Tensor;

/// Sequential container for chaining modules.
///
/// Modules are executed in order, with each module's output becoming the
/// next module's input. Every entry has a name: either given explicitly
/// with [`Sequential::add_named`] or its position, as with `torch.nn.Sequential`.
///
/// # Example
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::nn::{Linear, Module, ReLU, Sequential};
///
/// let model = Sequential::new()
///     .add_named("fc1", Linear::with_seed(8, 4, Some(0)))
///     .add(ReLU::new())
///     .add_named("fc2", Linear::with_seed(4, 2, Some(1)));
///
/// let output = model.forward(&Tensor::ones(&[3, 8]));
/// assert_eq!(output.shape(), &[3, 2]);
/// ```
pub struct Sequential {
    modules: Vec<(String, Box<dyn Module>)>,
    training: bool,
}

impl Sequential {
    /// Create an empty Sequential container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            training: true,
        }
    }

    /// Append a module named by its position.
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn add<M: Module + 'static>(self, module: M) -> Self {
        let name = self.modules.len().to_string();
        self.add_boxed(name, Box::new(module))
    }

    /// Append a module under an explicit name.
    #[must_use]
    pub fn add_named<M: Module + 'static>(self, name: impl Into<String>, module: M) -> Self {
        self.add_boxed(name.into(), Box::new(module))
    }

    /// Append an already boxed module.
    #[must_use]
    pub fn add_boxed(mut self, name: String, module: Box<dyn Module>) -> Self {
        self.modules.push((name, module));
        self
    }

    /// Child by local name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Module> {
        self.modules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.as_ref())
    }

    /// Mutable child by local name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Module + 'static)> {
        self.modules
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.as_mut())
    }

    /// Get the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.modules
            .iter()
            .fold(input.clone(), |x, (_, module)| module.forward(&x))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.modules.iter().flat_map(|(_, m)| m.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.modules
            .iter_mut()
            .flat_map(|(_, m)| m.parameters_mut())
            .collect()
    }

    fn train(&mut self) {
        self.training = true;
        for (_, module) in &mut self.modules {
            module.train();
        }
    }

    fn eval(&mut self) {
        self.training = false;
        for (_, module) in &mut self.modules {
            module.eval();
        }
    }

    fn training(&self) -> bool {
        self.training
    }

    fn named_children(&self) -> Vec<(String, &dyn Module)> {
        self.modules
            .iter()
            .map(|(name, m)| (name.clone(), m.as_ref() as &dyn Module))
            .collect()
    }

    fn named_children_mut(&mut self) -> Vec<(String, &mut dyn Module)> {
        self.modules
            .iter_mut()
            .map(|(name, m)| (name.clone(), m.as_mut() as &mut dyn Module))
            .collect()
    }
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Sequential")
            .field("modules", &names)
            .field("training", &self.training)
            .finish()
    }
}
