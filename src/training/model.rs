//! The model interface the train loop drives.

use std::collections::BTreeMap;

use super::batch::Batch;
use crate::autograd::Tensor;
use crate::error::{Result, TrainError};
use crate::nn::Module;

/// Key under which map-style outputs carry their logits.
pub const LOGITS_KEY: &str = "logits";

/// What a model returns: bare logits, or a map that contains them.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Logits tensor `[.., classes]`.
    Logits(Tensor),
    /// Named outputs; the train loop reads `"logits"`.
    Map(BTreeMap<String, Tensor>),
}

impl ModelOutput {
    /// The logits, wherever they are.
    ///
    /// # Errors
    ///
    /// `MissingField("logits")` for a map without that key.
    pub fn logits(&self) -> std::result::Result<&Tensor, TrainError> {
        match self {
            ModelOutput::Logits(t) => Ok(t),
            ModelOutput::Map(map) => map
                .get(LOGITS_KEY)
                .ok_or_else(|| TrainError::missing_field(LOGITS_KEY)),
        }
    }

    /// Owned logits.
    ///
    /// # Errors
    ///
    /// See [`ModelOutput::logits`].
    pub fn into_logits(self) -> std::result::Result<Tensor, TrainError> {
        match self {
            ModelOutput::Logits(t) => Ok(t),
            ModelOutput::Map(mut map) => map
                .remove(LOGITS_KEY)
                .ok_or_else(|| TrainError::missing_field(LOGITS_KEY)),
        }
    }
}

impl From<Tensor> for ModelOutput {
    fn from(logits: Tensor) -> Self {
        ModelOutput::Logits(logits)
    }
}

/// A trainable classifier over named-field batches.
pub trait Model {
    /// Forward pass over every input field the model needs.
    ///
    /// # Errors
    ///
    /// Implementations report missing inputs or internal failures.
    fn forward(&self, inputs: &Batch) -> Result<ModelOutput>;

    /// Underlying module tree (parameters, compression targets).
    fn module(&self) -> &dyn Module;

    /// Mutable module tree.
    fn module_mut(&mut self) -> &mut dyn Module;

    /// Switch to training mode.
    fn train(&mut self) {
        self.module_mut().train();
    }

    /// Switch to evaluation mode.
    fn eval(&mut self) {
        self.module_mut().eval();
    }
}

/// Wraps a [`Module`] that maps one input field to logits.
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::nn::Linear;
/// use nanoquant::training::{Batch, Classifier, Model};
///
/// let model = Classifier::new(Linear::with_seed(3, 2, Some(0)), "features");
/// let batch = Batch::new().with("features", Tensor::ones(&[4, 3]));
/// let output = model.forward(&batch).expect("forward");
/// assert_eq!(output.logits().expect("logits").shape(), &[4, 2]);
/// ```
pub struct Classifier<M: Module> {
    module: M,
    input_field: String,
    map_output: bool,
}

impl<M: Module> Classifier<M> {
    /// Read `input_field` and return bare logits.
    pub fn new(module: M, input_field: impl Into<String>) -> Self {
        Self {
            module,
            input_field: input_field.into(),
            map_output: false,
        }
    }

    /// Return `{"logits": ..}` maps instead of bare tensors.
    #[must_use]
    pub fn with_map_output(mut self) -> Self {
        self.map_output = true;
        self
    }

    /// Name of the input field.
    #[must_use]
    pub fn input_field(&self) -> &str {
        &self.input_field
    }

    /// Wrapped module.
    pub fn inner(&self) -> &M {
        &self.module
    }

    /// Mutable wrapped module.
    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.module
    }

    /// Unwrap.
    pub fn into_inner(self) -> M {
        self.module
    }
}

impl<M: Module> Model for Classifier<M> {
    fn forward(&self, inputs: &Batch) -> Result<ModelOutput> {
        let x = inputs
            .get(&self.input_field)
            .ok_or_else(|| TrainError::missing_field(self.input_field.as_str()))?;
        let logits = self.module.forward(x);
        Ok(if self.map_output {
            ModelOutput::Map(BTreeMap::from([(LOGITS_KEY.to_string(), logits)]))
        } else {
            ModelOutput::Logits(logits)
        })
    }

    fn module(&self) -> &dyn Module {
        &self.module
    }

    fn module_mut(&mut self) -> &mut dyn Module {
        &mut self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, Sequential};

    #[test]
    fn test_logits_from_map() {
        let output = ModelOutput::Map(BTreeMap::from([("logits".to_string(), Tensor::ones(&[1, 2]))]));
        assert_eq!(output.logits().expect("logits").shape(), &[1, 2]);
        assert!(output.into_logits().is_ok());
    }

    #[test]
    fn test_map_without_logits() {
        let output = ModelOutput::Map(BTreeMap::from([("hidden".to_string(), Tensor::ones(&[1]))]));
        assert!(matches!(
            output.logits(),
            Err(TrainError::MissingField { ref field }) if field == "logits"
        ));
    }

    #[test]
    fn test_classifier_map_output() {
        let model = Classifier::new(Linear::with_seed(2, 3, Some(1)), "x").with_map_output();
        let output = model.forward(&Batch::new().with("x", Tensor::ones(&[5, 2]))).expect("forward");
        assert!(matches!(output, ModelOutput::Map(_)));
        assert_eq!(output.logits().expect("logits").shape(), &[5, 3]);
    }

    #[test]
    fn test_classifier_missing_input() {
        let model = Classifier::new(Linear::with_seed(2, 3, Some(1)), "x");
        let err = model.forward(&Batch::new()).expect_err("no x");
        assert!(err.to_string().contains("`x`"));
    }

    #[test]
    fn test_classifier_mode_switch() {
        let mut model = Classifier::new(Sequential::new().add(Linear::with_seed(2, 2, Some(0))), "x");
        model.eval();
        assert!(!model.module().training());
        model.train();
        assert!(model.module().training());
        assert_eq!(model.input_field(), "x");
    }
}
