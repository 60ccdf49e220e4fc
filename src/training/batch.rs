//! Named-field batches and the sources that yield them.

use std::collections::BTreeMap;

use crate::autograd::Tensor;
use crate::error::TrainError;

/// One batch of examples: an ordered map from field name to tensor.
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::training::Batch;
///
/// let batch = Batch::new()
///     .with("features", Tensor::ones(&[4, 3]))
///     .with("label", Tensor::from_slice(&[0.0, 1.0, 1.0, 0.0]));
///
/// assert_eq!(batch.label("label").expect("label").numel(), 4);
/// assert_eq!(batch.inputs("label").count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Batch {
    fields: BTreeMap<String, Tensor>,
}

impl Batch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Batch::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    /// Set a field, returning the tensor it replaced.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.fields.insert(name.into(), tensor)
    }

    /// Field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.fields.get(name)
    }

    /// The label field.
    ///
    /// # Errors
    ///
    /// `MissingField` if the batch has no field called `field`.
    pub fn label(&self, field: &str) -> Result<&Tensor, TrainError> {
        self.get(field).ok_or_else(|| TrainError::missing_field(field))
    }

    /// Every field except the label, in name order.
    pub fn inputs<'a>(&'a self, label_field: &'a str) -> impl Iterator<Item = (&'a str, &'a Tensor)> + 'a {
        self.fields
            .iter()
            .filter(move |(name, _)| name.as_str() != label_field)
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the batch has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Tensor)> for Batch {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A finite, restartable stream of batches.
///
/// Each call to [`BatchSource::batches`] starts a fresh pass (one epoch).
pub trait BatchSource {
    /// Iterate one full pass over the data.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

impl BatchSource for Vec<Batch> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_label_is_error() {
        let batch = Batch::new().with("x", Tensor::ones(&[1, 2]));
        let err = batch.label("label").expect_err("no label");
        assert!(matches!(err, TrainError::MissingField { ref field } if field == "label"));
    }

    #[test]
    fn test_inputs_skip_label_in_name_order() {
        let batch = Batch::new()
            .with("z", Tensor::ones(&[1]))
            .with("label", Tensor::zeros(&[1]))
            .with("a", Tensor::ones(&[1]));
        let names: Vec<&str> = batch.inputs("label").map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "z"]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_vec_source_restarts_each_pass() {
        let mut source = vec![Batch::new(), Batch::new()];
        assert_eq!(source.batches().count(), 2);
        assert_eq!(source.batches().count(), 2);
    }

    #[test]
    fn test_from_iterator() {
        let batch: Batch = vec![("x".to_string(), Tensor::ones(&[2]))].into_iter().collect();
        assert!(batch.get("x").is_some());
        assert!(!batch.is_empty());
    }
}
