//! In-memory data loader that stacks single examples into batches.

use rand::seq::SliceRandom;
use tracing::debug;

use super::batch::{Batch, BatchSource};
use crate::autograd::Tensor;
use crate::error::{ConfigError, Result, TrainError};
use crate::nn::rng_from_seed;

/// Batches a list of single examples.
///
/// Every example must carry the same fields with the same shapes; a batch
/// stacks each field along a new leading dimension.
///
/// ```
/// use nanoquant::autograd::Tensor;
/// use nanoquant::training::{Batch, BatchSource, DataLoader};
///
/// let examples: Vec<Batch> = (0..5)
///     .map(|i| {
///         Batch::new()
///             .with("x", Tensor::from_slice(&[i as f32, 1.0]))
///             .with("label", Tensor::scalar((i % 2) as f32))
///     })
///     .collect();
///
/// let mut loader = DataLoader::new(examples, 2).expect("uniform examples");
/// let shapes: Vec<Vec<usize>> = loader
///     .batches()
///     .map(|b| b.get("x").expect("x").shape().to_vec())
///     .collect();
/// assert_eq!(shapes, vec![vec![2, 2], vec![2, 2], vec![1, 2]]);
/// ```
#[derive(Debug, Clone)]
pub struct DataLoader {
    examples: Vec<Batch>,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
    drop_last: bool,
    epoch: u64,
}

impl DataLoader {
    /// Loader over `examples` in their given order.
    ///
    /// # Errors
    ///
    /// - `Config` if `batch_size` is 0
    /// - `Train::ShapeMismatch` / `Train::MissingField` if the examples are
    ///   not uniform
    pub fn new(examples: Vec<Batch>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0").into());
        }
        check_uniform(&examples)?;
        Ok(Self {
            examples,
            batch_size,
            shuffle: false,
            seed: None,
            drop_last: false,
            epoch: 0,
        })
    }

    /// Reshuffle before every pass. Passes are reproducible for a given
    /// seed and differ from one another.
    #[must_use]
    pub fn shuffled(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Drop a trailing batch smaller than `batch_size`.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// True when there are no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Number of batches one pass yields.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        if self.drop_last {
            self.examples.len() / self.batch_size
        } else {
            self.examples.len().div_ceil(self.batch_size)
        }
    }

    fn order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if self.shuffle {
            let mut rng = rng_from_seed(self.seed.map(|s| s.wrapping_add(self.epoch)));
            order.shuffle(&mut rng);
        }
        self.epoch += 1;
        order
    }
}

fn check_uniform(examples: &[Batch]) -> std::result::Result<(), TrainError> {
    let Some(first) = examples.first() else {
        return Ok(());
    };
    for example in &examples[1..] {
        for name in first.field_names() {
            let expected = first.get(name).map(Tensor::shape).unwrap_or_default();
            let tensor = example.label(name)?;
            if tensor.shape() != expected {
                return Err(TrainError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        if example.len() != first.len() {
            if let Some(extra) = example.field_names().find(|n| first.get(n).is_none()) {
                return Err(TrainError::missing_field(extra));
            }
        }
    }
    Ok(())
}

fn stack_examples(examples: &[&Batch]) -> Batch {
    let Some(first) = examples.first() else {
        return Batch::new();
    };
    first
        .field_names()
        .filter_map(|name| {
            let tensors: Vec<&Tensor> = examples.iter().filter_map(|e| e.get(name)).collect();
            Tensor::stack(&tensors).map(|t| (name.to_string(), t))
        })
        .collect()
}

impl BatchSource for DataLoader {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let order = self.order();
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;
        debug!(examples = order.len(), batch_size, "Starting data pass");

        let examples = &self.examples;
        let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();
        Box::new(
            chunks
                .into_iter()
                .filter(move |chunk| !drop_last || chunk.len() == batch_size)
                .map(move |chunk| {
                    let members: Vec<&Batch> = chunk.iter().map(|&i| &examples[i]).collect();
                    stack_examples(&members)
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples(n: usize) -> Vec<Batch> {
        (0..n)
            .map(|i| {
                Batch::new()
                    .with("x", Tensor::from_slice(&[i as f32, -(i as f32)]))
                    .with("label", Tensor::scalar(i as f32))
            })
            .collect()
    }

    fn labels_of(loader: &mut DataLoader) -> Vec<f32> {
        loader
            .batches()
            .flat_map(|b| b.get("label").expect("label").data().to_vec())
            .collect()
    }

    #[test]
    fn test_batches_in_order() {
        let mut loader = DataLoader::new(examples(5), 2).expect("loader");
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(labels_of(&mut loader), vec![0.0, 1.0, 2.0, 3.0, 4.0]);

        let first = loader.batches().next().expect("batch");
        assert_eq!(first.get("x").expect("x").data(), &[0.0, -0.0, 1.0, -1.0]);
        assert_eq!(first.get("label").expect("label").shape(), &[2, 1]);
    }

    #[test]
    fn test_drop_last() {
        let mut loader = DataLoader::new(examples(5), 2).expect("loader").drop_last(true);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.batches().count(), 2);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible_and_varies_by_pass() {
        let mut a = DataLoader::new(examples(16), 4).expect("a").shuffled(Some(3));
        let mut b = DataLoader::new(examples(16), 4).expect("b").shuffled(Some(3));

        let a1 = labels_of(&mut a);
        let b1 = labels_of(&mut b);
        assert_eq!(a1, b1);

        let a2 = labels_of(&mut a);
        assert_ne!(a1, a2);

        let mut sorted = a2.clone();
        sorted.sort_by(f32::total_cmp);
        assert_eq!(sorted, (0..16).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(DataLoader::new(examples(2), 0).is_err());
    }

    #[test]
    fn test_non_uniform_examples_rejected() {
        let mut data = examples(2);
        data.push(Batch::new().with("x", Tensor::ones(&[3])).with("label", Tensor::scalar(0.0)));
        assert!(DataLoader::new(data, 2).is_err());

        let mut data = examples(2);
        data.push(Batch::new().with("x", Tensor::ones(&[2])));
        assert!(DataLoader::new(data, 2).is_err());
    }

    #[test]
    fn test_empty_loader_yields_nothing() {
        let mut loader = DataLoader::new(Vec::new(), 4).expect("loader");
        assert!(loader.is_empty());
        assert_eq!(loader.batches().count(), 0);
    }
}
