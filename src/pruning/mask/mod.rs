//! Boolean keep-masks congruent with a weight tensor.
//!
//! A mask is the in-flight state of a pruning pass: while attached to a layer
//! the layer computes with `weight ⊙ mask`, and `finalize` folds it into the
//! stored weight.

use super::error::PruningError;
use crate::autograd::Tensor;

/// Keep-mask over a weight tensor (`true` = keep, `false` = pruned).
///
/// # Invariants
/// - `keep.len()` equals the product of `shape`
///
/// ```
/// use nanoquant::pruning::PruningMask;
///
/// let mask = PruningMask::new(vec![true, false, true, false], &[2, 2]).expect("congruent");
/// assert_eq!(mask.num_pruned(), 2);
/// assert!((mask.sparsity() - 0.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruningMask {
    keep: Vec<bool>,
    shape: Vec<usize>,
}

impl PruningMask {
    /// Create a mask from explicit keep flags.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the flag count differs from the shape's element count.
    pub fn new(keep: Vec<bool>, shape: &[usize]) -> Result<Self, PruningError> {
        let numel: usize = shape.iter().product();
        if keep.len() != numel {
            return Err(PruningError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![keep.len()],
            });
        }
        Ok(Self {
            keep,
            shape: shape.to_vec(),
        })
    }

    /// All-keep mask.
    #[must_use]
    pub fn dense(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            keep: vec![true; numel],
            shape: shape.to_vec(),
        }
    }

    /// Read a 0/1 mask tensor; any nonzero entry counts as kept.
    #[must_use]
    pub fn from_tensor(mask: &Tensor) -> Self {
        Self {
            keep: mask.data().iter().map(|&v| v != 0.0).collect(),
            shape: mask.shape().to_vec(),
        }
    }

    /// Mask as a 0/1 tensor, the form layers store.
    #[must_use]
    pub fn to_tensor(&self) -> Tensor {
        let data = self.keep.iter().map(|&k| if k { 1.0 } else { 0.0 }).collect();
        Tensor::from_vec(data, &self.shape)
    }

    /// Shape of the masked tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Keep flags in row-major order.
    #[must_use]
    pub fn keep(&self) -> &[bool] {
        &self.keep
    }

    /// Whether entry `idx` (row-major) survives.
    #[must_use]
    pub fn is_kept(&self, idx: usize) -> bool {
        self.keep.get(idx).copied().unwrap_or(false)
    }

    /// Mark entry `idx` as pruned. Out-of-range indices are ignored.
    pub fn prune(&mut self, idx: usize) {
        if let Some(k) = self.keep.get_mut(idx) {
            *k = false;
        }
    }

    /// Number of masked elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.keep.len()
    }

    /// Number of pruned entries.
    #[must_use]
    pub fn num_pruned(&self) -> usize {
        self.keep.iter().filter(|&&k| !k).count()
    }

    /// Number of kept entries.
    #[must_use]
    pub fn num_kept(&self) -> usize {
        self.numel() - self.num_pruned()
    }

    /// Fraction of pruned entries (0.0 for an empty mask).
    #[must_use]
    pub fn sparsity(&self) -> f32 {
        if self.keep.is_empty() {
            0.0
        } else {
            self.num_pruned() as f32 / self.numel() as f32
        }
    }

    /// Zero the pruned entries of `weights` in place.
    ///
    /// Kept entries are not touched, so their bits are preserved exactly.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `weights` is not congruent with the mask.
    pub fn apply(&self, weights: &mut Tensor) -> Result<(), PruningError> {
        if weights.shape() != self.shape.as_slice() {
            return Err(PruningError::ShapeMismatch {
                expected: self.shape.clone(),
                got: weights.shape().to_vec(),
            });
        }
        for (w, &k) in weights.data_mut().iter_mut().zip(&self.keep) {
            if !k {
                *w = 0.0;
            }
        }
        Ok(())
    }

    /// Entry-wise AND: an entry survives only if both masks keep it.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the shapes differ.
    pub fn combine(&self, other: &PruningMask) -> Result<PruningMask, PruningError> {
        if self.shape != other.shape {
            return Err(PruningError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(Self {
            keep: self.keep.iter().zip(&other.keep).map(|(&a, &b)| a && b).collect(),
            shape: self.shape.clone(),
        })
    }
}
