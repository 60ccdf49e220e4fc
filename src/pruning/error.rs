//! Pruning-specific error types.

use std::fmt;

/// Pruning operation errors with detailed context.
///
/// Each variant names the offending value so a failed run can be diagnosed
/// from the message alone.
#[derive(Debug, Clone, PartialEq)]
pub enum PruningError {
    /// Pruning method name not recognised.
    ///
    /// Only `l1_unstructured` and `random_unstructured` are supported.
    UnsupportedMethod {
        /// Method name as given
        method: String,
    },

    /// Invalid sparsity target.
    ///
    /// Sparsity must be a finite value in range [0.0, 1.0].
    InvalidSparsity {
        /// Provided value
        value: f32,
        /// Constraint description
        constraint: String,
    },

    /// Module exposes no weight tensor to prune.
    MissingWeight {
        /// Module identifier or description
        module: String,
    },

    /// Tensor shape mismatch.
    ///
    /// Occurs when mask and weight tensor shapes don't align.
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape found
        got: Vec<usize>,
    },

    /// Model-wide pruning was asked to run with no target names.
    NoTargets,
}

impl fmt::Display for PruningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PruningError::UnsupportedMethod { method } => {
                write!(
                    f,
                    "Unsupported pruning method '{method}': expected 'l1_unstructured' or 'random_unstructured'"
                )
            }
            PruningError::InvalidSparsity { value, constraint } => {
                write!(f, "Invalid sparsity value {value}: {constraint}")
            }
            PruningError::MissingWeight { module } => {
                write!(f, "Module '{module}' has no weight to prune")
            }
            PruningError::ShapeMismatch { expected, got } => {
                write!(f, "Shape mismatch: expected {expected:?}, got {got:?}")
            }
            PruningError::NoTargets => {
                write!(f, "No pruning targets given")
            }
        }
    }
}

impl std::error::Error for PruningError {}

impl PruningError {
    /// Validate a pruning amount, returning it unchanged when usable.
    pub(crate) fn check_amount(amount: f32) -> Result<f32, PruningError> {
        if amount.is_finite() && (0.0..=1.0).contains(&amount) {
            Ok(amount)
        } else {
            Err(PruningError::InvalidSparsity {
                value: amount,
                constraint: "must be between 0.0 and 1.0".to_string(),
            })
        }
    }
}
