//! Unstructured sparsity pruning.
//!
//! Layers are pruned by attaching a keep-mask (L1 magnitude or random
//! selection), either per layer or against a single global budget, and the
//! mask is then folded into the weight by [`finalize`].
//!
//! # Example
//!
//! ```
//! use nanoquant::nn::{Linear, Sequential, WeightedLayer, Module};
//! use nanoquant::pruning::{prune_model, PruningConfig};
//!
//! let mut model = Sequential::new()
//!     .add_named("fc1", Linear::with_seed(10, 10, Some(0)))
//!     .add_named("fc2", Linear::with_seed(10, 2, Some(1)));
//!
//! let config = PruningConfig { amount: 0.5, ..Default::default() };
//! let result = prune_model(&mut model, &["fc1".to_string()], &config).expect("prune");
//!
//! assert!((result.layer_sparsity["fc1"] - 0.5).abs() < 1e-6);
//! ```
//!
//! # References
//! - Han, S., et al. (2015). Learning both weights and connections. NeurIPS.
//! - Frankle, J., & Carbin, M. (2018). The Lottery Ticket Hypothesis. arXiv:1803.03635.

mod config;
mod error;
mod mask;
mod pruner;

pub use config::{PruningConfig, PruningMethod, PruningScope, RepruningPolicy};
pub use error::PruningError;
pub use mask::PruningMask;
pub use pruner::{
    apply_sparse_pruning, finalize, prune_count, prune_layer, prune_model, FinalizeOutcome,
    PruningResult,
};
