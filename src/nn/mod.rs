//! Neural network building blocks.
//!
//! Organized around the [`Module`] trait:
//!
//! - **Layers**: [`Linear`]
//! - **Activations**: [`ReLU`]
//! - **Containers**: [`Sequential`]
//! - **Losses**: [`CrossEntropyLoss`], [`KLDivLoss`]
//! - **Optimizers**: [`SGD`], [`Adam`], [`AdamW`]
//! - **Schedulers**: [`StepLR`], [`ExponentialLR`], [`CosineAnnealingLR`]
//!
//! Compression operators address layers through [`WeightedLayer`] and the
//! dotted names produced by [`named_weighted_layers_mut`].
//!
//! # References
//!
//! - Paszke, A., et al. (2019). `PyTorch`: An imperative style, high-performance
//!   deep learning library. `NeurIPS`.

mod activation;
mod clip;
mod container;
pub mod functional;
mod init;
mod linear;
pub mod loss;
mod module;
pub mod optim;
pub mod scheduler;

pub use activation::ReLU;
pub use clip::clip_grad_norm;
pub use container::Sequential;
pub use functional as F;
pub use init::xavier_uniform;
pub(crate) use init::rng_from_seed;
pub use linear::Linear;
pub use loss::{CrossEntropyLoss, KLDivLoss, Reduction};
pub(crate) use module::join_name;
pub use module::{module_names, named_weighted_layers_mut, Module, WeightedLayer};
pub use optim::{Adam, AdamW, Optimizer, SGD};
pub use scheduler::{CosineAnnealingLR, ExponentialLR, LRScheduler, StepLR};
