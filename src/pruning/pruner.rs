//! Unstructured pruning of weighted layers.
//!
//! A pass attaches a [`PruningMask`] to each targeted layer; [`finalize`]
//! then folds the mask into the stored weight. Only nonzero entries of the
//! effective weight (`weight ⊙ mask`) are candidates, so repeated passes
//! never spend their budget on entries that are already zero.
//!
//! # References
//! - Han, S., et al. (2015). Learning both weights and connections. `NeurIPS`.

use std::collections::BTreeMap;

use rand::seq::index;
use rand::Rng;
use tracing::{debug, info, warn};

use super::config::{PruningConfig, PruningMethod, PruningScope, RepruningPolicy};
use super::error::PruningError;
use super::mask::PruningMask;
use crate::error::Result;
use crate::nn::{named_weighted_layers_mut, rng_from_seed, Module, WeightedLayer};

/// Result of a model-wide pruning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningResult {
    /// Fraction of zero entries across all targeted weights after the pass.
    pub achieved_sparsity: f32,
    /// Zero entries across all targeted weights after the pass.
    pub parameters_pruned: usize,
    /// Entries this pass removed.
    pub newly_pruned: usize,
    /// Entries across all targeted weights.
    pub total_parameters: usize,
    /// Zero fraction per targeted layer, keyed by dotted name.
    pub layer_sparsity: BTreeMap<String, f32>,
    /// Estimated memory savings in bytes (assumes FP32).
    pub memory_savings_bytes: usize,
}

impl PruningResult {
    /// Create a result from totals.
    #[must_use]
    pub fn new(parameters_pruned: usize, total_parameters: usize) -> Self {
        let achieved_sparsity = if total_parameters == 0 {
            0.0
        } else {
            parameters_pruned as f32 / total_parameters as f32
        };
        Self {
            achieved_sparsity,
            parameters_pruned,
            newly_pruned: 0,
            total_parameters,
            layer_sparsity: BTreeMap::new(),
            memory_savings_bytes: parameters_pruned * 4,
        }
    }

    /// Add layer sparsity information.
    #[must_use]
    pub fn with_layer_sparsity(mut self, layer_name: String, sparsity: f32) -> Self {
        self.layer_sparsity.insert(layer_name, sparsity);
        self
    }

    /// Get compression ratio (original / pruned size).
    #[must_use]
    pub fn compression_ratio(&self) -> f32 {
        if self.total_parameters == 0 {
            return 1.0;
        }
        if self.achieved_sparsity >= 1.0 {
            return f32::INFINITY;
        }
        1.0 / (1.0 - self.achieved_sparsity)
    }
}

impl Default for PruningResult {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// What [`finalize`] did to a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The mask was folded into the weight and removed.
    Finalized,
    /// There was no mask to fold.
    AlreadyClean,
    /// The mask could not be folded; the layer is unchanged.
    Failed(String),
}

/// Number of entries removed when pruning `amount` of `population`.
///
/// This is `floor(amount · population)`, evaluated so that amounts such as
/// `0.7` that are not exact in `f32` still give the decimal answer.
///
/// ```
/// use nanoquant::pruning::prune_count;
///
/// assert_eq!(prune_count(0.7, 10), 7);
/// assert_eq!(prune_count(0.3, 5), 1);
/// assert_eq!(prune_count(1.0, 9), 9);
/// ```
#[must_use]
pub fn prune_count(amount: f32, population: usize) -> usize {
    let exact = f64::from(amount) * population as f64;
    let count = (exact + exact.abs() * 1e-6).floor();
    (count.max(0.0) as usize).min(population)
}

/// Effective-weight view of one layer before pruning.
struct LayerPlan {
    existing: PruningMask,
    magnitudes: Vec<f32>,
    /// Indices of nonzero effective entries.
    candidates: Vec<usize>,
    zeros: usize,
}

impl LayerPlan {
    fn of(layer: &dyn WeightedLayer) -> std::result::Result<Self, PruningError> {
        let existing = match layer.weight_mask() {
            Some(mask) => PruningMask::from_tensor(mask),
            None => PruningMask::dense(layer.weight().shape()),
        };
        if existing.shape() != layer.weight().shape() {
            return Err(PruningError::ShapeMismatch {
                expected: layer.weight().shape().to_vec(),
                got: existing.shape().to_vec(),
            });
        }

        let magnitudes: Vec<f32> = layer.effective_weight().data().iter().map(|w| w.abs()).collect();
        let candidates: Vec<usize> = (0..magnitudes.len()).filter(|&i| magnitudes[i] != 0.0).collect();
        let zeros = magnitudes.len() - candidates.len();
        Ok(Self {
            existing,
            magnitudes,
            candidates,
            zeros,
        })
    }

    fn numel(&self) -> usize {
        self.magnitudes.len()
    }

    fn target_count(&self, amount: f32, policy: RepruningPolicy) -> usize {
        match policy {
            RepruningPolicy::Additive => prune_count(amount, self.candidates.len()),
            RepruningPolicy::Absolute => prune_count(amount, self.numel()).saturating_sub(self.zeros),
        }
    }
}

/// Choose `count` of `magnitudes.len()` candidates; returns their positions.
///
/// L1 ranking is a stable sort by magnitude, so ties go to the lower index.
fn select<R: Rng + ?Sized>(magnitudes: &[f32], count: usize, method: PruningMethod, rng: &mut R) -> Vec<usize> {
    let count = count.min(magnitudes.len());
    match method {
        PruningMethod::L1Unstructured => {
            let mut order: Vec<usize> = (0..magnitudes.len()).collect();
            order.sort_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]));
            order.truncate(count);
            order
        }
        PruningMethod::RandomUnstructured => index::sample(rng, magnitudes.len(), count).into_vec(),
    }
}

fn attach(layer: &mut dyn WeightedLayer, mask: &PruningMask) -> std::result::Result<(), PruningError> {
    layer
        .set_weight_mask(Some(mask.to_tensor()))
        .map_err(|_| PruningError::ShapeMismatch {
            expected: layer.weight().shape().to_vec(),
            got: mask.shape().to_vec(),
        })
}

/// Prune one layer and attach the resulting mask.
///
/// The new mask is combined with any mask already attached, and is returned.
/// `amount = 0` attaches an all-keep mask and leaves the effective weight
/// unchanged.
///
/// # Errors
///
/// - `InvalidSparsity` if `amount` is outside `[0, 1]`
/// - `ShapeMismatch` if an attached mask does not fit the weight
pub fn prune_layer<R: Rng + ?Sized>(
    layer: &mut dyn WeightedLayer,
    amount: f32,
    method: PruningMethod,
    policy: RepruningPolicy,
    rng: &mut R,
) -> std::result::Result<PruningMask, PruningError> {
    let amount = PruningError::check_amount(amount)?;
    let plan = LayerPlan::of(layer)?;

    let count = plan.target_count(amount, policy);
    let magnitudes: Vec<f32> = plan.candidates.iter().map(|&i| plan.magnitudes[i]).collect();

    let mut selected = PruningMask::dense(plan.existing.shape());
    for pos in select(&magnitudes, count, method, rng) {
        selected.prune(plan.candidates[pos]);
    }
    let mask = plan.existing.combine(&selected)?;
    attach(layer, &mask)?;

    debug!(pruned = count, total = plan.numel(), method = %method, "Attached pruning mask");
    Ok(mask)
}

/// Prune `amount` of a module's weight with a fresh entropy-seeded RNG.
///
/// # Errors
///
/// - `MissingWeight` if `module` exposes no weight
/// - any error from [`prune_layer`]
pub fn apply_sparse_pruning(
    module: &mut dyn Module,
    amount: f32,
    method: PruningMethod,
) -> std::result::Result<PruningMask, PruningError> {
    let layer = module.as_weighted_mut().ok_or_else(|| PruningError::MissingWeight {
        module: "<root>".to_string(),
    })?;
    let mut rng = rng_from_seed(None);
    prune_layer(layer, amount, method, RepruningPolicy::Additive, &mut rng)
}

/// Fold an attached mask into the weight and drop it.
///
/// Never panics or errors: failures are reported as
/// [`FinalizeOutcome::Failed`] for the caller to log.
pub fn finalize(layer: &mut dyn WeightedLayer) -> FinalizeOutcome {
    let Some(mask) = layer.weight_mask() else {
        return FinalizeOutcome::AlreadyClean;
    };
    let mask = PruningMask::from_tensor(mask);

    let mut weight = layer.weight().detach();
    if let Err(e) = mask.apply(&mut weight) {
        return FinalizeOutcome::Failed(e.to_string());
    }
    if let Err(e) = layer.set_weight(&weight) {
        return FinalizeOutcome::Failed(e.to_string());
    }
    match layer.set_weight_mask(None) {
        Ok(()) => FinalizeOutcome::Finalized,
        Err(e) => FinalizeOutcome::Failed(e.to_string()),
    }
}

/// Prune every weighted layer of `model` whose dotted name contains one of
/// `targets`, then finalize each.
///
/// Modules without a weight are never visited. With
/// [`PruningScope::Global`] the candidates of all targeted layers are ranked
/// together against a single budget.
///
/// # Errors
///
/// - `Config` for an invalid `config`
/// - `Pruning::NoTargets` if `targets` is empty
/// - `Pruning::ShapeMismatch` if an attached mask does not fit its weight
pub fn prune_model(model: &mut dyn Module, targets: &[String], config: &PruningConfig) -> Result<PruningResult> {
    config.validate()?;
    if targets.is_empty() {
        return Err(PruningError::NoTargets.into());
    }

    let mut layers: Vec<(String, &mut dyn WeightedLayer)> = named_weighted_layers_mut(model)
        .into_iter()
        .filter(|(name, _)| targets.iter().any(|t| name.contains(t.as_str())))
        .collect();
    if layers.is_empty() {
        warn!(?targets, "No layer matched the pruning targets");
        return Ok(PruningResult::default());
    }

    let mut rng = rng_from_seed(config.seed);
    let zeros_before: usize = layers
        .iter()
        .map(|(_, layer)| count_zeros(&**layer))
        .sum();

    match config.scope {
        PruningScope::PerModule => {
            for (name, layer) in &mut layers {
                let mask = prune_layer(&mut **layer, config.amount, config.method, config.policy, &mut rng)?;
                debug!(layer = %name, sparsity = mask.sparsity(), "Pruned layer");
            }
        }
        PruningScope::Global => prune_global(&mut layers, config, &mut rng)?,
    }

    let mut layer_sparsity = BTreeMap::new();
    let mut zeros_after = 0;
    let mut total = 0;
    for (name, layer) in &mut layers {
        match finalize(&mut **layer) {
            FinalizeOutcome::Finalized => debug!(layer = %name, "Finalized pruning mask"),
            FinalizeOutcome::AlreadyClean => debug!(layer = %name, "No pruning mask to finalize"),
            FinalizeOutcome::Failed(reason) => {
                warn!(layer = %name, %reason, "Failed to finalize pruning mask");
            }
        }
        let zeros = count_zeros(&**layer);
        let numel = layer.weight().numel();
        let sparsity = if numel == 0 { 0.0 } else { zeros as f32 / numel as f32 };
        layer_sparsity.insert(name.clone(), sparsity);
        zeros_after += zeros;
        total += numel;
    }

    let mut result = PruningResult::new(zeros_after, total);
    result.layer_sparsity = layer_sparsity;
    result.newly_pruned = zeros_after.saturating_sub(zeros_before);

    info!(
        layers = layers.len(),
        sparsity = result.achieved_sparsity,
        pruned = result.newly_pruned,
        method = %config.method,
        "Pruned model"
    );
    Ok(result)
}

fn count_zeros(layer: &dyn WeightedLayer) -> usize {
    layer.effective_weight().data().iter().filter(|&&w| w == 0.0).count()
}

/// Rank the candidates of every layer together and prune against one budget.
fn prune_global<R: Rng + ?Sized>(
    layers: &mut [(String, &mut dyn WeightedLayer)],
    config: &PruningConfig,
    rng: &mut R,
) -> std::result::Result<(), PruningError> {
    let plans = layers
        .iter()
        .map(|(_, layer)| LayerPlan::of(&**layer))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // (layer, entry) for every pooled candidate, in layer order.
    let pool: Vec<(usize, usize)> = plans
        .iter()
        .enumerate()
        .flat_map(|(l, plan)| plan.candidates.iter().map(move |&i| (l, i)))
        .collect();
    let magnitudes: Vec<f32> = pool.iter().map(|&(l, i)| plans[l].magnitudes[i]).collect();

    let count = match config.policy {
        RepruningPolicy::Additive => prune_count(config.amount, pool.len()),
        RepruningPolicy::Absolute => {
            let numel: usize = plans.iter().map(LayerPlan::numel).sum();
            let zeros: usize = plans.iter().map(|p| p.zeros).sum();
            prune_count(config.amount, numel).saturating_sub(zeros)
        }
    };

    let mut selected: Vec<PruningMask> = plans.iter().map(|p| PruningMask::dense(p.existing.shape())).collect();
    for pos in select(&magnitudes, count, config.method, rng) {
        let (l, i) = pool[pos];
        selected[l].prune(i);
    }

    for (((name, layer), plan), new) in layers.iter_mut().zip(&plans).zip(&selected) {
        let mask = plan.existing.combine(new)?;
        attach(&mut **layer, &mask)?;
        debug!(layer = %name, sparsity = mask.sparsity(), "Attached global pruning mask");
    }
    debug!(pruned = count, pool = pool.len(), "Global pruning threshold applied");
    Ok(())
}
