//! Per-layer scale calibration under a KL-divergence objective.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fake_quant::{fake_quantize, init_scale, QuantGrid, SCALE_EPSILON};
use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::error::{ConfigError, QuantizationError, Result};
use crate::nn::{join_name, Adam, KLDivLoss, Module, Optimizer, WeightedLayer};

/// Offset added to the quantized distribution before the KL term.
const DIST_EPSILON: f32 = 1e-8;

/// Calibration hyperparameters.
///
/// ```
/// use nanoquant::quantization::CalibrationConfig;
///
/// let config = CalibrationConfig::default();
/// assert_eq!((config.levels, config.epochs), (256, 5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Number of quantization levels (8-bit grid by default).
    pub levels: u32,
    /// Adam learning rate for the scale.
    pub lr: f32,
    /// Fixed number of optimization epochs.
    pub epochs: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            levels: 256,
            lr: 1e-3,
            epochs: 5,
        }
    }
}

impl CalibrationConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// `InvalidValue` naming the first offending field.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.levels < 2 {
            return Err(ConfigError::invalid_value(
                "levels",
                format!("need at least 2 quantization levels, got {}", self.levels),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(ConfigError::invalid_value(
                "lr",
                format!("must be a positive finite number, got {}", self.lr),
            ));
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid_value("epochs", "must be at least 1"));
        }
        Ok(())
    }

    fn grid(&self) -> std::result::Result<QuantGrid, QuantizationError> {
        QuantGrid::new(self.levels)
    }
}

/// Outcome of calibrating one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Hierarchical layer name (`""` for a layer calibrated on its own).
    pub layer: String,
    /// Final learned scale, already baked into the weight.
    pub scale: f32,
    /// Scale before the first optimizer step.
    pub initial_scale: f32,
    /// KL loss per epoch, measured before that epoch's update.
    pub losses: Vec<f32>,
    /// Scale after each epoch's update.
    pub scales: Vec<f32>,
}

impl CalibrationReport {
    /// Loss of the last epoch.
    #[must_use]
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }

    /// Loss of the first epoch.
    #[must_use]
    pub fn initial_loss(&self) -> Option<f32> {
        self.losses.first().copied()
    }
}

/// Learn a quantization scale for `layer` on `input`, then overwrite the
/// layer's weight with its quantized version.
///
/// The layer's bias is held fixed. If a pruning mask is attached, the masked
/// weight is what gets quantized.
///
/// # Errors
///
/// - `Config` for an invalid `config`
/// - `Quantization::MissingWeight` if `layer` exposes no weight
/// - `Quantization::ShapeMismatch` if `input`'s last dimension does not match
///   the layer's input width
/// - `Quantization::NonFiniteLoss` if the objective diverges
pub fn calibrate_layer(
    layer: &mut dyn Module,
    input: &Tensor,
    config: &CalibrationConfig,
) -> Result<CalibrationReport> {
    config.validate()?;
    let weighted = layer
        .as_weighted_mut()
        .ok_or_else(|| QuantizationError::MissingWeight {
            layer: "<root>".to_string(),
        })?;
    calibrate_weighted("", weighted, input, config)
}

/// Calibrate every weighted layer of `model` whose dotted name contains one
/// of `targets`.
///
/// Children are visited in order; each receives the full-precision output of
/// the previous one, so later layers are calibrated against the activations
/// the unquantized model would produce. Layers that match no target are
/// passed through unchanged, as are weightless modules inside a matched
/// container.
///
/// # Errors
///
/// - `Config` if `config` is invalid or `targets` is empty
/// - `Quantization::MissingWeight` when a matched module has no weight
/// - any error from [`calibrate_layer`] on a matched layer
pub fn calibrate_model(
    model: &mut dyn Module,
    input: &Tensor,
    targets: &[String],
    config: &CalibrationConfig,
) -> Result<Vec<(String, CalibrationReport)>> {
    config.validate()?;
    if targets.is_empty() {
        return Err(ConfigError::invalid_value("targets", "at least one target name is required").into());
    }

    let mut reports = Vec::new();
    calibrate_subtree("", model, input, targets, config, false, &mut reports)?;

    if reports.is_empty() {
        warn!(?targets, "No layer matched the calibration targets");
    } else {
        info!(layers = reports.len(), "Calibrated model");
    }
    Ok(reports)
}

fn is_target(name: &str, targets: &[String]) -> bool {
    !name.is_empty() && targets.iter().any(|t| name.contains(t.as_str()))
}

/// Returns the subtree's full-precision output.
///
/// `inherited` is set below a container that itself matched a target; a
/// weightless leaf is only an error when it is addressed directly.
fn calibrate_subtree(
    name: &str,
    module: &mut dyn Module,
    input: &Tensor,
    targets: &[String],
    config: &CalibrationConfig,
    inherited: bool,
    reports: &mut Vec<(String, CalibrationReport)>,
) -> Result<Tensor> {
    if module.as_weighted().is_some() {
        let output = no_grad(|| module.forward(input));
        if is_target(name, targets) {
            if let Some(layer) = module.as_weighted_mut() {
                let report = calibrate_weighted(name, layer, input, config)?;
                reports.push((name.to_string(), report));
            }
        }
        return Ok(output);
    }

    let matched = is_target(name, targets);
    if module.named_children().is_empty() {
        if matched && !inherited {
            return Err(QuantizationError::MissingWeight {
                layer: name.to_string(),
            }
            .into());
        }
        return Ok(no_grad(|| module.forward(input)));
    }

    let mut current = input.clone();
    for (child_name, child) in module.named_children_mut() {
        let path = join_name(name, &child_name);
        current = calibrate_subtree(&path, child, &current, targets, config, inherited || matched, reports)?;
    }
    Ok(current)
}

fn calibrate_weighted(
    name: &str,
    layer: &mut dyn WeightedLayer,
    input: &Tensor,
    config: &CalibrationConfig,
) -> Result<CalibrationReport> {
    let grid = config.grid()?;
    if input.last_dim() != layer.in_features() {
        return Err(QuantizationError::ShapeMismatch {
            layer: name.to_string(),
            expected: layer.in_features(),
            actual: input.last_dim(),
        }
        .into());
    }

    let weight = layer.effective_weight();
    let initial_scale = init_scale(&weight, grid);
    let mut scale = Tensor::scalar(initial_scale).requires_grad();
    let mut optimizer = Adam::new(&[&scale], config.lr);
    let criterion = KLDivLoss::new();

    let full_dist = no_grad(|| layer.forward_with_weight(input, &weight).log_softmax());
    debug!(layer = name, scale = initial_scale, levels = grid.levels(), "Starting calibration");

    let mut losses = Vec::with_capacity(config.epochs);
    let mut scales = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        clear_graph();

        let quantized_weight = fake_quantize(&weight, &scale, grid);
        let quantized_dist = layer
            .forward_with_weight(input, &quantized_weight)
            .softmax()
            .add_scalar(DIST_EPSILON);
        let loss = criterion.forward(&full_dist, &quantized_dist);
        let loss_value = loss.item();
        if !loss_value.is_finite() {
            clear_graph();
            return Err(QuantizationError::NonFiniteLoss {
                layer: name.to_string(),
                epoch,
            }
            .into());
        }

        loss.backward();
        optimizer.step_with_params(&mut [&mut scale]);
        optimizer.zero_grad();

        let s = &mut scale.data_mut()[0];
        if s.is_nan() || *s < SCALE_EPSILON {
            *s = SCALE_EPSILON;
        }

        losses.push(loss_value);
        scales.push(scale.item());
        info!(layer = name, epoch, loss = loss_value, scale = scale.item(), "Calibration epoch");
    }

    let final_scale = scale.item();
    let baked = no_grad(|| fake_quantize(&weight, &scale, grid));
    clear_graph();
    layer.set_weight(&baked)?;

    Ok(CalibrationReport {
        layer: name.to_string(),
        scale: final_scale,
        initial_scale,
        losses,
        scales,
    })
}
