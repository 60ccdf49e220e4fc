//! Generic fine-tuning and evaluation loop.
//!
//! Each optimizer step runs, in order:
//!
//! ```text
//! forward → cross-entropy → backward   (× accumulation_steps)
//! clip_grad_norm → optimizer.step → zero_grad → clear_graph
//! ```
//!
//! The scheduler, if any, is stepped once at the end of every epoch.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch::{Batch, BatchSource};
use super::config::TrainingConfig;
use super::device::Device;
use super::metrics::{accumulate_confusion, class_reports, ClassReport};
use super::model::Model;
use crate::autograd::{clear_graph, no_grad, Tensor};
use crate::error::{Result, TrainError};
use crate::nn::{clip_grad_norm, CrossEntropyLoss, LRScheduler, Optimizer};

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean per-batch loss, when a loss function was given and a batch seen.
    pub loss: Option<f32>,
    /// Fraction of correct predictions, 0 when nothing was evaluated.
    pub accuracy: f32,
    /// Number of examples evaluated.
    pub examples: usize,
    /// `confusion[true][predicted]`, square over the classes seen.
    pub confusion: Vec<Vec<usize>>,
    /// Mean wall-clock time of one forward call, in milliseconds.
    pub mean_latency_ms: f32,
}

impl EvalMetrics {
    /// Precision, recall and F1 per class.
    #[must_use]
    pub fn per_class(&self) -> Vec<ClassReport> {
        class_reports(&self.confusion)
    }
}

/// Per-epoch record of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Mean training loss of each epoch.
    pub train_loss: Vec<f32>,
    /// Validation metrics of each epoch, when a validation source was given.
    pub validation: Vec<EvalMetrics>,
}

impl TrainingHistory {
    /// Loss of the last epoch.
    #[must_use]
    pub fn final_train_loss(&self) -> Option<f32> {
        self.train_loss.last().copied()
    }

    /// Highest validation accuracy seen.
    #[must_use]
    pub fn best_accuracy(&self) -> Option<f32> {
        self.validation.iter().map(|m| m.accuracy).reduce(f32::max)
    }
}

/// Flatten logits to `[N, C]` and labels to `[N]`, checking every label is a
/// class index.
fn prepare_targets(logits: &Tensor, labels: &Tensor) -> std::result::Result<(Tensor, Tensor), TrainError> {
    let classes = logits.last_dim();
    if logits.ndim() == 0 || classes == 0 {
        return Err(TrainError::ShapeMismatch {
            expected: vec![labels.numel(), 1],
            actual: logits.shape().to_vec(),
        });
    }
    let rows = logits.numel() / classes;
    if labels.numel() != rows {
        return Err(TrainError::ShapeMismatch {
            expected: vec![rows],
            actual: labels.shape().to_vec(),
        });
    }
    if let Some(&bad) = labels
        .data()
        .iter()
        .find(|&&v| !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v as usize >= classes)
    {
        return Err(TrainError::InvalidLabel { value: bad, classes });
    }

    let logits = if logits.ndim() == 2 {
        logits.clone()
    } else {
        logits.flatten_leading()
    };
    let targets = Tensor::new(labels.data(), &[rows]);
    Ok((logits, targets))
}

/// Forward one batch and return `(logits [N, C], labels [N])`.
fn forward_batch(model: &dyn Model, batch: &Batch, label_field: &str) -> Result<(Tensor, Tensor)> {
    let labels = batch.label(label_field)?;
    let logits = model.forward(batch)?.into_logits()?;
    Ok(prepare_targets(&logits, labels)?)
}

fn optimizer_step(model: &mut dyn Model, optimizer: &mut dyn Optimizer, max_grad_norm: Option<f32>) {
    if let Some(max_norm) = max_grad_norm {
        let norm = clip_grad_norm(&model.module().parameters(), max_norm);
        debug!(grad_norm = norm, max_norm, "Clipped gradients");
    }
    optimizer.step_with_params(&mut model.module_mut().parameters_mut());
    optimizer.zero_grad();
    clear_graph();
}

/// Fine-tune `model` on `train_src`.
///
/// The optimizer is built from `config` over the model's parameters. The
/// per-step loss is divided by `accumulation_steps` before backward; a
/// trailing partial window at the end of an epoch still gets its step.
///
/// # Errors
///
/// - `Config` for an invalid `config`
/// - `Train::MissingField` for a batch without the label field, or an
///   output without logits
/// - `Train::ShapeMismatch` / `Train::InvalidLabel` for labels that do not
///   fit the logits
/// - any error the model's forward pass reports
pub fn train(
    model: &mut dyn Model,
    train_src: &mut dyn BatchSource,
    mut valid_src: Option<&mut dyn BatchSource>,
    config: &TrainingConfig,
    mut scheduler: Option<&mut dyn LRScheduler>,
) -> Result<TrainingHistory> {
    config.validate()?;
    let device = config.device()?;
    let criterion = CrossEntropyLoss::new();
    let mut optimizer = config.build_optimizer(&model.module().parameters());
    let accumulation = config.accumulation_steps;
    let micro_scale = 1.0 / accumulation as f32;

    info!(
        epochs = config.epochs,
        lr = config.lr,
        optimizer = ?config.optimizer,
        %device,
        "Starting training"
    );

    clear_graph();
    let mut history = TrainingHistory::default();

    for epoch in 0..config.epochs {
        model.train();
        let mut loss_sum = 0.0_f32;
        let mut steps = 0_usize;
        let mut pending = 0_usize;

        for batch in train_src.batches() {
            let (logits, targets) = forward_batch(&*model, &batch, &config.label_field)?;
            let loss = criterion.forward(&logits, &targets);
            loss_sum += loss.item();
            steps += 1;

            if accumulation > 1 {
                loss.mul_scalar(micro_scale).backward();
            } else {
                loss.backward();
            }
            pending += 1;

            if pending == accumulation {
                optimizer_step(model, optimizer.as_mut(), config.max_grad_norm);
                pending = 0;
            }
        }
        if pending > 0 {
            optimizer_step(model, optimizer.as_mut(), config.max_grad_norm);
        }

        let epoch_loss = if steps == 0 {
            warn!(epoch, "Training source yielded no batches");
            0.0
        } else {
            loss_sum / steps as f32
        };
        history.train_loss.push(epoch_loss);

        let validation = match valid_src.as_deref_mut() {
            Some(src) => {
                let metrics = evaluate_with_label(model, src, device, Some(&criterion), &config.label_field)?;
                history.validation.push(metrics.clone());
                Some(metrics)
            }
            None => None,
        };

        if let Some(sched) = scheduler.as_deref_mut() {
            sched.step(optimizer.as_mut());
        }

        info!(
            epoch,
            loss = epoch_loss,
            lr = optimizer.lr(),
            val_loss = ?validation.as_ref().and_then(|m| m.loss),
            val_accuracy = ?validation.as_ref().map(|m| m.accuracy),
            "Epoch complete"
        );
    }

    Ok(history)
}

/// Evaluate `model` on `src` under `no_grad`, reading labels from the
/// `"label"` field.
///
/// With a loss function the mean per-batch loss is reported too. The
/// confusion matrix and forward latency are always collected.
///
/// # Errors
///
/// Same batch-level failures as [`train`].
pub fn evaluate(
    model: &mut dyn Model,
    src: &mut dyn BatchSource,
    device: Device,
    loss: Option<&CrossEntropyLoss>,
) -> Result<EvalMetrics> {
    evaluate_with_label(model, src, device, loss, "label")
}

/// [`evaluate`] with an explicit label field.
///
/// # Errors
///
/// Same batch-level failures as [`train`].
pub fn evaluate_with_label(
    model: &mut dyn Model,
    src: &mut dyn BatchSource,
    device: Device,
    loss: Option<&CrossEntropyLoss>,
    label_field: &str,
) -> Result<EvalMetrics> {
    model.eval();
    let model: &dyn Model = model;

    let mut confusion = Vec::new();
    let (correct, examples, loss_sum, latency_ms, batches) = no_grad(|| -> Result<(usize, usize, f32, f32, usize)> {
        let (mut correct, mut examples, mut loss_sum, mut latency_ms, mut batches) = (0, 0, 0.0_f32, 0.0_f32, 0);
        for batch in src.batches() {
            let labels = batch.label(label_field)?;
            let start = Instant::now();
            let output = model.forward(&batch)?;
            latency_ms += start.elapsed().as_secs_f32() * 1000.0;

            let (logits, targets) = prepare_targets(&output.into_logits()?, labels)?;
            let predictions = logits.argmax_last_dim();
            correct += predictions
                .iter()
                .zip(targets.data())
                .filter(|&(&pred, &label)| pred == label as usize)
                .count();
            accumulate_confusion(&mut confusion, logits.last_dim(), &predictions, targets.data());
            examples += targets.numel();
            if let Some(criterion) = loss {
                loss_sum += criterion.forward(&logits, &targets).item();
            }
            batches += 1;
        }
        Ok((correct, examples, loss_sum, latency_ms, batches))
    })?;

    let accuracy = if examples == 0 {
        0.0
    } else {
        correct as f32 / examples as f32
    };
    let loss = match (loss, batches) {
        (Some(_), n) if n > 0 => Some(loss_sum / n as f32),
        _ => None,
    };

    let mean_latency_ms = if batches == 0 {
        0.0
    } else {
        latency_ms / batches as f32
    };

    debug!(%device, examples, accuracy, mean_latency_ms, "Evaluation complete");
    Ok(EvalMetrics {
        loss,
        accuracy,
        examples,
        confusion,
        mean_latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, Sequential, StepLR};
    use crate::training::{Classifier, ModelOutput};

    /// Two linearly separable clusters.
    fn separable(n: usize) -> Vec<Batch> {
        (0..n)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                let x = Tensor::new(&[sign * 2.0, sign, sign, sign * 2.0], &[2, 2]);
                let label = if sign > 0.0 { 0.0 } else { 1.0 };
                Batch::new().with("x", x).with("label", Tensor::from_slice(&[label, label]))
            })
            .collect()
    }

    fn classifier() -> Classifier<Sequential> {
        Classifier::new(Sequential::new().add_named("fc", Linear::with_seed(2, 2, Some(5))), "x")
    }

    /// Counts how often it is stepped.
    #[derive(Default)]
    struct CountingScheduler {
        steps: usize,
    }

    impl LRScheduler for CountingScheduler {
        fn step(&mut self, _optimizer: &mut dyn Optimizer) {
            self.steps += 1;
        }

        fn get_lr(&self) -> Option<f32> {
            None
        }

        fn epoch(&self) -> usize {
            self.steps
        }
    }

    struct Broken;

    impl Model for Broken {
        fn forward(&self, _inputs: &Batch) -> Result<ModelOutput> {
            Err(TrainError::model("backend unavailable").into())
        }

        fn module(&self) -> &dyn crate::nn::Module {
            unreachable!("never inspected")
        }

        fn module_mut(&mut self) -> &mut dyn crate::nn::Module {
            unreachable!("never inspected")
        }

        fn train(&mut self) {}

        fn eval(&mut self) {}
    }

    #[test]
    fn test_prepare_targets_flattens() {
        let logits = Tensor::zeros(&[2, 3, 4]);
        let labels = Tensor::new(&[0.0, 1.0, 2.0, 3.0, 0.0, 1.0], &[2, 3]);
        let (l, t) = prepare_targets(&logits, &labels).expect("prepare");
        assert_eq!(l.shape(), &[6, 4]);
        assert_eq!(t.shape(), &[6]);
    }

    #[test]
    fn test_prepare_targets_rejects_bad_labels() {
        let logits = Tensor::zeros(&[2, 3]);
        for bad in [3.0, -1.0, 0.5, f32::NAN] {
            let labels = Tensor::from_slice(&[0.0, bad]);
            assert!(prepare_targets(&logits, &labels).is_err(), "label {bad}");
        }
        let short = Tensor::from_slice(&[0.0]);
        assert!(matches!(
            prepare_targets(&logits, &short),
            Err(TrainError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_loss_decreases_and_scheduler_steps_per_epoch() {
        let mut model = classifier();
        let mut data = separable(8);
        let mut valid = separable(4);
        let mut scheduler = CountingScheduler::default();
        let config = TrainingConfig {
            epochs: 10,
            lr: 0.05,
            optimizer: crate::training::OptimizerKind::Adam,
            weight_decay: 0.0,
            ..Default::default()
        };

        let history = train(&mut model, &mut data, Some(&mut valid), &config, Some(&mut scheduler))
            .expect("train");

        assert_eq!(history.train_loss.len(), 10);
        assert_eq!(history.validation.len(), 10);
        assert_eq!(scheduler.steps, 10);
        assert!(history.final_train_loss().expect("epochs") < history.train_loss[0]);
        assert!(history.best_accuracy().expect("validated") > 0.9);
    }

    #[test]
    fn test_step_lr_updates_optimizer_rate() {
        let mut model = classifier();
        let mut data = separable(2);
        let mut scheduler = StepLR::new(1, 0.5);
        let config = TrainingConfig {
            epochs: 2,
            lr: 0.1,
            ..Default::default()
        };
        train(&mut model, &mut data, None, &config, Some(&mut scheduler)).expect("train");
        let lr = scheduler.get_lr().expect("stepped");
        assert!((lr - 0.025).abs() < 1e-6);
    }

    #[test]
    fn test_accumulation_and_clipping_run() {
        let mut model = classifier();
        let mut data = separable(5);
        let config = TrainingConfig {
            epochs: 2,
            lr: 0.01,
            accumulation_steps: 2,
            max_grad_norm: Some(1.0),
            optimizer: crate::training::OptimizerKind::Sgd,
            ..Default::default()
        };
        let history = train(&mut model, &mut data, None, &config, None).expect("train");
        assert!(history.train_loss.iter().all(|l| l.is_finite()));
        assert!(history.validation.is_empty());
    }

    #[test]
    fn test_empty_epoch_records_zero() {
        let mut model = classifier();
        let mut data: Vec<Batch> = Vec::new();
        let history = train(&mut model, &mut data, None, &TrainingConfig::default(), None).expect("train");
        assert_eq!(history.train_loss, vec![0.0]);
    }

    #[test]
    fn test_missing_label_aborts_train_and_eval() {
        let mut model = classifier();
        let mut data = vec![Batch::new().with("x", Tensor::ones(&[1, 2]))];

        let err = train(&mut model, &mut data, None, &TrainingConfig::default(), None).expect_err("no label");
        assert!(err.to_string().contains("label"));

        let err = evaluate(&mut model, &mut data, Device::Cpu, None).expect_err("no label");
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_model_errors_propagate() {
        let mut data = separable(1);
        let err = evaluate(&mut Broken, &mut data, Device::Cpu, None).expect_err("broken model");
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[test]
    fn test_evaluate_without_batches() {
        let mut model = classifier();
        let mut empty: Vec<Batch> = Vec::new();
        let metrics = evaluate(&mut model, &mut empty, Device::Cpu, Some(&CrossEntropyLoss::new())).expect("eval");
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.examples, 0);
        assert!(metrics.loss.is_none());
        assert!(metrics.confusion.is_empty());
        assert_eq!(metrics.mean_latency_ms, 0.0);
    }

    #[test]
    fn test_evaluate_counts_correct_predictions() {
        let weight = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
        let mut model = Classifier::new(Linear::from_weights(weight, None), "x");
        let batch = Batch::new()
            .with("x", Tensor::new(&[2.0, 0.0, 0.0, 2.0, 3.0, 1.0, 1.0, 0.0], &[4, 2]))
            .with("label", Tensor::from_slice(&[0.0, 1.0, 1.0, 0.0]));
        let mut src = vec![batch];

        let metrics = evaluate(&mut model, &mut src, Device::Cpu, None).expect("eval");
        assert_eq!(metrics.examples, 4);
        assert!((metrics.accuracy - 0.75).abs() < 1e-6);
        assert!(metrics.loss.is_none());
        // predictions [0, 1, 0, 0] against labels [0, 1, 1, 0]
        assert_eq!(metrics.confusion, vec![vec![2, 0], vec![1, 1]]);
        assert!(metrics.mean_latency_ms >= 0.0 && metrics.mean_latency_ms.is_finite());

        let per_class = metrics.per_class();
        assert_eq!(per_class.len(), 2);
        assert_eq!(per_class[0].support, 2);
        assert!((per_class[0].precision - 2.0 / 3.0).abs() < 1e-6);
        assert!((per_class[1].recall - 0.5).abs() < 1e-6);
        assert!((per_class[1].precision - 1.0).abs() < 1e-6);

        let with_loss = evaluate(&mut model, &mut src, Device::Cpu, Some(&CrossEntropyLoss::new())).expect("eval");
        assert!(with_loss.loss.expect("loss") > 0.0);
    }
}
