//! Learning rate schedulers.
//!
//! A scheduler is stepped once per epoch and writes the new rate into the
//! optimizer. The base rate is whatever the optimizer holds at the first
//! step.
//!
//! # References
//!
//! - Loshchilov, I., & Hutter, F. (2017). SGDR: Stochastic gradient descent
//!   with warm restarts. ICLR.

use super::optim::Optimizer;

/// Common interface for learning-rate schedules.
pub trait LRScheduler {
    /// Advance one epoch and update the optimizer's learning rate.
    fn step(&mut self, optimizer: &mut dyn Optimizer);

    /// Learning rate set by the most recent step, if any.
    fn get_lr(&self) -> Option<f32>;

    /// Number of steps taken.
    fn epoch(&self) -> usize;
}

/// Base rate and epoch counter shared by every schedule.
#[derive(Debug, Clone, Default)]
struct ScheduleState {
    base_lr: Option<f32>,
    last_lr: Option<f32>,
    epoch: usize,
}

impl ScheduleState {
    /// Count one epoch and return `(base_lr, epoch)`.
    fn advance(&mut self, optimizer: &dyn Optimizer) -> (f32, usize) {
        let base = *self.base_lr.get_or_insert_with(|| optimizer.lr());
        self.epoch += 1;
        (base, self.epoch)
    }

    fn apply(&mut self, optimizer: &mut dyn Optimizer, lr: f32) {
        optimizer.set_lr(lr);
        self.last_lr = Some(lr);
    }
}

/// Decays the rate by `gamma` every `step_size` epochs.
///
/// `lr = base * gamma^(epoch / step_size)`
#[derive(Debug, Clone)]
pub struct StepLR {
    step_size: usize,
    gamma: f32,
    state: ScheduleState,
}

impl StepLR {
    /// Create a step schedule. A `step_size` of 0 is treated as 1.
    #[must_use]
    pub fn new(step_size: usize, gamma: f32) -> Self {
        Self {
            step_size: step_size.max(1),
            gamma,
            state: ScheduleState::default(),
        }
    }
}

impl LRScheduler for StepLR {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        let (base, epoch) = self.state.advance(optimizer);
        let lr = base * self.gamma.powi((epoch / self.step_size) as i32);
        self.state.apply(optimizer, lr);
    }

    fn get_lr(&self) -> Option<f32> {
        self.state.last_lr
    }

    fn epoch(&self) -> usize {
        self.state.epoch
    }
}

/// Decays the rate by `gamma` every epoch.
#[derive(Debug, Clone)]
pub struct ExponentialLR {
    gamma: f32,
    state: ScheduleState,
}

impl ExponentialLR {
    /// Create an exponential schedule.
    #[must_use]
    pub fn new(gamma: f32) -> Self {
        Self {
            gamma,
            state: ScheduleState::default(),
        }
    }
}

impl LRScheduler for ExponentialLR {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        let (base, epoch) = self.state.advance(optimizer);
        let lr = base * self.gamma.powi(epoch as i32);
        self.state.apply(optimizer, lr);
    }

    fn get_lr(&self) -> Option<f32> {
        self.state.last_lr
    }

    fn epoch(&self) -> usize {
        self.state.epoch
    }
}

/// Cosine annealing from the base rate down to `eta_min` over `t_max` epochs.
///
/// ```text
/// lr = eta_min + (base - eta_min) * (1 + cos(π * epoch / t_max)) / 2
/// ```
///
/// The rate stays at `eta_min` once `epoch >= t_max`.
#[derive(Debug, Clone)]
pub struct CosineAnnealingLR {
    t_max: usize,
    eta_min: f32,
    state: ScheduleState,
}

impl CosineAnnealingLR {
    /// Anneal to zero over `t_max` epochs.
    #[must_use]
    pub fn new(t_max: usize) -> Self {
        Self::with_min_lr(t_max, 0.0)
    }

    /// Anneal to `eta_min` over `t_max` epochs.
    #[must_use]
    pub fn with_min_lr(t_max: usize, eta_min: f32) -> Self {
        Self {
            t_max: t_max.max(1),
            eta_min,
            state: ScheduleState::default(),
        }
    }
}

impl LRScheduler for CosineAnnealingLR {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        let (base, epoch) = self.state.advance(optimizer);
        let progress = epoch.min(self.t_max) as f32 / self.t_max as f32;
        let cosine = (1.0 + (std::f32::consts::PI * progress).cos()) / 2.0;
        let lr = self.eta_min + (base - self.eta_min) * cosine;
        self.state.apply(optimizer, lr);
    }

    fn get_lr(&self) -> Option<f32> {
        self.state.last_lr
    }

    fn epoch(&self) -> usize {
        self.state.epoch
    }
}
