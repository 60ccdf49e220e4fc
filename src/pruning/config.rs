//! Pruning method selection and configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::PruningError;
use crate::error::ConfigError;

/// How entries are chosen for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningMethod {
    /// Remove the entries with the smallest absolute value.
    #[default]
    L1Unstructured,
    /// Remove uniformly random entries.
    RandomUnstructured,
}

impl PruningMethod {
    /// Canonical method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PruningMethod::L1Unstructured => "l1_unstructured",
            PruningMethod::RandomUnstructured => "random_unstructured",
        }
    }
}

impl fmt::Display for PruningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruningMethod {
    type Err = PruningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1_unstructured" => Ok(PruningMethod::L1Unstructured),
            "random_unstructured" => Ok(PruningMethod::RandomUnstructured),
            other => Err(PruningError::UnsupportedMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Whether the pruning threshold is computed per layer or across all targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningScope {
    /// Each targeted layer loses `amount` of its own candidates.
    #[default]
    PerModule,
    /// Candidates of all targeted layers are ranked together.
    Global,
}

/// How `amount` is interpreted when a tensor already contains zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepruningPolicy {
    /// Prune `amount` of the entries that are still nonzero.
    #[default]
    Additive,
    /// Bring total zeros up to `amount` of all entries.
    Absolute,
}

/// Model-wide pruning settings.
///
/// ```
/// use nanoquant::pruning::{PruningConfig, PruningMethod};
///
/// let config: PruningConfig =
///     serde_json::from_str(r#"{"amount": 0.5, "method": "random_unstructured"}"#).expect("json");
/// assert_eq!(config.method, PruningMethod::RandomUnstructured);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    /// Fraction to prune, in `[0, 1]`.
    pub amount: f32,
    /// Selection rule.
    pub method: PruningMethod,
    /// Per-layer or pooled threshold.
    pub scope: PruningScope,
    /// Treatment of existing zeros.
    pub policy: RepruningPolicy,
    /// Seed for the random method; OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            amount: 0.3,
            method: PruningMethod::default(),
            scope: PruningScope::default(),
            policy: RepruningPolicy::default(),
            seed: None,
        }
    }
}

impl PruningConfig {
    /// Check the pruning amount.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for an amount outside `[0, 1]` or not finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        PruningError::check_amount(self.amount)
            .map(|_| ())
            .map_err(|e| ConfigError::invalid_value("amount", e.to_string()))
    }
}
