//! Protection run configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! The policy defaults reproduce the per-column routing constants the
//! engine has always used.

use crate::error::{PrivacyError, Result};
use serde::{Deserialize, Serialize};

/// Explicit (epsilon, delta) totals that replace the level defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetOverride {
    pub epsilon: f64,
    pub delta: f64,
}

/// How `dataUtility` is computed in reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum UtilityMetric {
    /// Per-column distance between original and protected values
    #[default]
    Distributional,
    /// A constant, reported regardless of the data
    Fixed { value: f64 },
}

impl UtilityMetric {
    /// The historical constant placeholder (0.85)
    pub fn baseline() -> Self {
        Self::Fixed { value: 0.85 }
    }
}

/// Mechanism routing constants
///
/// Fractions are multiplied by the budget's total epsilon (or delta);
/// caps bound the result from above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MechanismPolicy {
    /// Laplace share of total epsilon for PII columns
    pub pii_epsilon_fraction: f64,
    pub pii_sensitivity: f64,

    /// Gaussian share of total epsilon for financial columns
    pub financial_epsilon_fraction: f64,
    pub financial_delta: f64,
    pub financial_sensitivity: f64,

    /// Exponential share of total epsilon for health columns
    pub health_epsilon_fraction: f64,
    pub health_sensitivity: f64,
    /// Candidate grid size for numeric health columns without a domain
    pub health_candidate_grid: usize,

    /// Laplace share of total epsilon for other sensitive columns
    pub other_sensitive_epsilon_fraction: f64,
    pub other_sensitive_sensitivity: f64,

    pub numerical_epsilon_cap: f64,
    pub numerical_epsilon_fraction: f64,
    pub numerical_delta_cap: f64,
    pub numerical_delta_fraction: f64,
    /// Sensitivity is this fraction of the column range...
    pub numerical_sensitivity_fraction: f64,
    /// ...but never more than this (also used when the range is unknown)
    pub numerical_sensitivity_cap: f64,

    /// Domains up to this size use randomized response
    pub binary_domain_max: usize,
    pub binary_epsilon_cap: f64,
    pub binary_epsilon_fraction: f64,

    pub categorical_epsilon_cap: f64,
    pub categorical_epsilon_fraction: f64,
    pub categorical_sensitivity: f64,
}

impl Default for MechanismPolicy {
    fn default() -> Self {
        Self {
            pii_epsilon_fraction: 0.1,
            pii_sensitivity: 1.0,
            financial_epsilon_fraction: 0.2,
            financial_delta: 1e-6,
            financial_sensitivity: 1000.0,
            health_epsilon_fraction: 0.05,
            health_sensitivity: 1.0,
            health_candidate_grid: 11,
            other_sensitive_epsilon_fraction: 0.2,
            other_sensitive_sensitivity: 1.0,
            numerical_epsilon_cap: 0.5,
            numerical_epsilon_fraction: 0.1,
            numerical_delta_cap: 1e-6,
            numerical_delta_fraction: 0.1,
            numerical_sensitivity_fraction: 0.01,
            numerical_sensitivity_cap: 10.0,
            binary_domain_max: 2,
            binary_epsilon_cap: 1.0,
            binary_epsilon_fraction: 0.2,
            categorical_epsilon_cap: 0.5,
            categorical_epsilon_fraction: 0.15,
            categorical_sensitivity: 1.0,
        }
    }
}

impl MechanismPolicy {
    fn validate(&self) -> Result<()> {
        let non_negative = [
            ("piiEpsilonFraction", self.pii_epsilon_fraction),
            ("piiSensitivity", self.pii_sensitivity),
            ("financialEpsilonFraction", self.financial_epsilon_fraction),
            ("financialSensitivity", self.financial_sensitivity),
            ("healthEpsilonFraction", self.health_epsilon_fraction),
            ("otherSensitiveEpsilonFraction", self.other_sensitive_epsilon_fraction),
            ("otherSensitiveSensitivity", self.other_sensitive_sensitivity),
            ("numericalEpsilonCap", self.numerical_epsilon_cap),
            ("numericalEpsilonFraction", self.numerical_epsilon_fraction),
            ("numericalDeltaCap", self.numerical_delta_cap),
            ("numericalDeltaFraction", self.numerical_delta_fraction),
            ("numericalSensitivityFraction", self.numerical_sensitivity_fraction),
            ("numericalSensitivityCap", self.numerical_sensitivity_cap),
            ("binaryEpsilonCap", self.binary_epsilon_cap),
            ("binaryEpsilonFraction", self.binary_epsilon_fraction),
            ("categoricalEpsilonCap", self.categorical_epsilon_cap),
            ("categoricalEpsilonFraction", self.categorical_epsilon_fraction),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(PrivacyError::Config(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("healthSensitivity", self.health_sensitivity),
            ("categoricalSensitivity", self.categorical_sensitivity),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PrivacyError::Config(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        if self.numerical_delta_cap >= 1.0 {
            return Err(PrivacyError::Config(format!(
                "numericalDeltaCap must be below 1, got {}",
                self.numerical_delta_cap
            )));
        }
        if self.health_candidate_grid < 2 {
            return Err(PrivacyError::Config(format!(
                "healthCandidateGrid must be at least 2, got {}",
                self.health_candidate_grid
            )));
        }
        if !(self.financial_delta > 0.0 && self.financial_delta < 1.0) {
            return Err(PrivacyError::Config(format!(
                "financialDelta must be in (0, 1), got {}",
                self.financial_delta
            )));
        }
        Ok(())
    }
}

/// Configuration for a `ProtectionPipeline`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtectionConfig {
    /// Replace the level's (epsilon, delta) totals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_override: Option<BudgetOverride>,

    pub policy: MechanismPolicy,

    pub utility: UtilityMetric,

    /// Worker threads for row-parallel runs; 0 or 1 runs sequentially
    pub parallelism: usize,
}

impl ProtectionConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    pub fn with_budget(mut self, epsilon: f64, delta: f64) -> Self {
        self.budget_override = Some(BudgetOverride { epsilon, delta });
        self
    }

    pub fn with_utility(mut self, utility: UtilityMetric) -> Self {
        self.utility = utility;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(o) = self.budget_override {
            if !o.epsilon.is_finite() || o.epsilon <= 0.0 {
                return Err(PrivacyError::Config(format!(
                    "budgetOverride.epsilon must be finite and positive, got {}",
                    o.epsilon
                )));
            }
            if !o.delta.is_finite() || !(0.0..1.0).contains(&o.delta) {
                return Err(PrivacyError::Config(format!(
                    "budgetOverride.delta must be in [0, 1), got {}",
                    o.delta
                )));
            }
        }
        if let UtilityMetric::Fixed { value } = self.utility {
            if !(0.0..=1.0).contains(&value) {
                return Err(PrivacyError::Config(format!(
                    "utility value must be in [0, 1], got {}",
                    value
                )));
            }
        }
        self.policy.validate()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallelism > 1
    }
}
