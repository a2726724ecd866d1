//! Privacy reports
//!
//! A `PrivacyReport` is built once, after a run has finished, from the final
//! state of its budget and the original/protected datasets. Risk buckets and
//! compliance flags are heuristic thresholds on epsilon spent, not legal
//! certification.

use crate::budget::PrivacyBudget;
use crate::config::UtilityMetric;
use crate::error::Result;
use crate::types::{Dataset, PrivacyLevel, ProtectedDataset, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Residual privacy risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyRisk {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl PrivacyRisk {
    pub fn from_epsilon(epsilon_spent: f64) -> Self {
        if epsilon_spent <= 0.1 {
            Self::VeryLow
        } else if epsilon_spent <= 1.0 {
            Self::Low
        } else if epsilon_spent <= 5.0 {
            Self::Medium
        } else if epsilon_spent <= 10.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }
}

/// Per-regulation threshold checks on epsilon spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub gdpr: bool,
    pub ccpa: bool,
    pub hipaa: bool,
    pub ferpa: bool,
}

impl ComplianceFlags {
    pub fn from_epsilon(epsilon_spent: f64) -> Self {
        Self {
            gdpr: epsilon_spent <= 1.0,
            ccpa: epsilon_spent <= 5.0,
            hipaa: epsilon_spent <= 0.1,
            ferpa: epsilon_spent <= 1.0,
        }
    }
}

/// Summary of one protection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyReport {
    /// Report identifier (rpt-<uuid>)
    pub report_id: String,

    pub generated_at: DateTime<Utc>,

    /// Level requested for the run
    pub level: PrivacyLevel,

    /// Epsilon granted to the run; differs from the level's default under a
    /// budget override
    pub epsilon_total: f64,

    pub delta_total: f64,

    pub epsilon_used: f64,

    pub delta_used: f64,

    pub epsilon_remaining: f64,

    pub delta_remaining: f64,

    /// Number of accepted budget debits
    pub operations_count: usize,

    /// Similarity of protected to original data, in [0, 1]
    pub data_utility: f64,

    pub privacy_risk: PrivacyRisk,

    pub compliance_flags: ComplianceFlags,

    pub recommendations: Vec<String>,

    pub cells_protected: usize,

    pub cells_budget_exhausted: usize,

    pub cells_unsupported: usize,

    #[serde(default)]
    pub unclassified_columns: Vec<String>,
}

impl PrivacyReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds `PrivacyReport`s
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyReportGenerator {
    utility: UtilityMetric,
}

impl PrivacyReportGenerator {
    pub fn new(utility: UtilityMetric) -> Self {
        Self { utility }
    }

    /// Build a report from a finished run
    ///
    /// Must only be called once every worker of the run has finished with
    /// `budget`.
    pub fn generate(
        &self,
        original: &Dataset,
        protected: &ProtectedDataset,
        level: PrivacyLevel,
        budget: &PrivacyBudget,
    ) -> PrivacyReport {
        let snapshot = budget.snapshot();
        let epsilon_used = snapshot.epsilon_spent;
        let epsilon_remaining = (snapshot.epsilon_total - epsilon_used).max(0.0);
        let delta_remaining = (snapshot.delta_total - snapshot.delta_spent).max(0.0);
        let operations_count = snapshot.operations.len();
        let cells = protected.counts();

        let data_utility = match self.utility {
            UtilityMetric::Fixed { value } => value,
            UtilityMetric::Distributional => data_utility(original, protected),
        };

        let mut recommendations = Vec::new();
        if epsilon_remaining < 0.1 {
            recommendations.push(format!(
                "Privacy budget nearly exhausted ({:.4} epsilon remaining); \
                 further releases from this data need a new budget",
                epsilon_remaining
            ));
        }
        if epsilon_used > 5.0 {
            recommendations.push(format!(
                "High cumulative privacy loss (epsilon = {:.2}); consider a stricter privacy level",
                epsilon_used
            ));
        }
        if operations_count > 10 {
            recommendations.push(format!(
                "{} mechanism invocations were composed; protect fewer columns or \
                 aggregate before release to reduce privacy loss",
                operations_count
            ));
        }
        if cells.budget_exhausted > 0 {
            recommendations.push(format!(
                "{} cells were released without protection because the budget ran out; \
                 raise the budget or protect fewer columns",
                cells.budget_exhausted
            ));
        }
        if !protected.unclassified_columns().is_empty() {
            recommendations.push(format!(
                "Columns missing from the schema were left unprotected: {}",
                protected.unclassified_columns().join(", ")
            ));
        }

        let report = PrivacyReport {
            report_id: format!("rpt-{}", uuid::Uuid::new_v4()),
            generated_at: Utc::now(),
            level,
            epsilon_total: snapshot.epsilon_total,
            delta_total: snapshot.delta_total,
            epsilon_used,
            delta_used: snapshot.delta_spent,
            epsilon_remaining,
            delta_remaining,
            operations_count,
            data_utility,
            privacy_risk: PrivacyRisk::from_epsilon(epsilon_used),
            compliance_flags: ComplianceFlags::from_epsilon(epsilon_used),
            recommendations,
            cells_protected: cells.protected,
            cells_budget_exhausted: cells.budget_exhausted,
            cells_unsupported: cells.unsupported,
            unclassified_columns: protected.unclassified_columns().to_vec(),
        };

        tracing::debug!(
            report_id = %report.report_id,
            epsilon_used,
            risk = ?report.privacy_risk,
            utility = report.data_utility,
            "Privacy report generated"
        );
        report
    }
}

/// Mean per-column utility between original and protected data
///
/// Numeric columns score `1 - min(1, W1 / range)`, where W1 is the
/// 1-Wasserstein distance between the sorted original and protected samples
/// and range is the spread of the original sample. Other columns score the
/// fraction of non-null cells left unchanged. Columns with nothing to
/// compare are skipped; an empty dataset scores 1.
pub fn data_utility(original: &Dataset, protected: &ProtectedDataset) -> f64 {
    let scores: Vec<f64> = original
        .columns()
        .iter()
        .filter_map(|name| column_utility(&original.column(name), &protected.column(name)))
        .collect();

    if scores.is_empty() {
        return 1.0;
    }
    (scores.iter().sum::<f64>() / scores.len() as f64).clamp(0.0, 1.0)
}

fn column_utility(original: &[Value], protected: &[Value]) -> Option<f64> {
    let (mut before, mut after): (Vec<f64>, Vec<f64>) = original
        .iter()
        .zip(protected)
        .filter_map(|(o, p)| Some((o.as_f64()?, p.as_f64()?)))
        .filter(|(o, p)| o.is_finite() && p.is_finite())
        .unzip();

    if !before.is_empty() {
        before.sort_by(f64::total_cmp);
        after.sort_by(f64::total_cmp);
        let w1 = before
            .iter()
            .zip(&after)
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / before.len() as f64;
        let spread = before[before.len() - 1] - before[0];
        let range = if spread > 0.0 { spread } else { 1.0 };
        return Some(1.0 - (w1 / range).min(1.0));
    }

    let compared: Vec<bool> = original
        .iter()
        .zip(protected)
        .filter(|(o, _)| !o.is_null())
        .map(|(o, p)| o == p)
        .collect();
    if compared.is_empty() {
        return None;
    }
    let kept = compared.iter().filter(|same| **same).count();
    Some(kept as f64 / compared.len() as f64)
}
