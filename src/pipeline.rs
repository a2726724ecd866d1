//! Protection pipeline
//!
//! `ProtectionPipeline` walks a dataset row by row, classifies each column
//! against the schema, routes the cell to a mechanism and collects the
//! tagged outcomes. All cells of a run draw from one `PrivacyBudget`, so
//! exhaustion is run-wide: once the budget is gone every later cell that
//! needs a debit comes back as `BudgetExhausted`.

use crate::budget::PrivacyBudget;
use crate::config::ProtectionConfig;
use crate::error::{PrivacyError, Result};
use crate::mechanism::NoiseMechanisms;
use crate::report::{PrivacyReport, PrivacyReportGenerator};
use crate::schema::{ColumnClassifier, ColumnInfo, DataType, PrivacyCategory, Schema, SchemaMatch};
use crate::types::{CellOutcome, Dataset, OutcomeCounts, PrivacyLevel, ProtectedDataset, ProtectedRow, Row, Value};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// What happened during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier (run-<uuid>)
    pub run_id: String,

    /// Level requested for the run
    pub level: PrivacyLevel,

    /// Totals the run's budget actually granted (differs from the level's
    /// defaults under a budget override)
    pub epsilon_total: f64,

    pub delta_total: f64,

    pub rows: usize,

    /// Cell tallies by outcome
    pub cells: OutcomeCounts,

    /// Columns with no usable schema entry
    pub unclassified_columns: Vec<String>,
}

/// A finished protection run
#[derive(Debug)]
pub struct ProtectionRun {
    pub protected: ProtectedDataset,

    /// The run's budget in its final state
    pub budget: PrivacyBudget,

    pub summary: RunSummary,
}

impl ProtectionRun {
    pub fn into_parts(self) -> (ProtectedDataset, PrivacyBudget) {
        (self.protected, self.budget)
    }
}

/// Row/column perturbation driver
#[derive(Debug, Clone, Default)]
pub struct ProtectionPipeline {
    config: ProtectionConfig,
}

impl ProtectionPipeline {
    /// Create a pipeline, validating the config
    pub fn new(config: ProtectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Fresh budget for a run at `level`, honoring any override
    pub fn create_budget(&self, level: PrivacyLevel) -> Result<PrivacyBudget> {
        match self.config.budget_override {
            Some(o) => PrivacyBudget::with_totals(o.epsilon, o.delta),
            None => Ok(PrivacyBudget::new(level)),
        }
    }

    /// Protect every cell of `dataset`
    pub fn apply(
        &self,
        dataset: &Dataset,
        level: PrivacyLevel,
        schema: &Schema,
    ) -> Result<ProtectionRun> {
        self.apply_cancellable(dataset, level, schema, &AtomicBool::new(false))
    }

    /// Like `apply`, but stops at the next row boundary once `cancel` is set
    ///
    /// A cancelled run returns `PrivacyError::Aborted` and no partial output.
    pub fn apply_cancellable(
        &self,
        dataset: &Dataset,
        level: PrivacyLevel,
        schema: &Schema,
        cancel: &AtomicBool,
    ) -> Result<ProtectionRun> {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let budget = self.create_budget(level)?;
        let classifier = ColumnClassifier::new(schema);
        let (columns, unclassified_columns) = resolve_columns(&classifier, dataset);

        tracing::info!(
            run_id = %run_id,
            level = %level,
            rows = dataset.len(),
            columns = columns.len(),
            epsilon_total = budget.epsilon_total(),
            delta_total = budget.delta_total(),
            parallelism = self.config.parallelism,
            "Protection run started"
        );

        let mechanisms = NoiseMechanisms::new(&budget);
        let rows = if self.config.is_parallel() {
            self.protect_rows_parallel(mechanisms, &columns, dataset.rows(), cancel)?
        } else {
            self.protect_rows(mechanisms, &columns, dataset.rows(), cancel)?
        };

        let protected = ProtectedDataset::new(rows, unclassified_columns.clone());
        let cells = protected.counts();

        tracing::info!(
            run_id = %run_id,
            rows = protected.len(),
            protected = cells.protected,
            budget_exhausted = cells.budget_exhausted,
            unsupported = cells.unsupported,
            epsilon_spent = budget.epsilon_spent(),
            delta_spent = budget.delta_spent(),
            "Protection run finished"
        );
        if cells.budget_exhausted > 0 {
            tracing::warn!(
                run_id = %run_id,
                cells = cells.budget_exhausted,
                "Cells released unprotected because the privacy budget ran out"
            );
        }

        let summary = RunSummary {
            run_id,
            level,
            epsilon_total: budget.epsilon_total(),
            delta_total: budget.delta_total(),
            rows: protected.len(),
            cells,
            unclassified_columns,
        };
        Ok(ProtectionRun {
            protected,
            budget,
            summary,
        })
    }

    /// Build a report for a finished run using the configured utility metric
    pub fn report(&self, original: &Dataset, run: &ProtectionRun) -> PrivacyReport {
        PrivacyReportGenerator::new(self.config.utility).generate(
            original,
            &run.protected,
            run.summary.level,
            &run.budget,
        )
    }

    fn protect_rows(
        &self,
        mechanisms: NoiseMechanisms<'_>,
        columns: &HashMap<String, ColumnInfo>,
        rows: &[Row],
        cancel: &AtomicBool,
    ) -> Result<Vec<ProtectedRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(rows_completed = i, "Protection run cancelled");
                return Err(PrivacyError::Aborted { rows_completed: i });
            }
            out.push(self.protect_row(mechanisms, columns, row)?);
        }
        Ok(out)
    }

    fn protect_rows_parallel(
        &self,
        mechanisms: NoiseMechanisms<'_>,
        columns: &HashMap<String, ColumnInfo>,
        rows: &[Row],
        cancel: &AtomicBool,
    ) -> Result<Vec<ProtectedRow>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .build()
            .map_err(|e| PrivacyError::Config(format!("Failed to build worker pool: {}", e)))?;
        let completed = AtomicUsize::new(0);

        let result = pool.install(|| {
            rows.par_iter()
                .map(|row| -> Result<ProtectedRow> {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(PrivacyError::Aborted {
                            rows_completed: completed.load(Ordering::SeqCst),
                        });
                    }
                    let protected = self.protect_row(mechanisms, columns, row)?;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(protected)
                })
                .collect::<Result<Vec<_>>>()
        });

        if let Err(PrivacyError::Aborted { .. }) = &result {
            let rows_completed = completed.load(Ordering::SeqCst);
            tracing::info!(rows_completed, "Protection run cancelled");
            return Err(PrivacyError::Aborted { rows_completed });
        }
        result
    }

    fn protect_row(
        &self,
        mechanisms: NoiseMechanisms<'_>,
        columns: &HashMap<String, ColumnInfo>,
        row: &Row,
    ) -> Result<ProtectedRow> {
        row.iter()
            .map(|(name, value)| -> Result<(String, CellOutcome)> {
                let outcome = match columns.get(name) {
                    Some(info) => self.protect_cell(&mechanisms.for_column(name), info, value)?,
                    None => CellOutcome::Unsupported(value.clone()),
                };
                Ok((name.clone(), outcome))
            })
            .collect()
    }

    /// Route one cell to its mechanism
    ///
    /// The sensitivity flag takes priority over the data type. Parameters
    /// are derived from the budget's totals and the configured policy.
    pub fn protect_cell(
        &self,
        mechanisms: &NoiseMechanisms<'_>,
        info: &ColumnInfo,
        value: &Value,
    ) -> Result<CellOutcome> {
        let p = &self.config.policy;
        let budget = mechanisms.budget();
        let eps_total = budget.epsilon_total();
        let delta_total = budget.delta_total();

        if value.is_null() {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }

        if info.privacy_sensitive {
            return match info.privacy_category {
                PrivacyCategory::Pii => {
                    let epsilon = eps_total * p.pii_epsilon_fraction;
                    if epsilon <= 0.0 {
                        return Ok(CellOutcome::Unsupported(value.clone()));
                    }
                    mechanisms.laplace(value, epsilon, p.pii_sensitivity)
                }
                PrivacyCategory::Financial => mechanisms.gaussian(
                    value,
                    eps_total * p.financial_epsilon_fraction,
                    p.financial_delta,
                    p.financial_sensitivity,
                ),
                PrivacyCategory::Health => {
                    let epsilon = eps_total * p.health_epsilon_fraction;
                    if epsilon <= 0.0 {
                        return Ok(CellOutcome::Unsupported(value.clone()));
                    }
                    if info.domain_size() >= 2 {
                        mechanisms.exponential_value(
                            value,
                            epsilon,
                            p.health_sensitivity,
                            &info.unique_values,
                        )
                    } else if let Some((min, max)) = info.range() {
                        mechanisms.exponential_range(
                            value,
                            epsilon,
                            min,
                            max,
                            p.health_candidate_grid,
                        )
                    } else {
                        Ok(CellOutcome::Unsupported(value.clone()))
                    }
                }
                PrivacyCategory::General => {
                    let epsilon = eps_total * p.other_sensitive_epsilon_fraction;
                    if epsilon <= 0.0 {
                        return Ok(CellOutcome::Unsupported(value.clone()));
                    }
                    mechanisms.laplace(value, epsilon, p.other_sensitive_sensitivity)
                }
            };
        }

        match info.data_type {
            DataType::Numerical => {
                let sensitivity = match info.range() {
                    Some((min, max)) => (p.numerical_sensitivity_fraction * (max - min))
                        .min(p.numerical_sensitivity_cap),
                    None => p.numerical_sensitivity_cap,
                };
                let epsilon = p.numerical_epsilon_cap.min(eps_total * p.numerical_epsilon_fraction);
                let delta = p.numerical_delta_cap.min(delta_total * p.numerical_delta_fraction);
                if delta <= 0.0 {
                    // A pure-epsilon budget cannot pay for Gaussian noise.
                    return Ok(CellOutcome::Unsupported(value.clone()));
                }
                mechanisms.gaussian(value, epsilon, delta, sensitivity)
            }
            DataType::Categorical => {
                if info.domain_size() <= p.binary_domain_max {
                    let epsilon = p.binary_epsilon_cap.min(eps_total * p.binary_epsilon_fraction);
                    if epsilon <= 0.0 {
                        return Ok(CellOutcome::Unsupported(value.clone()));
                    }
                    mechanisms.randomized_response(value, epsilon, &info.unique_values)
                } else {
                    let epsilon = p
                        .categorical_epsilon_cap
                        .min(eps_total * p.categorical_epsilon_fraction);
                    if epsilon <= 0.0 {
                        return Ok(CellOutcome::Unsupported(value.clone()));
                    }
                    mechanisms.exponential_value(
                        value,
                        epsilon,
                        p.categorical_sensitivity,
                        &info.unique_values,
                    )
                }
            }
            DataType::Text | DataType::Unknown => Ok(CellOutcome::Unsupported(value.clone())),
        }
    }
}

/// Classify every column of the dataset once, warning about the ones the
/// schema cannot describe
fn resolve_columns(
    classifier: &ColumnClassifier,
    dataset: &Dataset,
) -> (HashMap<String, ColumnInfo>, Vec<String>) {
    let mut columns = HashMap::new();
    let mut unclassified = Vec::new();

    for name in dataset.columns() {
        match classifier.lookup(&name) {
            SchemaMatch::Known(_) => {}
            SchemaMatch::Missing => {
                tracing::warn!(column = %name, "Column missing from schema; left unprotected");
                unclassified.push(name.clone());
            }
            SchemaMatch::Malformed(reason) => {
                tracing::warn!(
                    column = %name,
                    reason = %reason,
                    "Malformed schema entry; column left unprotected"
                );
                unclassified.push(name.clone());
            }
        }
        let info = classifier.classify(&name);
        columns.insert(name, info);
    }

    (columns, unclassified)
}
