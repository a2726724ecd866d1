//! # dp-protect
//!
//! Differential-privacy protection for tabular datasets.
//!
//! ## Overview
//!
//! `dp-protect` takes a dataset (rows of named scalar cells), a schema
//! describing each column, and a privacy level. It perturbs every eligible
//! cell with a calibrated noise mechanism, charges each perturbation to a
//! single run-wide privacy budget, and can summarize the run in a privacy
//! report.
//!
//! ## Quick Start
//!
//! ```rust
//! use dp_protect::{ColumnInfo, Dataset, PrivacyLevel, ProtectionPipeline, Schema};
//!
//! # fn example() -> dp_protect::Result<()> {
//! let dataset = Dataset::from_json(r#"[{"age": 34}, {"age": 51}]"#)?;
//! let schema = Schema::new(vec![ColumnInfo::numerical("age", 0.0, 100.0)]);
//!
//! let pipeline = ProtectionPipeline::default();
//! let run = pipeline.apply(&dataset, PrivacyLevel::Medium, &schema)?;
//!
//! let report = pipeline.report(&dataset, &run);
//! println!("epsilon used: {}", report.epsilon_used);
//! # Ok(())
//! # }
//! ```
//!
//! ## Mechanisms
//!
//! - **Laplace**: pure epsilon-DP additive noise for numeric values
//! - **Gaussian**: (epsilon, delta)-DP additive noise for numeric values
//! - **Randomized response**: k-ary truthful/flip release for small domains
//! - **Exponential**: utility-weighted selection from a candidate set
//!
//! ## Architecture
//!
//! - **PrivacyBudget**: thread-safe (epsilon, delta) ledger for one run
//! - **NoiseMechanisms**: mechanisms bound to a budget, returning tagged outcomes
//! - **ColumnClassifier**: exact-name schema lookup with an inert fallback
//! - **ProtectionPipeline**: per-cell routing, sequential or row-parallel
//! - **PrivacyReportGenerator**: risk, compliance and utility summary

pub mod budget;
pub mod config;
pub mod error;
pub mod mechanism;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod types;

// Re-export core types
pub use budget::{BudgetOperation, BudgetSnapshot, PrivacyBudget};
pub use config::{BudgetOverride, MechanismPolicy, ProtectionConfig, UtilityMetric};
pub use error::{PrivacyError, Result};
pub use mechanism::{NoiseMechanisms, Selection};
pub use pipeline::{ProtectionPipeline, ProtectionRun, RunSummary};
pub use report::{ComplianceFlags, PrivacyReport, PrivacyReportGenerator, PrivacyRisk};
pub use schema::{ColumnClassifier, ColumnInfo, DataType, PrivacyCategory, Schema, SchemaMatch};
pub use types::{
    CellOutcome, Dataset, OutcomeCounts, PrivacyLevel, ProtectedDataset, ProtectedRow, Row, Value,
};
