//! Core data types for the protection engine
//!
//! Datasets are tabular: ordered rows, each an unordered mapping from column
//! name to a scalar `Value`. Rows are `BTreeMap`s so columns are always
//! visited in the same (lexicographic) order.

use crate::error::{PrivacyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Privacy level selected by the caller
///
/// Each level maps to fixed default (epsilon, delta) totals for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

impl PrivacyLevel {
    /// All levels, weakest first
    pub const ALL: [PrivacyLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Maximum];

    /// Total epsilon granted to a run at this level
    pub fn epsilon(self) -> f64 {
        match self {
            Self::Low => 10.0,
            Self::Medium => 1.0,
            Self::High => 0.1,
            Self::Maximum => 0.01,
        }
    }

    /// Total delta granted to a run at this level
    pub fn delta(self) -> f64 {
        match self {
            Self::Low => 1e-3,
            Self::Medium => 1e-5,
            Self::High => 1e-6,
            Self::Maximum => 1e-8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Maximum => "maximum",
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyLevel {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "maximum" => Ok(Self::Maximum),
            other => Err(PrivacyError::Config(format!(
                "Unknown privacy level '{}' (expected low, medium, high or maximum)",
                other
            ))),
        }
    }
}

/// A single cell value
///
/// Serializes as a bare JSON scalar, so datasets read and write as plain
/// arrays of objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Numeric view of integers and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
        }
    }

    /// Add noise while keeping the original numeric kind
    ///
    /// Integers are rounded to the nearest integer (saturating at the `i64`
    /// bounds). Non-numeric values yield `None`.
    pub fn perturbed(&self, noise: f64) -> Option<Value> {
        match self {
            Value::Float(f) => Some(Value::Float(f + noise)),
            Value::Integer(i) => Some(Value::Integer((*i as f64 + noise).round() as i64)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// One row: column name → value
pub type Row = BTreeMap<String, Value>;

/// An ordered sequence of rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Parse a dataset from a JSON array of flat objects
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of column names across all rows, sorted
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Values of one column in row order (absent cells read as `Null`)
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|r| r.get(name).cloned().unwrap_or_default())
            .collect()
    }
}

impl From<Vec<Row>> for Dataset {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

/// Result of protecting one cell
///
/// Makes it impossible to mistake an unprotected passthrough for a
/// perturbed value after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum CellOutcome {
    /// The value was perturbed by a mechanism and the budget was debited
    Protected(Value),
    /// The budget could not cover the mechanism; original value kept
    BudgetExhausted(Value),
    /// Value or column is not eligible for protection; original value kept
    Unsupported(Value),
}

impl CellOutcome {
    pub fn value(&self) -> &Value {
        match self {
            Self::Protected(v) | Self::BudgetExhausted(v) | Self::Unsupported(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Protected(v) | Self::BudgetExhausted(v) | Self::Unsupported(v) => v,
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::BudgetExhausted(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Cell tallies by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub protected: usize,
    pub budget_exhausted: usize,
    pub unsupported: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: &CellOutcome) {
        match outcome {
            CellOutcome::Protected(_) => self.protected += 1,
            CellOutcome::BudgetExhausted(_) => self.budget_exhausted += 1,
            CellOutcome::Unsupported(_) => self.unsupported += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.protected + self.budget_exhausted + self.unsupported
    }
}

/// One protected row: column name → tagged outcome
pub type ProtectedRow = BTreeMap<String, CellOutcome>;

/// Output of a protection run
///
/// Same row count and column set as the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedDataset {
    rows: Vec<ProtectedRow>,

    /// Columns that had no usable schema entry and were left unprotected
    #[serde(default)]
    unclassified_columns: Vec<String>,
}

impl ProtectedDataset {
    pub fn new(rows: Vec<ProtectedRow>, unclassified_columns: Vec<String>) -> Self {
        Self {
            rows,
            unclassified_columns,
        }
    }

    pub fn rows(&self) -> &[ProtectedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn unclassified_columns(&self) -> &[String] {
        &self.unclassified_columns
    }

    /// Plain dataset of the output values, dropping outcome tags
    pub fn values(&self) -> Dataset {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(k, outcome)| (k.clone(), outcome.value().clone()))
                    .collect::<Row>()
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// Values of one column in row order (absent cells read as `Null`)
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|r| r.get(name).map(|o| o.value().clone()).unwrap_or_default())
            .collect()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in self.rows.iter().flat_map(|r| r.values()) {
            counts.record(outcome);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_totals() {
        assert_eq!(PrivacyLevel::Low.epsilon(), 10.0);
        assert_eq!(PrivacyLevel::Low.delta(), 1e-3);
        assert_eq!(PrivacyLevel::Medium.epsilon(), 1.0);
        assert_eq!(PrivacyLevel::Medium.delta(), 1e-5);
        assert_eq!(PrivacyLevel::High.epsilon(), 0.1);
        assert_eq!(PrivacyLevel::High.delta(), 1e-6);
        assert_eq!(PrivacyLevel::Maximum.epsilon(), 0.01);
        assert_eq!(PrivacyLevel::Maximum.delta(), 1e-8);
    }

    #[test]
    fn test_level_parse_and_display() {
        for level in PrivacyLevel::ALL {
            let parsed: PrivacyLevel = level.to_string().parse().unwrap();
            assert_eq!(parsed, level);
        }
        assert_eq!(" HIGH ".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::High);
        assert!("extreme".parse::<PrivacyLevel>().is_err());
    }

    #[test]
    fn test_level_serde_lowercase() {
        let json = serde_json::to_string(&PrivacyLevel::Maximum).unwrap();
        assert_eq!(json, "\"maximum\"");
    }

    #[test]
    fn test_value_untagged_json() {
        let row: Row = serde_json::from_str(
            r#"{"age": 30, "score": 1.5, "name": "ann", "active": true, "note": null}"#,
        )
        .unwrap();
        assert_eq!(row["age"], Value::Integer(30));
        assert_eq!(row["score"], Value::Float(1.5));
        assert_eq!(row["name"], Value::String("ann".into()));
        assert_eq!(row["active"], Value::Boolean(true));
        assert_eq!(row["note"], Value::Null);

        let back = serde_json::to_value(&row).unwrap();
        assert_eq!(back["age"], 30);
        assert!(back["note"].is_null());
    }

    #[test]
    fn test_value_perturbed_keeps_kind() {
        assert_eq!(Value::Integer(10).perturbed(0.6), Some(Value::Integer(11)));
        assert_eq!(Value::Integer(10).perturbed(-0.4), Some(Value::Integer(10)));
        assert_eq!(Value::Float(1.0).perturbed(0.5), Some(Value::Float(1.5)));
        assert_eq!(Value::from("x").perturbed(1.0), None);
        assert_eq!(Value::Null.perturbed(1.0), None);
    }

    #[test]
    fn test_cell_outcome_serialization() {
        let json = serde_json::to_value(CellOutcome::BudgetExhausted(Value::Integer(3))).unwrap();
        assert_eq!(json["status"], "budgetExhausted");
        assert_eq!(json["value"], 3);

        let back: CellOutcome =
            serde_json::from_str(r#"{"status":"protected","value":2.5}"#).unwrap();
        assert_eq!(back, CellOutcome::Protected(Value::Float(2.5)));
    }

    #[test]
    fn test_dataset_columns_and_counts() {
        let dataset = Dataset::from_json(r#"[{"b": 1, "a": 2}, {"c": "x"}]"#).unwrap();
        assert_eq!(dataset.columns(), vec!["a", "b", "c"]);
        assert_eq!(dataset.column("c"), vec![Value::Null, Value::from("x")]);

        let mut row = ProtectedRow::new();
        row.insert("a".into(), CellOutcome::Protected(Value::Integer(5)));
        row.insert("b".into(), CellOutcome::Unsupported(Value::Integer(1)));
        let protected = ProtectedDataset::new(vec![row], vec!["b".into()]);

        let counts = protected.counts();
        assert_eq!(counts.protected, 1);
        assert_eq!(counts.unsupported, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(protected.values().rows()[0]["a"], Value::Integer(5));
    }
}
