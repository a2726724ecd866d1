//! Schema descriptors and column classification
//!
//! The schema is produced by an external profiling step; this module only
//! reads it. Columns missing from the schema, or described by a malformed
//! entry, fall back to the inert classification (unknown type, not
//! sensitive, general category) and are reported so the caller can see
//! which columns went unprotected.

use crate::error::{PrivacyError, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column data type as profiled upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Numerical,
    Categorical,
    Text,
    #[default]
    Unknown,
}

/// Sensitivity category of a column flagged as private
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyCategory {
    #[serde(rename = "PII", alias = "pii")]
    Pii,
    #[serde(rename = "financial")]
    Financial,
    #[serde(rename = "health")]
    Health,
    #[default]
    #[serde(rename = "general")]
    General,
}

/// Schema entry for one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,

    #[serde(default)]
    pub data_type: DataType,

    #[serde(default)]
    pub privacy_sensitive: bool,

    #[serde(default)]
    pub privacy_category: PrivacyCategory,

    /// Lower end of the numeric range, used for sensitivity calibration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,

    /// Categorical domain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_values: Vec<Value>,
}

impl ColumnInfo {
    /// Inert classification for columns the schema does not describe
    pub fn unclassified(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn numerical(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Numerical,
            min_value: Some(min),
            max_value: Some(max),
            ..Default::default()
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Categorical,
            unique_values: values,
            ..Default::default()
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Text,
            ..Default::default()
        }
    }

    /// Flag the column as private under `category`
    pub fn sensitive(mut self, category: PrivacyCategory) -> Self {
        self.privacy_sensitive = true;
        self.privacy_category = category;
        self
    }

    /// `(min, max)` when both ends are present
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Distinct non-null domain size
    pub fn domain_size(&self) -> usize {
        let mut seen: Vec<&Value> = Vec::new();
        for v in &self.unique_values {
            if !v.is_null() && !seen.contains(&v) {
                seen.push(v);
            }
        }
        seen.len()
    }

    /// Why this entry cannot be trusted, if it cannot
    pub fn problem(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            return Some("column name is empty".to_string());
        }
        for (field, bound) in [("minValue", self.min_value), ("maxValue", self.max_value)] {
            if let Some(b) = bound {
                if !b.is_finite() {
                    return Some(format!("{} is not finite", field));
                }
            }
        }
        if let Some((min, max)) = self.range() {
            if min > max {
                return Some(format!("minValue {} exceeds maxValue {}", min, max));
            }
        }
        None
    }
}

/// Schema descriptor: a list of column entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    /// Parse a schema from a JSON array of column entries
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PrivacyError::Schema(format!("Failed to parse schema: {}", e)))
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }
}

impl From<Vec<ColumnInfo>> for Schema {
    fn from(columns: Vec<ColumnInfo>) -> Self {
        Self::new(columns)
    }
}

/// How a column name resolved against the schema
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaMatch<'a> {
    Known(&'a ColumnInfo),
    Missing,
    Malformed(&'a str),
}

/// Exact-name lookup of columns in a schema
#[derive(Debug, Clone, Default)]
pub struct ColumnClassifier {
    entries: HashMap<String, std::result::Result<ColumnInfo, String>>,
}

impl ColumnClassifier {
    /// Index a schema. On duplicate names the first entry wins.
    pub fn new(schema: &Schema) -> Self {
        let mut entries = HashMap::with_capacity(schema.columns().len());
        for column in schema.columns() {
            if entries.contains_key(&column.name) {
                tracing::warn!(column = %column.name, "Duplicate schema entry ignored");
                continue;
            }
            let entry = match column.problem() {
                Some(reason) => Err(reason),
                None => Ok(column.clone()),
            };
            entries.insert(column.name.clone(), entry);
        }
        Self { entries }
    }

    pub fn lookup(&self, name: &str) -> SchemaMatch<'_> {
        match self.entries.get(name) {
            Some(Ok(info)) => SchemaMatch::Known(info),
            Some(Err(reason)) => SchemaMatch::Malformed(reason),
            None => SchemaMatch::Missing,
        }
    }

    /// Classification for `name`, inert when the schema has no usable entry
    pub fn classify(&self, name: &str) -> ColumnInfo {
        match self.lookup(name) {
            SchemaMatch::Known(info) => info.clone(),
            SchemaMatch::Missing | SchemaMatch::Malformed(_) => ColumnInfo::unclassified(name),
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        matches!(self.lookup(name), SchemaMatch::Known(_))
    }
}
