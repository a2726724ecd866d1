//! Error types for dp-protect

use thiserror::Error;

/// Errors that can occur while protecting a dataset
///
/// Budget exhaustion is not an error; a refused spend is reported per cell
/// as `CellOutcome::BudgetExhausted`.
#[derive(Debug, Error)]
pub enum PrivacyError {
    /// A mechanism or budget parameter is out of range
    #[error("Invalid parameter '{name}' = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: String,
    },

    /// Protection configuration is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema descriptor could not be read
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller cancelled the run between two rows
    #[error("Protection run aborted after {rows_completed} rows")]
    Aborted { rows_completed: usize },
}

impl PrivacyError {
    pub(crate) fn invalid(name: &'static str, value: f64, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            value,
            reason: reason.into(),
        }
    }
}

/// Result type alias for protection operations
pub type Result<T> = std::result::Result<T, PrivacyError>;
