//! Privacy budget ledger
//!
//! One `PrivacyBudget` is created per protection run and shared by every
//! mechanism invocation in that run. Check-and-debit happens inside a single
//! critical section, so concurrent callers can never both pass the check
//! when only one request's worth of budget remains.

use crate::error::{PrivacyError, Result};
use crate::types::PrivacyLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// A single debit recorded in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetOperation {
    /// Caller-supplied label (e.g. "laplace:salary")
    pub label: String,

    pub epsilon: f64,

    pub delta: f64,

    /// When the debit was accepted
    pub timestamp: DateTime<Utc>,
}

/// Serializable view of a budget at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    /// Level the totals came from, `None` for explicit totals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<PrivacyLevel>,
    pub epsilon_total: f64,
    pub delta_total: f64,
    pub epsilon_spent: f64,
    pub delta_spent: f64,
    pub operations: Vec<BudgetOperation>,
}

/// Neumaier compensated sum
///
/// Keeps long runs of small debits exact enough that, e.g., one hundred
/// debits of 0.1 land on 10.0 instead of drifting below it.
#[derive(Debug, Clone, Copy, Default)]
struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    fn value(&self) -> f64 {
        self.sum + self.compensation
    }

    fn with(&self, x: f64) -> Self {
        let t = self.sum + x;
        let compensation = if self.sum.abs() >= x.abs() {
            self.compensation + ((self.sum - t) + x)
        } else {
            self.compensation + ((x - t) + self.sum)
        };
        Self {
            sum: t,
            compensation,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    epsilon_spent: CompensatedSum,
    delta_spent: CompensatedSum,
    operations: Vec<BudgetOperation>,
}

/// Epsilon/delta accounting for one protection run
///
/// Invariants: spent never exceeds total, spend never decreases, and the
/// operation log is append-only.
#[derive(Debug)]
pub struct PrivacyBudget {
    level: Option<PrivacyLevel>,
    epsilon_total: f64,
    delta_total: f64,
    ledger: Mutex<Ledger>,
}

impl PrivacyBudget {
    /// Create a budget with the level's default totals and zero spend
    pub fn new(level: PrivacyLevel) -> Self {
        Self {
            level: Some(level),
            epsilon_total: level.epsilon(),
            delta_total: level.delta(),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Create a budget with explicit totals
    pub fn with_totals(epsilon: f64, delta: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(PrivacyError::invalid(
                "epsilon",
                epsilon,
                "budget epsilon must be finite and positive",
            ));
        }
        if !delta.is_finite() || !(0.0..1.0).contains(&delta) {
            return Err(PrivacyError::invalid(
                "delta",
                delta,
                "budget delta must be in [0, 1)",
            ));
        }
        Ok(Self {
            level: None,
            epsilon_total: epsilon,
            delta_total: delta,
            ledger: Mutex::new(Ledger::default()),
        })
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // Debits are applied in one assignment after all checks, so a
        // poisoned guard still holds a consistent ledger.
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn level(&self) -> Option<PrivacyLevel> {
        self.level
    }

    pub fn epsilon_total(&self) -> f64 {
        self.epsilon_total
    }

    pub fn delta_total(&self) -> f64 {
        self.delta_total
    }

    pub fn epsilon_spent(&self) -> f64 {
        self.ledger().epsilon_spent.value()
    }

    pub fn delta_spent(&self) -> f64 {
        self.ledger().delta_spent.value()
    }

    pub fn remaining_epsilon(&self) -> f64 {
        (self.epsilon_total - self.epsilon_spent()).max(0.0)
    }

    pub fn remaining_delta(&self) -> f64 {
        (self.delta_total - self.delta_spent()).max(0.0)
    }

    /// Whether a debit of (epsilon, delta) would fit in the remaining budget
    ///
    /// Pure predicate. Negative or non-finite requests never fit.
    pub fn can_spend(&self, epsilon: f64, delta: f64) -> bool {
        let ledger = self.ledger();
        self.fits(&ledger, epsilon, delta)
    }

    fn fits(&self, ledger: &Ledger, epsilon: f64, delta: f64) -> bool {
        if !valid_request(epsilon) || !valid_request(delta) {
            return false;
        }
        ledger.epsilon_spent.with(epsilon).value() <= self.epsilon_total
            && ledger.delta_spent.with(delta).value() <= self.delta_total
    }

    /// Debit (epsilon, delta) and record the operation
    ///
    /// Returns false, leaving the ledger untouched, when the debit does not
    /// fit. The check and the debit happen under one lock.
    pub fn spend(&self, epsilon: f64, delta: f64, label: impl Into<String>) -> bool {
        let label = label.into();
        let mut ledger = self.ledger();

        if !self.fits(&ledger, epsilon, delta) {
            tracing::debug!(
                label = %label,
                epsilon,
                delta,
                epsilon_spent = ledger.epsilon_spent.value(),
                epsilon_total = self.epsilon_total,
                "Privacy budget debit refused"
            );
            return false;
        }

        ledger.epsilon_spent = ledger.epsilon_spent.with(epsilon);
        ledger.delta_spent = ledger.delta_spent.with(delta);
        ledger.operations.push(BudgetOperation {
            label,
            epsilon,
            delta,
            timestamp: Utc::now(),
        });

        tracing::debug!(
            epsilon,
            delta,
            epsilon_spent = ledger.epsilon_spent.value(),
            delta_spent = ledger.delta_spent.value(),
            operations = ledger.operations.len(),
            "Privacy budget debited"
        );
        true
    }

    pub fn operation_count(&self) -> usize {
        self.ledger().operations.len()
    }

    /// Copy of the operation log, oldest first
    pub fn operations(&self) -> Vec<BudgetOperation> {
        self.ledger().operations.clone()
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let ledger = self.ledger();
        BudgetSnapshot {
            level: self.level,
            epsilon_total: self.epsilon_total,
            delta_total: self.delta_total,
            epsilon_spent: ledger.epsilon_spent.value(),
            delta_spent: ledger.delta_spent.value(),
            operations: ledger.operations.clone(),
        }
    }
}

fn valid_request(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}
