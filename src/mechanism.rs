//! Noise mechanisms
//!
//! Laplace, Gaussian, randomized response and the exponential mechanism.
//! Every mechanism debits the shared `PrivacyBudget` before it perturbs
//! anything, and reports the result as a tagged `CellOutcome`:
//!
//! - `Protected`: budget debited, value perturbed
//! - `BudgetExhausted`: debit refused, original value returned
//! - `Unsupported`: value not eligible, nothing debited
//!
//! Randomness comes from `OsRng`, drawn fresh on every invocation.

use crate::budget::PrivacyBudget;
use crate::error::{PrivacyError, Result};
use crate::types::{CellOutcome, Value};
use rand::distributions::Open01;
use rand::rngs::OsRng;
use rand::Rng;

/// Laplace scale `b = sensitivity / epsilon`
pub fn laplace_scale(epsilon: f64, sensitivity: f64) -> Result<f64> {
    check_epsilon(epsilon)?;
    check_sensitivity(sensitivity)?;
    Ok(sensitivity / epsilon)
}

/// Gaussian standard deviation `σ = Δ·sqrt(2·ln(1.25/δ)) / ε`
pub fn gaussian_sigma(epsilon: f64, delta: f64, sensitivity: f64) -> Result<f64> {
    check_epsilon(epsilon)?;
    check_delta(delta)?;
    check_sensitivity(sensitivity)?;
    Ok(sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon)
}

/// Draw one sample of Laplace(0, scale) by inverse CDF
pub fn sample_laplace(scale: f64) -> f64 {
    let u: f64 = OsRng.sample(Open01);
    if u < 0.5 {
        scale * (2.0 * u).ln()
    } else {
        -scale * (2.0 * (1.0 - u)).ln()
    }
}

/// Draw one sample of N(0, sigma²) by Box–Muller
pub fn sample_gaussian(sigma: f64) -> f64 {
    let mut rng = OsRng;
    let u1: f64 = rng.sample(Open01);
    let u2: f64 = rng.sample(Open01);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    sigma * z0
}

/// Probability that randomized response reports the true value
pub fn truth_probability(epsilon: f64) -> f64 {
    // e^ε / (e^ε + 1), written to stay finite for large ε
    1.0 / (1.0 + (-epsilon).exp())
}

/// Evenly spaced candidates over `[min, max]`, both ends included
pub fn numeric_candidates(min: f64, max: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![(min + max) / 2.0],
        n => {
            let step = (max - min) / (n - 1) as f64;
            (0..n).map(|i| min + step * i as f64).collect()
        }
    }
}

/// Outcome of the generic exponential mechanism
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<T> {
    /// The sampled candidate
    Selected(T),
    /// The debit was refused; nothing was sampled
    BudgetExhausted,
}

/// Mechanism library bound to one run's budget
#[derive(Debug, Clone, Copy)]
pub struct NoiseMechanisms<'a> {
    budget: &'a PrivacyBudget,
    column: Option<&'a str>,
}

impl<'a> NoiseMechanisms<'a> {
    pub fn new(budget: &'a PrivacyBudget) -> Self {
        Self {
            budget,
            column: None,
        }
    }

    /// Same budget, with ledger labels tagged by column name
    pub fn for_column<'b>(&self, column: &'b str) -> NoiseMechanisms<'b>
    where
        'a: 'b,
    {
        NoiseMechanisms {
            budget: self.budget,
            column: Some(column),
        }
    }

    pub fn budget(&self) -> &'a PrivacyBudget {
        self.budget
    }

    fn label(&self, mechanism: &str) -> String {
        match self.column {
            Some(column) => format!("{}:{}", mechanism, column),
            None => mechanism.to_string(),
        }
    }

    /// Laplace mechanism: `value + Lap(0, sensitivity/epsilon)`
    pub fn laplace(&self, value: &Value, epsilon: f64, sensitivity: f64) -> Result<CellOutcome> {
        let scale = laplace_scale(epsilon, sensitivity)?;
        if !value.is_numeric() {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }
        if !self.budget.spend(epsilon, 0.0, self.label("laplace")) {
            return Ok(CellOutcome::BudgetExhausted(value.clone()));
        }
        Ok(perturb(value, sample_laplace(scale)))
    }

    /// Gaussian mechanism: `value + N(0, σ²)`
    ///
    /// `epsilon == 0` is a no-op and returns the value as `Unsupported`
    /// without touching the budget.
    pub fn gaussian(
        &self,
        value: &Value,
        epsilon: f64,
        delta: f64,
        sensitivity: f64,
    ) -> Result<CellOutcome> {
        if epsilon == 0.0 {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }
        let sigma = gaussian_sigma(epsilon, delta, sensitivity)?;
        if !value.is_numeric() {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }
        if !self.budget.spend(epsilon, delta, self.label("gaussian")) {
            return Ok(CellOutcome::BudgetExhausted(value.clone()));
        }
        Ok(perturb(value, sample_gaussian(sigma)))
    }

    /// Randomized response over a finite domain
    ///
    /// Reports the true value with probability `e^ε/(e^ε+1)`. Otherwise a
    /// binary domain reports the other member, and a larger domain reports a
    /// uniformly drawn member.
    pub fn randomized_response(
        &self,
        value: &Value,
        epsilon: f64,
        domain: &[Value],
    ) -> Result<CellOutcome> {
        check_epsilon(epsilon)?;
        let domain = distinct(domain);
        if value.is_null() || domain.len() < 2 {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }
        if !self.budget.spend(epsilon, 0.0, self.label("randomized_response")) {
            return Ok(CellOutcome::BudgetExhausted(value.clone()));
        }

        let mut rng = OsRng;
        let r: f64 = rng.gen();
        if r <= truth_probability(epsilon) {
            return Ok(CellOutcome::Protected(value.clone()));
        }

        let reported = if domain.len() == 2 {
            domain
                .iter()
                .find(|candidate| **candidate != value)
                .unwrap_or(&domain[0])
        } else {
            &domain[rng.gen_range(0..domain.len())]
        };
        Ok(CellOutcome::Protected((*reported).clone()))
    }

    /// Exponential mechanism over a finite candidate set
    ///
    /// Samples `c` with probability proportional to
    /// `exp(epsilon · score(c) / (2 · sensitivity))`.
    pub fn exponential<T, F>(
        &self,
        candidates: &[T],
        epsilon: f64,
        sensitivity: f64,
        score: F,
    ) -> Result<Selection<T>>
    where
        T: Clone,
        F: Fn(&T) -> f64,
    {
        check_epsilon(epsilon)?;
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(PrivacyError::invalid(
                "sensitivity",
                sensitivity,
                "exponential mechanism sensitivity must be finite and positive",
            ));
        }
        if candidates.is_empty() {
            return Err(PrivacyError::invalid(
                "candidates",
                0.0,
                "exponential mechanism needs at least one candidate",
            ));
        }

        let scores: Vec<f64> = candidates.iter().map(&score).collect();
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(PrivacyError::invalid(
                "score",
                *bad,
                "candidate scores must be finite",
            ));
        }

        if !self.budget.spend(epsilon, 0.0, self.label("exponential")) {
            return Ok(Selection::BudgetExhausted);
        }

        // Subtract the best score so the largest weight is exactly 1.
        let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scores
            .iter()
            .map(|s| (epsilon * (s - best) / (2.0 * sensitivity)).exp())
            .collect();
        let total: f64 = weights.iter().sum();

        let mut target = OsRng.gen::<f64>() * total;
        for (candidate, weight) in candidates.iter().zip(&weights) {
            if target < *weight {
                return Ok(Selection::Selected(candidate.clone()));
            }
            target -= weight;
        }
        // Rounding can leave a sliver past the last weight.
        Ok(Selection::Selected(candidates[candidates.len() - 1].clone()))
    }

    /// Exponential mechanism on a single categorical cell
    ///
    /// Utility is 1 for the true value and 0 for every other candidate.
    pub fn exponential_value(
        &self,
        value: &Value,
        epsilon: f64,
        sensitivity: f64,
        candidates: &[Value],
    ) -> Result<CellOutcome> {
        check_epsilon(epsilon)?;
        let candidates: Vec<Value> = distinct(candidates).into_iter().cloned().collect();
        if value.is_null() || candidates.len() < 2 {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }
        let selection = self.exponential(&candidates, epsilon, sensitivity, |c| {
            if c == value {
                1.0
            } else {
                0.0
            }
        })?;
        Ok(match selection {
            Selection::Selected(v) => CellOutcome::Protected(v),
            Selection::BudgetExhausted => CellOutcome::BudgetExhausted(value.clone()),
        })
    }

    /// Exponential mechanism on a numeric cell with a known range
    ///
    /// Candidates are `grid` evenly spaced points over `[min, max]`; utility is
    /// `-|c - v| / (max - min)`, so sensitivity is 1. Integer cells are
    /// rounded back to integers.
    pub fn exponential_range(
        &self,
        value: &Value,
        epsilon: f64,
        min: f64,
        max: f64,
        grid: usize,
    ) -> Result<CellOutcome> {
        check_epsilon(epsilon)?;
        let v = match value.as_f64() {
            Some(v) => v,
            None => return Ok(CellOutcome::Unsupported(value.clone())),
        };
        let width = max - min;
        if !width.is_finite() || width <= 0.0 || grid < 2 {
            return Ok(CellOutcome::Unsupported(value.clone()));
        }

        let candidates = numeric_candidates(min, max, grid);
        let selection =
            self.exponential(&candidates, epsilon, 1.0, |c| -((c - v).abs() / width).min(1.0))?;
        Ok(match selection {
            Selection::Selected(c) => CellOutcome::Protected(match value {
                Value::Integer(_) => Value::Integer(c.round() as i64),
                _ => Value::Float(c),
            }),
            Selection::BudgetExhausted => CellOutcome::BudgetExhausted(value.clone()),
        })
    }
}

fn perturb(value: &Value, noise: f64) -> CellOutcome {
    match value.perturbed(noise) {
        Some(v) => CellOutcome::Protected(v),
        None => CellOutcome::Unsupported(value.clone()),
    }
}

fn distinct(values: &[Value]) -> Vec<&Value> {
    let mut out: Vec<&Value> = Vec::with_capacity(values.len());
    for v in values {
        if !v.is_null() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn check_epsilon(epsilon: f64) -> Result<()> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(PrivacyError::invalid(
            "epsilon",
            epsilon,
            "must be finite and positive",
        ));
    }
    Ok(())
}

fn check_delta(delta: f64) -> Result<()> {
    if !(delta > 0.0 && delta < 1.0) {
        return Err(PrivacyError::invalid("delta", delta, "must be in (0, 1)"));
    }
    Ok(())
}

fn check_sensitivity(sensitivity: f64) -> Result<()> {
    if !sensitivity.is_finite() || sensitivity < 0.0 {
        return Err(PrivacyError::invalid(
            "sensitivity",
            sensitivity,
            "must be finite and non-negative",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrivacyLevel;

    const DRAWS: usize = 20_000;

    fn mean_and_std(xs: &[f64]) -> (f64, f64) {
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, var.sqrt())
    }

    #[test]
    fn test_calibration_helpers() {
        assert_eq!(laplace_scale(0.5, 1.0).unwrap(), 2.0);
        let sigma = gaussian_sigma(1.0, 1e-5, 1.0).unwrap();
        assert!((sigma - (2.0 * (1.25f64 / 1e-5).ln()).sqrt()).abs() < 1e-12);
        assert!(laplace_scale(0.0, 1.0).is_err());
        assert!(laplace_scale(1.0, -1.0).is_err());
        assert!(gaussian_sigma(1.0, 0.0, 1.0).is_err());
        assert!(gaussian_sigma(1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_laplace_noise_distribution() {
        let (epsilon, sensitivity) = (0.5, 2.0);
        let b = laplace_scale(epsilon, sensitivity).unwrap();
        let draws: Vec<f64> = (0..DRAWS).map(|_| sample_laplace(b)).collect();

        let (mean, std) = mean_and_std(&draws);
        // Var(Lap(b)) = 2b², so std error of the mean is b·sqrt(2/n).
        assert!(mean.abs() < 5.0 * b * (2.0 / DRAWS as f64).sqrt(), "mean {}", mean);
        // Mean absolute deviation of Lap(b) is b.
        let mad = draws.iter().map(|x| x.abs()).sum::<f64>() / DRAWS as f64;
        assert!((mad - b).abs() / b < 0.05, "mad {} vs scale {}", mad, b);
        assert!((std - b * 2f64.sqrt()).abs() / (b * 2f64.sqrt()) < 0.1);
    }

    #[test]
    fn test_gaussian_noise_distribution() {
        let sigma = gaussian_sigma(1.0, 1e-5, 1.0).unwrap();
        let draws: Vec<f64> = (0..DRAWS).map(|_| sample_gaussian(sigma)).collect();

        let (mean, std) = mean_and_std(&draws);
        assert!(mean.abs() < 5.0 * sigma / (DRAWS as f64).sqrt(), "mean {}", mean);
        assert!((std - sigma).abs() / sigma < 0.05, "std {} vs sigma {}", std, sigma);
    }

    #[test]
    fn test_laplace_debits_and_perturbs() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget).for_column("salary");

        let out = mech.laplace(&Value::Float(100.0), 0.5, 1.0).unwrap();
        assert!(out.is_protected());
        assert!(matches!(out.value(), Value::Float(f) if f.is_finite()));
        assert_eq!(budget.epsilon_spent(), 0.5);
        assert_eq!(budget.operations()[0].label, "laplace:salary");
    }

    #[test]
    fn test_laplace_keeps_integer_kind() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget);
        let out = mech.laplace(&Value::Integer(42), 1.0, 1.0).unwrap();
        assert!(matches!(out, CellOutcome::Protected(Value::Integer(_))));
    }

    #[test]
    fn test_non_numeric_is_unsupported_without_debit() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget);

        let name = Value::from("alice");
        assert_eq!(
            mech.laplace(&name, 0.1, 1.0).unwrap(),
            CellOutcome::Unsupported(name.clone())
        );
        assert_eq!(
            mech.gaussian(&Value::Boolean(true), 0.1, 1e-6, 1.0).unwrap(),
            CellOutcome::Unsupported(Value::Boolean(true))
        );
        assert!(mech.laplace(&Value::Null, 0.1, 1.0).unwrap().is_unsupported());
        assert_eq!(budget.operation_count(), 0);
    }

    #[test]
    fn test_hundred_pii_calls_then_exhausted() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget).for_column("ssn_hash");

        for i in 0..100 {
            let out = mech.laplace(&Value::Integer(i), 0.1, 1.0).unwrap();
            assert!(out.is_protected(), "call {}", i);
        }
        assert_eq!(budget.epsilon_spent(), 10.0);
        assert!(!budget.can_spend(0.1, 0.0));

        let last = mech.laplace(&Value::Integer(7), 0.1, 1.0).unwrap();
        assert_eq!(last, CellOutcome::BudgetExhausted(Value::Integer(7)));
        assert_eq!(budget.operation_count(), 100);
    }

    #[test]
    fn test_gaussian_zero_epsilon_is_noop() {
        let budget = PrivacyBudget::new(PrivacyLevel::Medium);
        let mech = NoiseMechanisms::new(&budget);
        let out = mech.gaussian(&Value::Float(3.0), 0.0, 1e-6, 1.0).unwrap();
        assert_eq!(out, CellOutcome::Unsupported(Value::Float(3.0)));
        assert_eq!(budget.operation_count(), 0);
    }

    #[test]
    fn test_gaussian_age_scenario() {
        let budget = PrivacyBudget::new(PrivacyLevel::Medium);
        let mech = NoiseMechanisms::new(&budget).for_column("age");

        let out = mech.gaussian(&Value::Integer(30), 0.1, 1e-6, 1.0).unwrap();
        assert!(out.is_protected());
        assert!(out.value().as_f64().unwrap().is_finite());
        assert!((budget.epsilon_spent() - 0.1).abs() < 1e-12);
        assert!((budget.delta_spent() - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_invalid_parameters_are_errors() {
        let budget = PrivacyBudget::new(PrivacyLevel::Medium);
        let mech = NoiseMechanisms::new(&budget);
        assert!(mech.laplace(&Value::Float(1.0), -1.0, 1.0).is_err());
        assert!(mech.laplace(&Value::Float(1.0), f64::NAN, 1.0).is_err());
        assert!(mech.gaussian(&Value::Float(1.0), 0.1, 0.0, 1.0).is_err());
        assert!(mech
            .randomized_response(&Value::Boolean(true), 0.0, &[true.into(), false.into()])
            .is_err());
        assert!(mech.exponential(&[1, 2], 0.1, 0.0, |_| 0.0).is_err());
        assert!(mech.exponential::<i32, _>(&[], 0.1, 1.0, |_| 0.0).is_err());
        assert!(mech.exponential(&[1, 2], 0.1, 1.0, |_| f64::NAN).is_err());
        assert_eq!(budget.operation_count(), 0);
    }

    #[test]
    fn test_randomized_response_truth_frequency() {
        let epsilon = 1.0;
        let budget = PrivacyBudget::with_totals(1e9, 0.0).unwrap();
        let mech = NoiseMechanisms::new(&budget);
        let domain = [Value::from("yes"), Value::from("no")];
        let truth = Value::from("yes");

        let trials = 20_000;
        let mut kept = 0usize;
        for _ in 0..trials {
            match mech.randomized_response(&truth, epsilon, &domain).unwrap() {
                CellOutcome::Protected(v) if v == truth => kept += 1,
                CellOutcome::Protected(v) => assert_eq!(v, Value::from("no")),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        let p = truth_probability(epsilon);
        assert!((p - epsilon.exp() / (1.0 + epsilon.exp())).abs() < 1e-12);
        let freq = kept as f64 / trials as f64;
        let se = (p * (1.0 - p) / trials as f64).sqrt();
        assert!((freq - p).abs() < 5.0 * se, "freq {} vs p {}", freq, p);
    }

    #[test]
    fn test_randomized_response_k_ary_stays_in_domain() {
        let budget = PrivacyBudget::with_totals(1e6, 0.0).unwrap();
        let mech = NoiseMechanisms::new(&budget);
        let domain: Vec<Value> = ["red", "green", "blue"].iter().map(|s| Value::from(*s)).collect();

        for _ in 0..500 {
            let out = mech.randomized_response(&domain[0], 0.1, &domain).unwrap();
            assert!(out.is_protected());
            assert!(domain.contains(out.value()));
        }
    }

    #[test]
    fn test_randomized_response_needs_two_values() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget);
        let v = Value::from("only");
        let out = mech.randomized_response(&v, 1.0, &[v.clone(), v.clone()]).unwrap();
        assert_eq!(out, CellOutcome::Unsupported(v));
        assert_eq!(budget.operation_count(), 0);
    }

    #[test]
    fn test_exponential_prefers_high_scores() {
        let budget = PrivacyBudget::with_totals(1e6, 0.0).unwrap();
        let mech = NoiseMechanisms::new(&budget);
        let candidates = [0usize, 1, 2];

        // With ε = 20 and Δ = 1, candidate 2 outweighs the others by e^10.
        let mut hits = 0;
        for _ in 0..200 {
            if let Selection::Selected(c) =
                mech.exponential(&candidates, 20.0, 1.0, |c| *c as f64).unwrap()
            {
                if c == 2 {
                    hits += 1;
                }
            }
        }
        assert!(hits >= 195, "hits {}", hits);
        assert_eq!(budget.operation_count(), 200);
    }

    #[test]
    fn test_exponential_matches_expected_probabilities() {
        let budget = PrivacyBudget::with_totals(1e9, 0.0).unwrap();
        let mech = NoiseMechanisms::new(&budget);
        let candidates = [0usize, 1];
        let epsilon = 2.0;

        let trials = 20_000;
        let mut ones = 0usize;
        for _ in 0..trials {
            if mech.exponential(&candidates, epsilon, 1.0, |c| *c as f64).unwrap()
                == Selection::Selected(1)
            {
                ones += 1;
            }
        }
        // P(1) = e^{ε/2} / (1 + e^{ε/2})
        let p = (epsilon / 2.0).exp() / (1.0 + (epsilon / 2.0).exp());
        let se = (p * (1.0 - p) / trials as f64).sqrt();
        let freq = ones as f64 / trials as f64;
        assert!((freq - p).abs() < 5.0 * se, "freq {} vs p {}", freq, p);
    }

    #[test]
    fn test_exponential_exhausted() {
        let budget = PrivacyBudget::new(PrivacyLevel::Maximum);
        let mech = NoiseMechanisms::new(&budget);
        assert_eq!(
            mech.exponential(&["a", "b"], 0.5, 1.0, |_| 0.0).unwrap(),
            Selection::BudgetExhausted
        );
        let v = Value::from("a");
        assert_eq!(
            mech.exponential_value(&v, 0.5, 1.0, &[v.clone(), Value::from("b")])
                .unwrap(),
            CellOutcome::BudgetExhausted(v)
        );
    }

    #[test]
    fn test_exponential_range_stays_on_grid() {
        let budget = PrivacyBudget::new(PrivacyLevel::Low);
        let mech = NoiseMechanisms::new(&budget).for_column("blood_pressure");
        let grid = numeric_candidates(60.0, 160.0, 11);
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[0], 60.0);
        assert_eq!(grid[10], 160.0);

        let out = mech
            .exponential_range(&Value::Integer(118), 0.5, 60.0, 160.0, 11)
            .unwrap();
        match out {
            CellOutcome::Protected(Value::Integer(v)) => {
                assert!((60..=160).contains(&v));
                assert_eq!(v % 10, 0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(mech
            .exponential_range(&Value::from("x"), 0.5, 60.0, 160.0, 11)
            .unwrap()
            .is_unsupported());
        assert!(mech
            .exponential_range(&Value::Float(1.0), 0.5, 5.0, 5.0, 11)
            .unwrap()
            .is_unsupported());
    }
}
