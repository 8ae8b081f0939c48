//! Small statistics helpers shared by the calibrator and the extractors.
//!
//! All standard deviations are population (ddof = 0).

use serde::{Deserialize, Serialize};
use statrs::function::erf::erf_inv;
use std::f64::consts::SQRT_2;

/// Inverse error function.
#[inline]
pub fn erfinv(x: f64) -> f64 {
    erf_inv(x)
}

/// Confidence half-width of a Bernoulli rate `mu` observed over `window` cycles:
/// `sqrt(2·μ·(1−μ)/window) · erfinv(confidence)`.
///
/// Rates outside `[0, 1]` produce a zero variance term rather than NaN.
pub fn confidence_half_width(mu: f64, window: usize, confidence: f64) -> f64 {
    if window == 0 {
        return 0.0;
    }
    let var = (2.0 * mu * (1.0 - mu) / window as f64).max(0.0);
    var.sqrt() * erfinv(confidence)
}

/// Upper-limit accumulated count for `window` cycles:
/// `window · (mean + √2 · std · erfinv(confidence))`.
pub fn clt_upper_limit(mean: f64, std: f64, window: usize, confidence: f64) -> f64 {
    window as f64 * (mean + SQRT_2 * std * erfinv(confidence))
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, `None` for an empty slice.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Median (mean of the two middle values for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Mean, spread and range of a population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// Summarize `values`; `None` when empty.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let mean = mean(values)?;
        let std = population_std(values)?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self { mean, std, min, max })
    }

    /// Summarize integer counts.
    pub fn from_counts(counts: &[usize]) -> Option<Self> {
        let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        Self::from_slice(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn erfinv_reference_value() {
        // erfinv(0.99) from standard tables
        assert_relative_eq!(erfinv(0.99), 1.821_386_367_718_449_6, epsilon = 1e-9);
        assert_relative_eq!(erfinv(0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn half_width_matches_formula() {
        let hw = confidence_half_width(0.01, 100, 0.99);
        let expected = (2.0 * 0.01 * 0.99 / 100.0_f64).sqrt() * erfinv(0.99);
        assert_relative_eq!(hw, expected, epsilon = 1e-12);
        assert_eq!(confidence_half_width(0.0, 100, 0.99), 0.0);
        assert_eq!(confidence_half_width(0.5, 0, 0.99), 0.0);
    }

    #[test]
    fn clt_upper_limit_scenario() {
        let t = clt_upper_limit(0.01, 0.002, 100, 0.99);
        assert_relative_eq!(t, 100.0 * (0.01 + SQRT_2 * 0.002 * 1.821_386_367_718_449_6), epsilon = 1e-9);
        assert_relative_eq!(t, 1.515_1, epsilon = 1e-3);
    }

    #[test]
    fn population_statistics() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&v).unwrap(), 5.0);
        assert_relative_eq!(population_std(&v).unwrap(), 2.0);
        assert_relative_eq!(median(&v).unwrap(), 4.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn summary_of_counts() {
        let s = Summary::from_counts(&[1, 3]).unwrap();
        assert_relative_eq!(s.mean, 2.0);
        assert_relative_eq!(s.std, 1.0);
        assert_eq!((s.min, s.max), (1.0, 3.0));
        assert!(Summary::from_counts(&[]).is_none());
    }
}
