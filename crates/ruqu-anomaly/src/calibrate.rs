//! Threshold calibration and above-threshold counting.
//!
//! The threshold for a window length comes from the reference (no-anomaly)
//! activity matrix: each position contributes the mean of its own samples,
//! and the CLT upper limit is taken over those per-position means:
//!
//! ```text
//! threshold(w) = w · (mean(μ) + √2 · std(μ) · erfinv(confidence))
//! ```
//!
//! A position is *above* when its accumulated count `frequency · w` exceeds
//! the threshold.

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};
use crate::matrix::{ActivityMatrix, MatrixBuilder};
use crate::stats::{clt_upper_limit, mean, population_std};

/// A calibrated accumulated-count threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedThreshold {
    /// Count per window above which a position is flagged.
    pub threshold: f64,
    /// Number of per-position means the statistics were taken over.
    pub sample_count: usize,
}

/// Mean and population std across samples of a per-sample position count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AboveCount {
    pub mean: f64,
    pub std: f64,
}

impl AboveCount {
    fn from_counts(counts: &[f64]) -> Result<Self> {
        match (mean(counts), population_std(counts)) {
            (Some(mean), Some(std)) => Ok(Self { mean, std }),
            _ => Err(AnomalyError::InsufficientData(
                "above-threshold count over zero samples".into(),
            )),
        }
    }
}

/// Mean and spread of the flagged-set centroid across samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentroidSummary {
    pub mean_x: f64,
    pub mean_y: f64,
    pub std_x: f64,
    pub std_y: f64,
    /// Samples with a non-empty flagged set.
    pub samples: usize,
}

/// CLT threshold of `matrix` for `window` cycles.
///
/// # Errors
///
/// [`AnomalyError::InsufficientData`] if the matrix has no positions or no
/// samples.
pub fn threshold_from_matrix(
    matrix: &ActivityMatrix,
    window: usize,
    confidence: f64,
) -> Result<CalibratedThreshold> {
    if matrix.position_count() == 0 {
        return Err(AnomalyError::InsufficientData(
            "reference matrix has zero positions".into(),
        ));
    }
    let means = matrix.position_means().ok_or_else(|| {
        AnomalyError::InsufficientData("reference matrix has zero samples".into())
    })?;
    let means = means.to_vec();
    let (mu, sigma) = match (mean(&means), population_std(&means)) {
        (Some(m), Some(s)) => (m, s),
        _ => {
            return Err(AnomalyError::InsufficientData(
                "no per-position means".into(),
            ))
        }
    };
    Ok(CalibratedThreshold {
        threshold: clt_upper_limit(mu, sigma, window, confidence),
        sample_count: means.len(),
    })
}

/// Per-sample count of positions with `frequency · window > threshold`.
pub fn above_counts(matrix: &ActivityMatrix, window: usize, threshold: f64) -> Vec<f64> {
    let w = window as f64;
    matrix
        .values()
        .axis_iter(Axis(1))
        .map(|col| col.iter().filter(|&&f| f * w > threshold).count() as f64)
        .collect()
}

/// Mean and std across samples of [`above_counts`].
pub fn above_count_from_matrix(
    matrix: &ActivityMatrix,
    window: usize,
    threshold: f64,
) -> Result<AboveCount> {
    AboveCount::from_counts(&above_counts(matrix, window, threshold))
}

/// Derives thresholds and above counts from memoized activity matrices.
#[derive(Debug)]
pub struct Calibrator {
    matrices: MatrixBuilder,
    reference_ratio: u32,
}

impl Calibrator {
    /// Create a calibrator. `reference_ratio` selects the no-anomaly matrix.
    pub fn new(matrices: MatrixBuilder, reference_ratio: u32) -> Self {
        Self {
            matrices,
            reference_ratio,
        }
    }

    /// Ratio of the reference condition.
    pub fn reference_ratio(&self) -> u32 {
        self.reference_ratio
    }

    /// Matrix access for callers that need raw frequencies.
    pub fn matrices(&self) -> &MatrixBuilder {
        &self.matrices
    }

    /// Threshold for `window` from the reference configuration.
    pub fn calibrate_threshold(
        &self,
        reference_config_id: &str,
        window: usize,
        confidence: f64,
    ) -> Result<CalibratedThreshold> {
        let matrix =
            self.matrices
                .get_activity_matrix(reference_config_id, window, self.reference_ratio)?;
        threshold_from_matrix(&matrix, window, confidence)
    }

    /// Above-threshold count statistics of one configuration.
    pub fn count_above(
        &self,
        config_id: &str,
        window: usize,
        ratio: u32,
        threshold: f64,
    ) -> Result<AboveCount> {
        let matrix = self.matrices.get_activity_matrix(config_id, window, ratio)?;
        above_count_from_matrix(&matrix, window, threshold)
    }

    /// For each per-cycle frequency threshold, mean and std across samples of
    /// the number of positions with `frequency >= t`.
    pub fn above_fraction_curve(
        &self,
        config_id: &str,
        window: usize,
        ratio: u32,
        thresholds: &[f64],
    ) -> Result<Vec<AboveCount>> {
        let matrix = self.matrices.get_activity_matrix(config_id, window, ratio)?;
        thresholds
            .iter()
            .map(|&t| {
                let counts: Vec<f64> = matrix
                    .values()
                    .axis_iter(Axis(1))
                    .map(|col| col.iter().filter(|&&f| f >= t).count() as f64)
                    .collect();
                AboveCount::from_counts(&counts)
            })
            .collect()
    }

    /// For each per-cycle frequency threshold, the centroid of positions with
    /// `frequency >= t`, averaged over samples.
    ///
    /// Samples with an empty flagged set are excluded; a threshold that flags
    /// nothing in any sample yields `None`.
    pub fn anomaly_centroid_curve(
        &self,
        config_id: &str,
        window: usize,
        ratio: u32,
        thresholds: &[f64],
    ) -> Result<Vec<Option<CentroidSummary>>> {
        let matrix = self.matrices.get_activity_matrix(config_id, window, ratio)?;
        let positions = matrix.positions();
        let mut out = Vec::with_capacity(thresholds.len());
        for &t in thresholds {
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for col in matrix.values().axis_iter(Axis(1)) {
                let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
                for (pos, &f) in positions.iter().zip(col.iter()) {
                    if f >= t {
                        sx += f64::from(pos.x);
                        sy += f64::from(pos.y);
                        n += 1;
                    }
                }
                if n > 0 {
                    xs.push(sx / n as f64);
                    ys.push(sy / n as f64);
                }
            }
            out.push(match (mean(&xs), mean(&ys), population_std(&xs), population_std(&ys)) {
                (Some(mean_x), Some(mean_y), Some(std_x), Some(std_y)) => Some(CentroidSummary {
                    mean_x,
                    mean_y,
                    std_x,
                    std_y,
                    samples: xs.len(),
                }),
                _ => None,
            });
        }
        Ok(out)
    }
}
