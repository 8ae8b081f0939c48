//! Result artifacts handed to reporting and plotting collaborators.
//!
//! Every artifact is a `ratio -> report` map written as pretty JSON. Missing
//! values (undetected samples, empty flagged sets) serialize as `null`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::calibrate::{AboveCount, CentroidSummary};
use crate::error::{AnomalyError, Result};
use crate::extract::{summarize_errors, Localization};
use crate::scan::WindowFrame;
use crate::search::{DetectionCurve, SearchOutcome};
use crate::stats::Summary;

/// Calibration table file name.
pub const WINDOW_SIZE_FILE: &str = "_windowsize.txt";
/// Detection-performance artifact.
pub const PERFORMANCE_FILE: &str = "_result_anomaly_detection_perf.json";
/// Trajectory-curve artifact.
pub const TRAJECTORY_FILE: &str = "_result_trajectory.json";
/// Detection-latency artifact.
pub const LATENCY_FILE: &str = "_result_detection_latency.json";
/// Position-error artifact.
pub const POSITION_ERROR_FILE: &str = "_result_position_error.json";

/// Threshold-sweep artifact of one configuration.
pub fn threshold_sweep_file(ratio: u32, window: usize) -> String {
    format!("_result_threshold_sweep_ratio{ratio}_cycle{window}.json")
}

// ---------------------------------------------------------------------------
// Window search
// ---------------------------------------------------------------------------

/// Selected window per anomalous ratio, `None` where no window qualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowListing {
    pub ratios: Vec<u32>,
    pub window_sizes: Vec<Option<usize>>,
}

/// False-positive and detection curves of a window search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub reference: DetectionCurve,
    pub curves: BTreeMap<u32, DetectionCurve>,
    pub thresholds: BTreeMap<usize, f64>,
    pub window: WindowListing,
}

impl From<&SearchOutcome> for PerformanceReport {
    fn from(outcome: &SearchOutcome) -> Self {
        let (ratios, window_sizes) = outcome
            .table
            .iter()
            .map(|(ratio, choice)| (ratio, choice.map(|c| c.window)))
            .unzip();
        Self {
            reference: outcome.reference.clone(),
            curves: outcome.curves.clone(),
            thresholds: outcome.thresholds.clone(),
            window: WindowListing {
                ratios,
                window_sizes,
            },
        }
    }
}

/// Flagged count and centroid of one configuration for a list of per-cycle
/// frequency thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweepReport {
    pub ratio: u32,
    pub window: usize,
    pub thresholds: Vec<f64>,
    /// Positions with `frequency >= threshold`, across samples.
    pub above: Vec<AboveCount>,
    /// Centroid of those positions; `null` where no sample flags any.
    pub centroid: Vec<Option<CentroidSummary>>,
}

// ---------------------------------------------------------------------------
// Trajectory analysis
// ---------------------------------------------------------------------------

/// Per-sample above-count statistics at one window placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Cycle at which the window closes.
    pub cycle: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl TrajectoryPoint {
    /// Summarize a frame; `None` for a frame without samples.
    pub fn from_frame(frame: &WindowFrame) -> Option<Self> {
        let s = frame.summary()?;
        Some(Self {
            cycle: frame.cycle(),
            mean: s.mean,
            std: s.std,
            min: s.min,
            max: s.max,
        })
    }
}

/// Detection signal of one ratio over every placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryCurve {
    pub ratio: u32,
    pub window: usize,
    pub threshold: f64,
    pub points: Vec<TrajectoryPoint>,
}

/// First-crossing placement of each sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub ratio: u32,
    pub window: usize,
    pub nth: usize,
    /// Number of placements; the latency of an undetected sample.
    pub placements: usize,
    pub latencies: Vec<usize>,
    /// Samples that never crossed `nth`.
    pub undetected: usize,
    /// Statistics over detected samples only.
    pub detected: Option<Summary>,
}

impl LatencyReport {
    pub fn new(ratio: u32, window: usize, nth: usize, placements: usize, latencies: Vec<usize>) -> Self {
        let hits: Vec<f64> = latencies
            .iter()
            .filter(|&&l| l < placements)
            .map(|&l| l as f64)
            .collect();
        Self {
            ratio,
            window,
            nth,
            placements,
            undetected: latencies.len() - hits.len(),
            detected: Summary::from_slice(&hits),
            latencies,
        }
    }
}

/// Localization error of every sample at one placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionErrorPoint {
    pub cycle: usize,
    /// Samples with a defined error.
    pub samples: usize,
    /// `None` before any sample is detected.
    pub error: Option<Summary>,
    /// Per-sample distance, `null` before that sample's detection or when
    /// nothing is flagged.
    pub errors: Vec<Option<f64>>,
}

impl PositionErrorPoint {
    /// Summarize the per-sample errors of the frame closing at `cycle`.
    pub fn new(cycle: usize, errors: Vec<Option<f64>>) -> Self {
        Self {
            cycle,
            samples: errors.iter().flatten().count(),
            error: summarize_errors(&errors),
            errors,
        }
    }
}

/// Localization error of one ratio over every placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionErrorReport {
    pub ratio: u32,
    pub window: usize,
    pub localization: Localization,
    pub anomaly_centroid: (f64, f64),
    pub points: Vec<PositionErrorPoint>,
}

/// Write `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AnomalyError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| AnomalyError::io(path, e))
}
