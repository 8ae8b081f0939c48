//! Minimal-window search and the persisted calibration table.
//!
//! For every window length (ascending) the reference threshold and the
//! reference above-threshold count are computed once. Each anomalous ratio
//! then scans the same windows and accepts the first one where
//!
//! ```text
//! 1 − above(w) / total_positions       < bound   (missed anomaly)
//! above_ref(w) / total_positions       < bound   (false positive)
//! ```
//!
//! Scanning stops at the first accepted window; later windows are never
//! considered for that ratio. A ratio with no accepted window is recorded as
//! `None` in the [`CalibrationTable`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::calibrate::Calibrator;
use crate::error::{AnomalyError, Result};

// ---------------------------------------------------------------------------
// CalibrationTable
// ---------------------------------------------------------------------------

/// Window length and threshold selected for one ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowChoice {
    pub window: usize,
    pub threshold: f64,
}

/// `ratio -> Option<WindowChoice>`; `None` means no window in the searched
/// range satisfied both bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    entries: BTreeMap<u32, Option<WindowChoice>>,
}

impl CalibrationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for `ratio`, replacing any previous entry.
    pub fn insert(&mut self, ratio: u32, choice: Option<WindowChoice>) {
        self.entries.insert(ratio, choice);
    }

    /// Outcome for `ratio`: `None` if the ratio was never searched,
    /// `Some(None)` if it was searched without success.
    pub fn get(&self, ratio: u32) -> Option<Option<WindowChoice>> {
        self.entries.get(&ratio).copied()
    }

    /// Ratios in ascending order.
    pub fn ratios(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Entries in ascending ratio order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<WindowChoice>)> + '_ {
        self.entries.iter().map(|(&r, &c)| (r, c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per ratio: `<ratio> <window> <threshold>`, or
    /// `<ratio> None None` for an unsatisfied ratio.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (ratio, choice) in self.iter() {
            let line = match choice {
                Some(c) => format!("{ratio} {} {}\n", c.window, c.threshold),
                None => format!("{ratio} None None\n"),
            };
            out.push_str(&line);
        }
        out
    }

    /// Parse the text form; `source` is used in error messages only.
    pub fn parse_text(text: &str, source: &Path) -> Result<Self> {
        let mut table = Self::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let &[ratio, window, threshold] = fields.as_slice() else {
                return Err(AnomalyError::parse(
                    source,
                    line_no,
                    format!("expected `<ratio> <window> <threshold>`, got {} fields", fields.len()),
                ));
            };
            let ratio: u32 = ratio
                .parse()
                .map_err(|_| AnomalyError::parse(source, line_no, format!("bad ratio `{ratio}`")))?;
            let choice = match (window, threshold) {
                ("None", "None") => None,
                (w, t) => {
                    let window: usize = w.parse().ok().filter(|&w| w > 0).ok_or_else(|| {
                        AnomalyError::parse(source, line_no, format!("bad window `{w}`"))
                    })?;
                    let threshold: f64 = t.parse().map_err(|_| {
                        AnomalyError::parse(source, line_no, format!("bad threshold `{t}`"))
                    })?;
                    Some(WindowChoice { window, threshold })
                }
            };
            table.insert(ratio, choice);
        }
        Ok(table)
    }

    /// Write the text form to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AnomalyError::io(parent, e))?;
        }
        std::fs::write(path, self.to_text()).map_err(|e| AnomalyError::io(path, e))
    }

    /// Read a table written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AnomalyError::not_found(path, "calibration table missing; run the window search first")
            }
            _ => AnomalyError::io(path, e),
        })?;
        Self::parse_text(&text, path)
    }
}

// ---------------------------------------------------------------------------
// Search outcome
// ---------------------------------------------------------------------------

/// Above-threshold count of one ratio over the windows that were scanned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionCurve {
    pub ratio: u32,
    pub windows: Vec<usize>,
    pub above_count: Vec<f64>,
    pub above_count_std: Vec<f64>,
}

impl DetectionCurve {
    fn new(ratio: u32) -> Self {
        Self {
            ratio,
            ..Self::default()
        }
    }

    fn push(&mut self, window: usize, mean: f64, std: f64) {
        self.windows.push(window);
        self.above_count.push(mean);
        self.above_count_std.push(std);
    }
}

/// Everything the window search computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Selected window per anomalous ratio.
    pub table: CalibrationTable,
    /// Reference threshold per window length.
    pub thresholds: BTreeMap<usize, f64>,
    /// False-positive curve of the reference ratio.
    pub reference: DetectionCurve,
    /// Detection curve of each anomalous ratio, up to its accepted window.
    pub curves: BTreeMap<u32, DetectionCurve>,
}

// ---------------------------------------------------------------------------
// WindowSearch
// ---------------------------------------------------------------------------

/// Runs the minimal-window search over one sweep dataset.
#[derive(Debug)]
pub struct WindowSearch<'a> {
    calibrator: &'a Calibrator,
    config_id: String,
    confidence: f64,
}

impl<'a> WindowSearch<'a> {
    /// Search over `config_id`, calibrating thresholds at `confidence`.
    pub fn new(calibrator: &'a Calibrator, config_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            calibrator,
            config_id: config_id.into(),
            confidence,
        }
    }

    /// Select the minimal window per ratio.
    ///
    /// Configurations whose raw file is missing are skipped with a warning.
    /// Shape and statistics errors abort the search.
    #[instrument(skip(self, ratios, windows), fields(config_id = %self.config_id))]
    pub fn find_required_windows(
        &self,
        ratios: &[u32],
        windows: &[usize],
        total_positions: usize,
        confidence_bound: f64,
    ) -> Result<SearchOutcome> {
        if total_positions == 0 {
            return Err(AnomalyError::InsufficientData(
                "total_positions must be > 0".into(),
            ));
        }
        let total = total_positions as f64;
        let mut windows = windows.to_vec();
        windows.sort_unstable();
        windows.dedup();

        let reference_ratio = self.calibrator.reference_ratio();
        let mut thresholds = BTreeMap::new();
        let mut reference = DetectionCurve::new(reference_ratio);
        let mut reference_rate = BTreeMap::new();

        for &window in &windows {
            let calibrated = match self.skip_missing(
                self.calibrator
                    .calibrate_threshold(&self.config_id, window, self.confidence),
            )? {
                Some(c) => c,
                None => continue,
            };
            let above = match self.skip_missing(self.calibrator.count_above(
                &self.config_id,
                window,
                reference_ratio,
                calibrated.threshold,
            ))? {
                Some(a) => a,
                None => continue,
            };
            info!(
                "ratio={reference_ratio} window={window} -> threshold {} and above count {}",
                calibrated.threshold, above.mean
            );
            thresholds.insert(window, calibrated.threshold);
            reference.push(window, above.mean, above.std);
            reference_rate.insert(window, above.mean / total);
        }

        let mut table = CalibrationTable::new();
        let mut curves = BTreeMap::new();
        let mut seen = Vec::new();
        for &ratio in ratios {
            if ratio == reference_ratio || seen.contains(&ratio) {
                continue;
            }
            seen.push(ratio);

            let mut curve = DetectionCurve::new(ratio);
            let mut choice = None;
            for (&window, &threshold) in &thresholds {
                let above = match self.skip_missing(self.calibrator.count_above(
                    &self.config_id,
                    window,
                    ratio,
                    threshold,
                ))? {
                    Some(a) => a,
                    None => continue,
                };
                curve.push(window, above.mean, above.std);

                let missed = 1.0 - above.mean / total;
                let false_positive = reference_rate.get(&window).copied().unwrap_or(1.0);
                debug!(
                    "ratio={ratio} window={window} threshold={threshold} missed={missed} false_positive={false_positive}"
                );
                if missed < confidence_bound && false_positive < confidence_bound {
                    info!("ratio={ratio}: accepted window {window} (threshold {threshold})");
                    choice = Some(WindowChoice { window, threshold });
                    break;
                }
            }
            if choice.is_none() {
                warn!("ratio={ratio}: no window in range satisfies both bounds");
            }
            table.insert(ratio, choice);
            curves.insert(ratio, curve);
        }

        Ok(SearchOutcome {
            table,
            thresholds,
            reference,
            curves,
        })
    }

    /// Turn a per-configuration failure into a skip.
    fn skip_missing<T>(&self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_per_configuration() => {
                warn!("Skipping configuration: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
