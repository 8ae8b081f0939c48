//! End-to-end engine: window search, then trajectory replay.
//!
//! [`Engine`] wires the content store, matrix builder, calibrator and trace
//! loader around one injected [`CacheStore`]. The window search writes the
//! calibration table; the trajectory stages read it back, so they can run in
//! a later process.
//!
//! A single scan per trace feeds all trajectory analyses at once.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, FileCache};
use crate::calibrate::Calibrator;
use crate::config::EngineConfig;
use crate::content::ContentStore;
use crate::error::{AnomalyError, Result};
use crate::extract::{frame_position_errors, LatencyTracker};
use crate::key::{discover_sweep, ConfigKey};
use crate::matrix::MatrixBuilder;
use crate::report::{
    threshold_sweep_file, write_json, LatencyReport, PerformanceReport, PositionErrorPoint,
    PositionErrorReport, ThresholdSweepReport, TrajectoryCurve, TrajectoryPoint, LATENCY_FILE,
    PERFORMANCE_FILE, POSITION_ERROR_FILE, TRAJECTORY_FILE, WINDOW_SIZE_FILE,
};
use crate::scan::scan_trajectory;
use crate::search::{CalibrationTable, SearchOutcome, WindowChoice, WindowSearch};
use crate::trajectory::{PositionTable, TraceLoader};

/// Trajectory analyses to compute in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Analyses {
    pub trajectory: bool,
    pub latency: bool,
    pub position_error: bool,
}

impl Analyses {
    pub fn all() -> Self {
        Self {
            trajectory: true,
            latency: true,
            position_error: true,
        }
    }

    pub fn trajectory() -> Self {
        Self {
            trajectory: true,
            latency: false,
            position_error: false,
        }
    }

    pub fn latency() -> Self {
        Self {
            trajectory: false,
            latency: true,
            position_error: false,
        }
    }

    pub fn position_error() -> Self {
        Self {
            trajectory: false,
            latency: false,
            position_error: true,
        }
    }
}

/// Per-ratio results of the enabled analyses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryResults {
    pub trajectory: Option<BTreeMap<u32, TrajectoryCurve>>,
    pub latency: Option<BTreeMap<u32, LatencyReport>>,
    pub position_error: Option<BTreeMap<u32, PositionErrorReport>>,
}

/// Calibration and trajectory-analysis engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    calibrator: Calibrator,
    traces: TraceLoader,
    positions: OnceCell<PositionTable>,
}

impl Engine {
    /// Engine with a [`FileCache`] under the configured cache directory.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let cache = Arc::new(FileCache::new(config.cache_path()));
        Self::with_cache(config, cache)
    }

    /// Engine over an injected cache.
    pub fn with_cache(config: EngineConfig, cache: Arc<dyn CacheStore>) -> Result<Self> {
        config.validate()?;
        let content = ContentStore::new(config.data_dir.clone(), cache.clone(), config.confidence);
        let matrices = MatrixBuilder::new(content, cache.clone());
        let calibrator = Calibrator::new(matrices, config.reference_ratio);
        let traces = TraceLoader::new(
            cache,
            config.trajectory_samples,
            config.positions_per_polarity(),
        );
        Ok(Self {
            config,
            calibrator,
            traces,
            positions: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    fn result_file(&self, name: &str) -> PathBuf {
        self.config.result_path().join(name)
    }

    // -----------------------------------------------------------------------
    // Window search
    // -----------------------------------------------------------------------

    /// Search the sweep dataset and persist the table and performance curves.
    #[instrument(skip(self), fields(dataset = %self.config.dataset))]
    pub fn run_window_search(&self) -> Result<SearchOutcome> {
        let (windows, ratios) = discover_sweep(&self.config.dataset_path())?;
        info!(
            "Sweep has {} windows and {} ratios",
            windows.len(),
            ratios.len()
        );
        let outcome = WindowSearch::new(&self.calibrator, &self.config.dataset, self.config.confidence)
            .find_required_windows(
                &ratios,
                &windows,
                self.config.total_positions(),
                self.config.allowed_rate,
            )?;

        let table_path = self.result_file(WINDOW_SIZE_FILE);
        outcome.table.save(&table_path)?;
        write_json(
            &self.result_file(PERFORMANCE_FILE),
            &PerformanceReport::from(&outcome),
        )?;
        info!("Calibration table written to {}", table_path.display());
        Ok(outcome)
    }

    /// Above-fraction and centroid curves of one sweep configuration.
    ///
    /// Writes `_result_threshold_sweep_ratio<r>_cycle<w>.json`.
    #[instrument(skip(self, thresholds), fields(dataset = %self.config.dataset))]
    pub fn run_threshold_sweep(
        &self,
        window: usize,
        ratio: u32,
        thresholds: &[f64],
    ) -> Result<ThresholdSweepReport> {
        let dataset = &self.config.dataset;
        let report = ThresholdSweepReport {
            ratio,
            window,
            thresholds: thresholds.to_vec(),
            above: self
                .calibrator
                .above_fraction_curve(dataset, window, ratio, thresholds)?,
            centroid: self
                .calibrator
                .anomaly_centroid_curve(dataset, window, ratio, thresholds)?,
        };
        let path = self.result_file(&threshold_sweep_file(ratio, window));
        write_json(&path, &report)?;
        info!(
            "ratio={ratio} window={window}: {} thresholds written to {}",
            thresholds.len(),
            path.display()
        );
        Ok(report)
    }

    /// Table written by [`run_window_search`](Self::run_window_search).
    pub fn load_calibration_table(&self) -> Result<CalibrationTable> {
        CalibrationTable::load(&self.result_file(WINDOW_SIZE_FILE))
    }

    // -----------------------------------------------------------------------
    // Trajectory inputs
    // -----------------------------------------------------------------------

    /// Trajectory files following the naming convention, sorted by path.
    pub fn trajectory_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.config.trajectory_path();
        if !dir.is_dir() {
            return Err(AnomalyError::not_found(&dir, "trajectory folder does not exist"));
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| AnomalyError::io(&dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| ConfigKey::parse(n).is_ok())
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Position table of the trajectory folder, loaded once.
    ///
    /// Uses the first `*.txt.pos` file in path order.
    pub fn position_table(&self) -> Result<&PositionTable> {
        self.positions.get_or_try_init(|| {
            let dir = self.config.trajectory_path();
            let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        AnomalyError::not_found(&dir, "trajectory folder does not exist")
                    }
                    _ => AnomalyError::io(&dir, e),
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.to_string_lossy().ends_with(".txt.pos"))
                .collect();
            candidates.sort();
            let path = candidates
                .into_iter()
                .next()
                .ok_or_else(|| AnomalyError::not_found(&dir, "no `.txt.pos` position table"))?;
            PositionTable::from_pos_file(
                &path,
                self.config.positions_per_polarity(),
                self.config.anomaly_layer,
            )
        })
    }

    // -----------------------------------------------------------------------
    // Trajectory analyses
    // -----------------------------------------------------------------------

    /// Scan every trajectory once and compute the requested analyses.
    ///
    /// The reference ratio is skipped. Ratios missing from `table`, or with
    /// no viable window, are skipped with a warning.
    #[instrument(skip(self, table))]
    pub fn analyze_trajectories(
        &self,
        table: &CalibrationTable,
        analyses: Analyses,
    ) -> Result<TrajectoryResults> {
        let anomaly = if analyses.position_error {
            let positions = self.position_table()?;
            let centroid = positions.anomaly_centroid().ok_or_else(|| {
                AnomalyError::InsufficientData("position table has no anomalous rows".into())
            })?;
            Some((positions, centroid))
        } else {
            None
        };

        let mut results = TrajectoryResults {
            trajectory: analyses.trajectory.then(BTreeMap::new),
            latency: analyses.latency.then(BTreeMap::new),
            position_error: analyses.position_error.then(BTreeMap::new),
        };

        for path in self.trajectory_files()? {
            let key = ConfigKey::parse(&path.to_string_lossy())?;
            if key.is_reference(self.config.reference_ratio) {
                debug!("Skipping reference trace {}", path.display());
                continue;
            }
            let WindowChoice { window, threshold } = match table.get(key.ratio) {
                Some(Some(choice)) => choice,
                Some(None) => {
                    warn!("ratio={}: no viable window, skipping {}", key.ratio, path.display());
                    continue;
                }
                None => {
                    warn!("ratio={}: not in calibration table, skipping {}", key.ratio, path.display());
                    continue;
                }
            };
            let trace = match self.traces.load(&path) {
                Ok((_, trace)) => trace,
                Err(e) if e.is_per_configuration() => {
                    warn!("Skipping trace: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let scan = scan_trajectory(&trace, window, threshold)?;
            let placements = scan.len();
            let mut tracker = LatencyTracker::new(self.config.nth, trace.shape().samples);
            let mut points = Vec::with_capacity(placements);
            let mut error_points = Vec::new();

            for (index, frame) in scan.enumerate() {
                tracker.observe(&frame);
                if let Some(point) = TrajectoryPoint::from_frame(&frame) {
                    points.push(point);
                }
                if let Some((positions, centroid)) = anomaly {
                    let errors = frame_position_errors(
                        &frame,
                        index,
                        &tracker,
                        positions,
                        centroid,
                        self.config.localization,
                    );
                    error_points.push(PositionErrorPoint::new(frame.cycle(), errors));
                }
            }

            let latencies = tracker.finish();
            let detected = latencies.iter().filter(|&&l| l < placements).count();
            info!(
                "ratio={} window={window}: {placements} placements, {detected}/{} samples detected",
                key.ratio,
                latencies.len()
            );

            let ratio = key.ratio;
            if let Some(map) = results.trajectory.as_mut() {
                if map.contains_key(&ratio) {
                    warn!("ratio={ratio}: several trajectory files, keeping {}", path.display());
                }
                map.insert(
                    ratio,
                    TrajectoryCurve {
                        ratio,
                        window,
                        threshold,
                        points,
                    },
                );
            }
            if let Some(map) = results.latency.as_mut() {
                map.insert(
                    ratio,
                    LatencyReport::new(ratio, window, self.config.nth, placements, latencies),
                );
            }
            if let (Some(map), Some((_, centroid))) = (results.position_error.as_mut(), anomaly) {
                map.insert(
                    ratio,
                    PositionErrorReport {
                        ratio,
                        window,
                        localization: self.config.localization,
                        anomaly_centroid: centroid,
                        points: error_points,
                    },
                );
            }
        }
        Ok(results)
    }

    /// Write the artifacts of every computed analysis.
    pub fn write_results(&self, results: &TrajectoryResults) -> Result<()> {
        if let Some(map) = &results.trajectory {
            write_json(&self.result_file(TRAJECTORY_FILE), map)?;
        }
        if let Some(map) = &results.latency {
            write_json(&self.result_file(LATENCY_FILE), map)?;
        }
        if let Some(map) = &results.position_error {
            write_json(&self.result_file(POSITION_ERROR_FILE), map)?;
        }
        Ok(())
    }

    /// Load the persisted table, analyze, and write the artifacts.
    pub fn run_analyses(&self, analyses: Analyses) -> Result<TrajectoryResults> {
        let table = self.load_calibration_table()?;
        let results = self.analyze_trajectories(&table, analyses)?;
        self.write_results(&results)?;
        Ok(results)
    }

    /// Window search followed by every trajectory analysis.
    pub fn run_all(&self) -> Result<(SearchOutcome, TrajectoryResults)> {
        let outcome = self.run_window_search()?;
        let results = self.analyze_trajectories(&outcome.table, Analyses::all())?;
        self.write_results(&results)?;
        Ok((outcome, results))
    }
}
