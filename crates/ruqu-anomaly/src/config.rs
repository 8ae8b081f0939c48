//! Engine configuration.
//!
//! [`EngineConfig`] holds every path, statistical constant and lattice size
//! used by the window search and the trajectory analysis. It is serializable
//! via [`serde`] so a sweep can be reproduced from a JSON file.
//!
//! # Example
//!
//! ```rust
//! use ruqu_anomaly::config::EngineConfig;
//!
//! let cfg = EngineConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.total_positions(), 840);
//! assert_eq!(cfg.positions_per_polarity(), 420);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::extract::Localization;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a calibration sweep and trajectory analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------
    /// Root directory holding the count-file folders and the trajectory folder.
    pub data_dir: PathBuf,

    /// Folder (under `data_dir`) of the window-search sweep. Also used as the
    /// config_id of every cache entry derived from it.
    /// Default: **`data_allanomaly`**.
    pub dataset: String,

    /// Folder (under `data_dir`) of the long trajectory traces.
    /// Default: **`data_trajectory`**.
    pub trajectory_dir: String,

    /// Directory of the opaque binary caches. Relative paths are taken
    /// from `data_dir`.
    pub cache_dir: PathBuf,

    /// Directory receiving the calibration table and result artifacts.
    /// Relative paths are taken from `data_dir`.
    pub result_dir: PathBuf,

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------
    /// Confidence level of the CLT bound. Default: **0.99**.
    pub confidence: f64,

    /// Allowed false-positive and false-negative rate. Default: **1e-2**.
    pub allowed_rate: f64,

    /// Ratio of the reference (no-anomaly) condition. Default: **1**.
    pub reference_ratio: u32,

    // -----------------------------------------------------------------------
    // Lattice
    // -----------------------------------------------------------------------
    /// Surface-code distance `d`. Default: **21**.
    pub code_distance: usize,

    /// Number of samples stored in each trajectory file. Default: **100**.
    pub trajectory_samples: usize,

    /// Cycle layer of the `.pos` table that describes the anomaly region.
    /// Default: **500**.
    pub anomaly_layer: usize,

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------
    /// Flagged-position count that must be exceeded to declare a detection.
    /// Default: **20**.
    pub nth: usize,

    /// Estimator of the flagged-set centre. Default: **median**.
    pub localization: Localization,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("."),
            dataset: "data_allanomaly".to_string(),
            trajectory_dir: "data_trajectory".to_string(),
            cache_dir: PathBuf::from("cache"),
            result_dir: PathBuf::from("result"),
            confidence: 0.99,
            allowed_rate: 1e-2,
            reference_ratio: 1,
            code_distance: 21,
            trajectory_samples: 100,
            anomaly_layer: 500,
            nth: 20,
            localization: Localization::Median,
        }
    }
}

impl EngineConfig {
    /// Load an [`EngineConfig`] from a JSON file at `path` and validate it.
    ///
    /// Missing fields take their default values.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: EngineConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON at `path`,
    /// creating parent directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileAccess {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Syndrome positions per stabilizer family: `d·(d−1)`.
    pub fn positions_per_polarity(&self) -> usize {
        self.code_distance * self.code_distance.saturating_sub(1)
    }

    /// Syndrome positions of both families: `2·d·(d−1)`.
    pub fn total_positions(&self) -> usize {
        2 * self.positions_per_polarity()
    }

    /// Folder holding the window-search count files.
    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join(&self.dataset)
    }

    /// Folder holding the trajectory traces.
    pub fn trajectory_path(&self) -> PathBuf {
        self.data_dir.join(&self.trajectory_dir)
    }

    /// Resolved cache directory.
    pub fn cache_path(&self) -> PathBuf {
        self.resolve(&self.cache_dir)
    }

    /// Resolved result directory.
    pub fn result_path(&self) -> PathBuf {
        self.resolve(&self.result_dir)
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.data_dir.join(dir)
        }
    }

    /// Validate all fields and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.trim().is_empty() {
            return Err(ConfigError::invalid_value("dataset", "must not be empty"));
        }
        if self.trajectory_dir.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "trajectory_dir",
                "must not be empty",
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::invalid_value(
                "confidence",
                "must be in (0.0, 1.0)",
            ));
        }
        if !(self.allowed_rate > 0.0 && self.allowed_rate < 1.0) {
            return Err(ConfigError::invalid_value(
                "allowed_rate",
                "must be in (0.0, 1.0)",
            ));
        }
        if self.code_distance < 2 {
            return Err(ConfigError::invalid_value("code_distance", "must be >= 2"));
        }
        if self.trajectory_samples == 0 {
            return Err(ConfigError::invalid_value(
                "trajectory_samples",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
