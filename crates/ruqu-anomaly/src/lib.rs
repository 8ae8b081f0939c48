//! # ruqu-anomaly
//!
//! Calibration and trajectory analysis for a streaming syndrome-activity
//! anomaly detector.
//!
//! Raw experiment output is a per-position, per-sample event count
//! accumulated over a window of measurement cycles. This crate turns those
//! counts into CLT-calibrated thresholds, searches for the minimal window that
//! bounds both false-positive and missed-anomaly rates per anomaly ratio, and
//! replays long traces through a sliding window to measure detection latency
//! and localization error.
//!
//! ## Architecture
//!
//! ```text
//! ContentStore ──► MatrixBuilder ──► Calibrator ──► WindowSearch ──► CalibrationTable
//!      │                │                                                 │
//!      └──── CacheStore (FileCache | MemoryCache) ────┐                    │
//!                                                     │                    ▼
//!                                  TraceLoader ──► scan_trajectory ──► extract / report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ruqu_anomaly::{Engine, EngineConfig};
//! use ruqu_anomaly::pipeline::Analyses;
//!
//! let config = EngineConfig::default();
//! let engine = Engine::new(config).unwrap();
//!
//! let outcome = engine.run_window_search().unwrap();
//! for (ratio, choice) in outcome.table.iter() {
//!     println!("ratio {ratio}: {choice:?}");
//! }
//!
//! let results = engine.run_analyses(Analyses::latency()).unwrap();
//! println!("{:?}", results.latency);
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![cfg_attr(test, deny(unsafe_code))]

pub mod cache;
pub mod calibrate;
pub mod config;
pub mod content;
pub mod error;
pub mod extract;
pub mod key;
pub mod matrix;
pub mod pipeline;
pub mod report;
pub mod scan;
pub mod search;
pub mod stats;
pub mod trajectory;

// Convenient re-exports at the crate root.
pub use cache::{CacheExt, CacheKey, CacheStore, FileCache, MemoryCache};
pub use calibrate::{AboveCount, CalibratedThreshold, Calibrator};
pub use config::EngineConfig;
pub use content::{ActivityRecords, ActivitySample, ContentStore};
pub use error::{AnomalyError, ConfigError, Result};
pub use extract::{detection_latencies, first_crossing, position_error, Localization};
pub use key::{discover_sweep, ConfigKey, PositionKey, StabilizerKind};
pub use matrix::{ActivityMatrix, MatrixBuilder};
pub use pipeline::Engine;
pub use scan::{scan_trajectory, TrajectoryScan, WindowFrame};
pub use search::{CalibrationTable, SearchOutcome, WindowChoice, WindowSearch};
pub use trajectory::{PositionTable, TraceLoader, TrajectoryTrace};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
