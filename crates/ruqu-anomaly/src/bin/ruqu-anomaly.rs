//! `ruqu-anomaly` binary: window search and trajectory analysis.
//!
//! # Usage
//!
//! ```bash
//! ruqu-anomaly --data-dir ./runs window-search
//! ruqu-anomaly --data-dir ./runs latency --nth 10
//! ruqu-anomaly --data-dir ./runs threshold-sweep --window 100 --ratio 10 --thresholds 0.01,0.02,0.05
//! ruqu-anomaly --config engine.json all
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ruqu_anomaly::pipeline::{Analyses, TrajectoryResults};
use ruqu_anomaly::{Engine, EngineConfig, Localization};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ruqu-anomaly",
    version,
    about = "Window calibration and trajectory analysis for syndrome anomaly detection",
    long_about = None
)]
struct Args {
    /// Path to a JSON engine configuration. Defaults are used otherwise.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the data directory from the config.
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the minimal window per ratio and write the calibration table.
    WindowSearch,
    /// Above-threshold count curves of every trajectory.
    Trajectory,
    /// First-crossing detection latency per sample.
    Latency {
        /// Flagged-count threshold for a detection.
        #[arg(long)]
        nth: Option<usize>,
    },
    /// Distance between the flagged-set centre and the anomaly.
    PositionError {
        /// Flagged-count threshold for a detection.
        #[arg(long)]
        nth: Option<usize>,
        /// Centre estimator (median or mean).
        #[arg(long)]
        localization: Option<Localization>,
    },
    /// Flagged count and centroid of one sweep configuration over a list of
    /// per-cycle frequency thresholds.
    ThresholdSweep {
        /// Window length of the configuration.
        #[arg(long)]
        window: usize,
        /// Anomaly ratio of the configuration.
        #[arg(long)]
        ratio: u32,
        /// Comma-separated frequency thresholds.
        #[arg(long, value_delimiter = ',', required = true)]
        thresholds: Vec<f64>,
    },
    /// Window search followed by all trajectory analyses.
    All,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("ruqu-anomaly v{}", ruqu_anomaly::VERSION);

    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_json(path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    match &args.command {
        Command::Latency { nth } => {
            if let Some(nth) = nth {
                config.nth = *nth;
            }
        }
        Command::PositionError { nth, localization } => {
            if let Some(nth) = nth {
                config.nth = *nth;
            }
            if let Some(mode) = localization {
                config.localization = *mode;
            }
        }
        _ => {}
    }

    let engine = Engine::new(config).context("invalid engine configuration")?;
    let result_dir = engine.config().result_path();

    match args.command {
        Command::WindowSearch => {
            let outcome = engine.run_window_search().context("window search failed")?;
            for (ratio, choice) in outcome.table.iter() {
                match choice {
                    Some(c) => info!("ratio {ratio}: window {} threshold {}", c.window, c.threshold),
                    None => info!("ratio {ratio}: no viable window"),
                }
            }
        }
        Command::Trajectory => {
            let results = engine
                .run_analyses(Analyses::trajectory())
                .context("trajectory analysis failed")?;
            log_results(&results);
        }
        Command::Latency { .. } => {
            let results = engine
                .run_analyses(Analyses::latency())
                .context("latency analysis failed")?;
            log_results(&results);
        }
        Command::PositionError { .. } => {
            let results = engine
                .run_analyses(Analyses::position_error())
                .context("position-error analysis failed")?;
            log_results(&results);
        }
        Command::ThresholdSweep {
            window,
            ratio,
            thresholds,
        } => {
            let report = engine
                .run_threshold_sweep(window, ratio, &thresholds)
                .context("threshold sweep failed")?;
            for (t, above) in report.thresholds.iter().zip(&report.above) {
                info!("threshold {t}: {:.2} ± {:.2} positions", above.mean, above.std);
            }
        }
        Command::All => {
            let (_, results) = engine.run_all().context("pipeline failed")?;
            log_results(&results);
        }
    }

    info!("Results in {}", result_dir.display());
    Ok(())
}

fn log_results(results: &TrajectoryResults) {
    if let Some(curves) = &results.trajectory {
        info!("Trajectory curves for {} ratios", curves.len());
    }
    if let Some(latency) = &results.latency {
        for (ratio, report) in latency {
            match report.detected {
                Some(s) => info!(
                    "ratio {ratio}: mean latency {:.1} placements ({} undetected)",
                    s.mean, report.undetected
                ),
                None => info!("ratio {ratio}: no sample detected"),
            }
        }
    }
    if let Some(errors) = &results.position_error {
        info!("Position errors for {} ratios", errors.len());
    }
}
