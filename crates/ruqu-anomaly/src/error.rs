//! Error types for the ruqu-anomaly calibration engine.
//!
//! Every module returns [`AnomalyError`] through the crate-wide [`Result`]
//! alias. Configuration loading has its own [`ConfigError`] which coerces into
//! [`AnomalyError::Config`].
//!
//! ## Hierarchy
//!
//! ```text
//! AnomalyError
//! ├── NotFound          (missing raw / cache input for one configuration)
//! ├── Shape             (inconsistent sample / position / cycle counts)
//! ├── InsufficientData  (degenerate statistics input)
//! ├── Parse / InvalidKey
//! ├── Config(ConfigError)
//! └── Io / Serialization
//! ```
//!
//! A window length that satisfies no bound is not an error: it is a `None`
//! entry in the [`CalibrationTable`](crate::search::CalibrationTable).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ruqu-anomaly operations.
pub type Result<T> = std::result::Result<T, AnomalyError>;

/// Main error type for ruqu-anomaly operations.
#[derive(Error, Debug)]
pub enum AnomalyError {
    // ═══════════════════════════════════════════════════════════════════════
    // Per-configuration errors
    // ═══════════════════════════════════════════════════════════════════════
    /// A raw count file, trajectory file or position table is missing.
    #[error("Not found: `{path}`: {message}")]
    NotFound {
        /// Path that was expected to exist.
        path: PathBuf,
        /// Additional context.
        message: String,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Aggregate / statistical errors
    // ═══════════════════════════════════════════════════════════════════════
    /// Sample, position or cycle counts disagree with the declared shape.
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    Shape {
        /// What was being shaped.
        context: String,
        /// Expected shape description.
        expected: String,
        /// Observed shape description.
        actual: String,
    },

    /// Statistics were requested over an empty population.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    // ═══════════════════════════════════════════════════════════════════════
    // Input errors
    // ═══════════════════════════════════════════════════════════════════════
    /// A line of a flat input file could not be parsed.
    #[error("Parse error in `{path}` line {line}: {message}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A configuration key or file name does not follow the naming convention.
    #[error("Invalid configuration key: {0}")]
    InvalidKey(String),

    /// Engine configuration failed validation or loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ═══════════════════════════════════════════════════════════════════════
    // General errors
    // ═══════════════════════════════════════════════════════════════════════
    /// Low-level I/O failure with path context.
    #[error("I/O error at `{path}`: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding of a persisted artifact failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AnomalyError {
    /// Construct an [`AnomalyError::NotFound`].
    pub fn not_found<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        AnomalyError::NotFound {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Construct an [`AnomalyError::Shape`].
    pub fn shape(
        context: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        AnomalyError::Shape {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Construct an [`AnomalyError::Parse`].
    pub fn parse<S: Into<String>>(path: impl Into<PathBuf>, line: usize, msg: S) -> Self {
        AnomalyError::Parse {
            path: path.into(),
            line,
            message: msg.into(),
        }
    }

    /// Construct an [`AnomalyError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnomalyError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if the error is isolated to a single configuration.
    ///
    /// Sweeps skip such configurations and continue with the next one.
    pub fn is_per_configuration(&self) -> bool {
        matches!(self, AnomalyError::NotFound { .. })
    }

    /// Check if the error indicates corrupted or mismatched upstream data.
    pub fn is_data_corruption(&self) -> bool {
        matches!(self, AnomalyError::Shape { .. } | AnomalyError::Parse { .. })
    }
}

impl From<serde_json::Error> for AnomalyError {
    fn from(err: serde_json::Error) -> Self {
        AnomalyError::Serialization(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating an
/// [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read or written.
    #[error("Cannot access config file `{path}`: {source}")]
    FileAccess {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
