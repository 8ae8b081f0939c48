//! Typed configuration and position keys.
//!
//! Raw inputs encode their configuration in the file name
//! (`result_ratio<ratio>_cycle<window>.txt`). [`ConfigKey`] parses and formats
//! that convention at the boundary so no other module handles the string form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::{AnomalyError, Result};

const PREFIX: &str = "result_ratio";
const CYCLE_TAG: &str = "_cycle";
const SUFFIX: &str = ".txt";

// ---------------------------------------------------------------------------
// ConfigKey
// ---------------------------------------------------------------------------

/// One point of the sweep: an anomaly ratio observed through a window length.
///
/// Ordering is by ratio, then window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Anomalous-to-normal error-rate ratio (1 = reference).
    pub ratio: u32,
    /// Window length in measurement cycles.
    pub window: usize,
}

impl ConfigKey {
    /// Create a key. `window` must be non-zero.
    pub fn new(window: usize, ratio: u32) -> Result<Self> {
        if window == 0 {
            return Err(AnomalyError::InvalidKey(format!(
                "window must be > 0 (ratio {ratio})"
            )));
        }
        Ok(Self { ratio, window })
    }

    /// File name of the raw input for this key.
    pub fn file_name(&self) -> String {
        format!("{PREFIX}{}{CYCLE_TAG}{}{SUFFIX}", self.ratio, self.window)
    }

    /// Parse a bare file name or a path following the naming convention.
    ///
    /// ```rust
    /// use ruqu_anomaly::key::ConfigKey;
    ///
    /// let key = ConfigKey::parse("data/result_ratio10_cycle2000.txt").unwrap();
    /// assert_eq!((key.ratio, key.window), (10, 2000));
    /// assert!(ConfigKey::parse("notes.txt").is_err());
    /// ```
    pub fn parse(name: &str) -> Result<Self> {
        let file = Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| AnomalyError::InvalidKey(name.to_string()))?;

        let invalid = || AnomalyError::InvalidKey(file.to_string());
        let body = file
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(SUFFIX))
            .ok_or_else(invalid)?;
        let (ratio, window) = body.split_once(CYCLE_TAG).ok_or_else(invalid)?;
        let ratio: u32 = parse_digits(ratio).ok_or_else(invalid)?;
        let window: usize = parse_digits(window).ok_or_else(invalid)?;
        Self::new(window, ratio)
    }

    /// `true` when this key is the reference (no-anomaly) condition.
    pub fn is_reference(&self, reference_ratio: u32) -> bool {
        self.ratio == reference_ratio
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ratio={} window={}", self.ratio, self.window)
    }
}

impl FromStr for ConfigKey {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Digits only; rejects signs and whitespace that `str::parse` would accept.
fn parse_digits<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// List the sorted, de-duplicated windows and ratios present in `folder`.
///
/// Files that do not follow the naming convention are ignored.
pub fn discover_sweep(folder: &Path) -> Result<(Vec<usize>, Vec<u32>)> {
    if !folder.is_dir() {
        return Err(AnomalyError::not_found(folder, "sweep folder does not exist"));
    }
    let entries = std::fs::read_dir(folder).map_err(|e| AnomalyError::io(folder, e))?;

    let mut windows = Vec::new();
    let mut ratios = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| AnomalyError::io(folder, e))?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match ConfigKey::parse(name) {
            Ok(key) => {
                windows.push(key.window);
                ratios.push(key.ratio);
            }
            Err(_) => debug!("Ignoring {} (not a sweep file)", path.display()),
        }
    }
    windows.sort_unstable();
    windows.dedup();
    ratios.sort_unstable();
    ratios.dedup();
    Ok((windows, ratios))
}

// ---------------------------------------------------------------------------
// PositionKey
// ---------------------------------------------------------------------------

/// Stabilizer family of a syndrome position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StabilizerKind {
    /// X-type stabilizer.
    X,
    /// Z-type stabilizer.
    Z,
}

impl StabilizerKind {
    /// Polarity index used by trajectory tensors (X = 0, Z = 1).
    pub fn polarity(self) -> usize {
        match self {
            StabilizerKind::X => 0,
            StabilizerKind::Z => 1,
        }
    }
}

impl fmt::Display for StabilizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilizerKind::X => f.write_str("X"),
            StabilizerKind::Z => f.write_str("Z"),
        }
    }
}

impl FromStr for StabilizerKind {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "X" | "x" => Ok(StabilizerKind::X),
            "Z" | "z" => Ok(StabilizerKind::Z),
            other => Err(AnomalyError::InvalidKey(format!(
                "unknown stabilizer type `{other}`"
            ))),
        }
    }
}

/// A measurement site. Only stable within one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    /// Stabilizer family.
    pub kind: StabilizerKind,
    /// Lattice x coordinate.
    pub x: i32,
    /// Lattice y coordinate.
    pub y: i32,
}

impl PositionKey {
    /// Create a position key.
    pub fn new(kind: StabilizerKind, x: i32, y: i32) -> Self {
        Self { kind, x, y }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.kind, self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_name_follows_convention() {
        let key = ConfigKey::new(120, 30).unwrap();
        assert_eq!(key.file_name(), "result_ratio30_cycle120.txt");
        assert_eq!(ConfigKey::parse(&key.file_name()).unwrap(), key);
    }

    #[test]
    fn parse_accepts_paths() {
        let key: ConfigKey = "./data_trajectory/result_ratio70_cycle2000.txt".parse().unwrap();
        assert_eq!(key.ratio, 70);
        assert_eq!(key.window, 2000);
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in [
            "result_ratio_cycle10.txt",
            "result_ratio1_cycle.txt",
            "result_ratio1_cycle10.pkl",
            "result_ratio-1_cycle10.txt",
            "result_ratio1_cycle 10.txt",
            "output_ratio1_cycle10.txt",
        ] {
            assert!(ConfigKey::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn zero_window_is_invalid() {
        assert!(ConfigKey::new(0, 1).is_err());
        assert!(ConfigKey::parse("result_ratio1_cycle0.txt").is_err());
    }

    #[test]
    fn discover_sweep_sorts_and_dedups() {
        let tmp = tempdir().unwrap();
        for (ratio, window) in [(10, 30), (1, 10), (1, 30), (10, 10), (1, 20)] {
            let key = ConfigKey::new(window, ratio).unwrap();
            std::fs::write(tmp.path().join(key.file_name()), "").unwrap();
        }
        std::fs::write(tmp.path().join("README.md"), "").unwrap();

        let (windows, ratios) = discover_sweep(tmp.path()).unwrap();
        assert_eq!(windows, vec![10, 20, 30]);
        assert_eq!(ratios, vec![1, 10]);
    }

    #[test]
    fn discover_missing_folder_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = discover_sweep(&tmp.path().join("absent")).unwrap_err();
        assert!(err.is_per_configuration());
    }

    #[test]
    fn stabilizer_kind_round_trip() {
        assert_eq!("X".parse::<StabilizerKind>().unwrap(), StabilizerKind::X);
        assert_eq!("Z".parse::<StabilizerKind>().unwrap(), StabilizerKind::Z);
        assert!("Y".parse::<StabilizerKind>().is_err());
        assert_eq!(StabilizerKind::Z.polarity(), 1);
        assert_eq!(PositionKey::new(StabilizerKind::X, 3, 4).to_string(), "X(3, 4)");
    }
}
