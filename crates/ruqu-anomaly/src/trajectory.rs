//! Trajectory traces and the companion position table.
//!
//! A raw trace is a flat list of 0/1 flags reshaped to
//!
//! ```text
//! (sample, polarity = 2, cycle, position)
//! ```
//!
//! The cycle count is derived from the value count and checked at load time,
//! so a truncated or mismatched file fails before any scanning starts.

use ndarray::{Array4, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheExt, CacheKey, CacheStore};
use crate::error::{AnomalyError, Result};
use crate::key::ConfigKey;

/// Cache namespace of converted traces.
pub const TRAJECTORY_NAMESPACE: &str = "trajectory";

/// Stabilizer families per trace.
pub const POLARITIES: usize = 2;

// ---------------------------------------------------------------------------
// TraceShape
// ---------------------------------------------------------------------------

/// Validated dimensions of a trajectory tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceShape {
    pub samples: usize,
    pub polarities: usize,
    pub cycles: usize,
    pub positions: usize,
}

impl TraceShape {
    /// Derive the cycle count from a flat value count.
    ///
    /// # Errors
    ///
    /// [`AnomalyError::Shape`] unless `value_count` is a positive multiple of
    /// `samples · 2 · positions`.
    pub fn infer(value_count: usize, samples: usize, positions: usize) -> Result<Self> {
        let per_cycle = samples * POLARITIES * positions;
        if per_cycle == 0 || value_count == 0 || value_count % per_cycle != 0 {
            return Err(AnomalyError::shape(
                "trajectory trace",
                format!("a positive multiple of {samples}x{POLARITIES}x{positions} values"),
                format!("{value_count} values"),
            ));
        }
        Ok(Self {
            samples,
            polarities: POLARITIES,
            cycles: value_count / per_cycle,
            positions,
        })
    }

    fn dims(&self) -> (usize, usize, usize, usize) {
        (self.samples, self.polarities, self.cycles, self.positions)
    }
}

// ---------------------------------------------------------------------------
// TrajectoryTrace
// ---------------------------------------------------------------------------

/// Per-cycle activity flags of one experiment run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryTrace {
    flags: Array4<u8>,
}

/// Flat on-disk form.
#[derive(Serialize, Deserialize)]
struct StoredTrace {
    shape: TraceShape,
    flags: Vec<u8>,
}

impl TrajectoryTrace {
    /// Reshape flat flags in `(sample, polarity, cycle, position)` order.
    pub fn from_flat(values: Vec<u8>, samples: usize, positions: usize) -> Result<Self> {
        let shape = TraceShape::infer(values.len(), samples, positions)?;
        Self::with_shape(shape, values)
    }

    fn with_shape(shape: TraceShape, values: Vec<u8>) -> Result<Self> {
        let flags = Array4::from_shape_vec(shape.dims(), values)
            .map_err(|e| AnomalyError::shape("trajectory trace", format!("{shape:?}"), e))?;
        Ok(Self { flags })
    }

    /// Wrap an existing tensor; the polarity axis must have length 2.
    pub fn from_array(flags: Array4<u8>) -> Result<Self> {
        if flags.len_of(Axis(1)) != POLARITIES {
            return Err(AnomalyError::shape(
                "trajectory trace polarity axis",
                POLARITIES,
                flags.len_of(Axis(1)),
            ));
        }
        Ok(Self { flags })
    }

    /// Tensor dimensions.
    pub fn shape(&self) -> TraceShape {
        let (samples, polarities, cycles, positions) = self.flags.dim();
        TraceShape {
            samples,
            polarities,
            cycles,
            positions,
        }
    }

    /// Flags of one cycle, shape `(sample, polarity, position)`.
    pub fn cycle(&self, cycle: usize) -> ArrayView3<'_, u8> {
        self.flags.index_axis(Axis(2), cycle)
    }

    /// Full tensor.
    pub fn flags(&self) -> &Array4<u8> {
        &self.flags
    }

    fn to_stored(&self) -> StoredTrace {
        StoredTrace {
            shape: self.shape(),
            flags: self.flags.iter().copied().collect(),
        }
    }
}

/// Parse a whitespace-separated 0/1 trace file.
pub fn parse_trace_file(path: &Path, samples: usize, positions: usize) -> Result<TrajectoryTrace> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnomalyError::not_found(path, "trajectory file missing"),
        _ => AnomalyError::io(path, e),
    })?;
    let mut values = Vec::with_capacity(text.len() / 2);
    for (i, line) in text.lines().enumerate() {
        for token in line.split_whitespace() {
            match token {
                "0" => values.push(0u8),
                "1" => values.push(1u8),
                other => {
                    return Err(AnomalyError::parse(
                        path,
                        i + 1,
                        format!("expected a 0/1 flag, got `{other}`"),
                    ))
                }
            }
        }
    }
    TrajectoryTrace::from_flat(values, samples, positions)
}

/// Loads trajectory files, caching the converted tensor.
#[derive(Debug)]
pub struct TraceLoader {
    cache: Arc<dyn CacheStore>,
    samples: usize,
    positions_per_polarity: usize,
}

impl TraceLoader {
    /// Loader for traces of `samples` runs over `positions_per_polarity`
    /// positions per stabilizer family.
    pub fn new(cache: Arc<dyn CacheStore>, samples: usize, positions_per_polarity: usize) -> Self {
        Self {
            cache,
            samples,
            positions_per_polarity,
        }
    }

    /// Load the trace at `path` and its configuration key.
    ///
    /// The cache entry is keyed by the parent folder name and the file's
    /// configuration key.
    pub fn load(&self, path: &Path) -> Result<(ConfigKey, TrajectoryTrace)> {
        let name = path.to_string_lossy();
        let key = ConfigKey::parse(&name)?;
        let config_id = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("trajectory");
        let cache_key = CacheKey::new(TRAJECTORY_NAMESPACE, config_id, key);

        if let Some(stored) = self.cache.get_value::<StoredTrace>(&cache_key)? {
            let expected = (self.samples, self.positions_per_polarity);
            if (stored.shape.samples, stored.shape.positions) == expected {
                if let Ok(trace) = TrajectoryTrace::with_shape(stored.shape, stored.flags) {
                    return Ok((key, trace));
                }
            }
            debug!("Cached trace {cache_key} has a stale shape, reloading");
        }

        info!("Converting {}", path.display());
        let trace = parse_trace_file(path, self.samples, self.positions_per_polarity)?;
        self.cache.put_value(&cache_key, &trace.to_stored())?;
        Ok((key, trace))
    }
}

// ---------------------------------------------------------------------------
// PositionTable
// ---------------------------------------------------------------------------

/// One row of the position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub x: i32,
    pub y: i32,
    pub polarity: usize,
    pub anomalous: bool,
}

/// Coordinates of the flattened `(polarity, position)` index used by the
/// scanner: `index = polarity · P + position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionTable {
    entries: Vec<PositionEntry>,
    positions_per_polarity: usize,
}

impl PositionTable {
    /// Build from raw rows.
    ///
    /// `rows` holds either `2·P` rows, or `2·C·P` rows laid out as
    /// (polarity, cycle, position), which are sliced at cycle `layer`.
    pub fn from_rows(
        rows: &[PositionEntry],
        positions_per_polarity: usize,
        layer: usize,
    ) -> Result<Self> {
        let p = positions_per_polarity;
        let block = POLARITIES * p;
        if p == 0 || rows.is_empty() || rows.len() % block != 0 {
            return Err(AnomalyError::shape(
                "position table",
                format!("a positive multiple of {block} rows"),
                format!("{} rows", rows.len()),
            ));
        }
        let cycles = rows.len() / block;
        if cycles == 1 {
            return Ok(Self {
                entries: rows.to_vec(),
                positions_per_polarity: p,
            });
        }
        if layer >= cycles {
            return Err(AnomalyError::shape(
                "position table layer",
                format!("a layer below {cycles}"),
                layer,
            ));
        }
        let mut entries = Vec::with_capacity(block);
        for polarity in 0..POLARITIES {
            let start = polarity * cycles * p + layer * p;
            entries.extend_from_slice(&rows[start..start + p]);
        }
        Ok(Self {
            entries,
            positions_per_polarity: p,
        })
    }

    /// Parse a `.pos` file of `<x> <y> <polarity> <anomalous>` rows.
    pub fn from_pos_file(path: &Path, positions_per_polarity: usize, layer: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AnomalyError::not_found(path, "position table missing"),
            _ => AnomalyError::io(path, e),
        })?;
        let mut rows = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let nums: Vec<i64> = fields
                .iter()
                .map(|f| f.parse::<i64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AnomalyError::parse(path, i + 1, e.to_string()))?;
            let &[x, y, polarity, anomalous, ..] = nums.as_slice() else {
                return Err(AnomalyError::parse(
                    path,
                    i + 1,
                    format!("expected `<x> <y> <polarity> <anomalous>`, got {} fields", nums.len()),
                ));
            };
            let coord = |v: i64| {
                i32::try_from(v)
                    .map_err(|_| AnomalyError::parse(path, i + 1, format!("coordinate {v} out of range")))
            };
            rows.push(PositionEntry {
                x: coord(x)?,
                y: coord(y)?,
                polarity: usize::try_from(polarity)
                    .map_err(|_| AnomalyError::parse(path, i + 1, "negative polarity"))?,
                anomalous: anomalous == 1,
            });
        }
        let table = Self::from_rows(&rows, positions_per_polarity, layer)?;
        info!(
            "Position table {}: {} rows, {} anomalous",
            path.display(),
            table.len(),
            table.entries.iter().filter(|e| e.anomalous).count()
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn positions_per_polarity(&self) -> usize {
        self.positions_per_polarity
    }

    /// Row of a flattened scanner index.
    pub fn get(&self, index: usize) -> Option<&PositionEntry> {
        self.entries.get(index)
    }

    /// Flattened index of `(polarity, position)`.
    pub fn index(&self, polarity: usize, position: usize) -> usize {
        polarity * self.positions_per_polarity + position
    }

    /// Mean coordinates of the rows flagged anomalous.
    pub fn anomaly_centroid(&self) -> Option<(f64, f64)> {
        let anomalous: Vec<&PositionEntry> = self.entries.iter().filter(|e| e.anomalous).collect();
        if anomalous.is_empty() {
            return None;
        }
        let n = anomalous.len() as f64;
        let sx: f64 = anomalous.iter().map(|e| f64::from(e.x)).sum();
        let sy: f64 = anomalous.iter().map(|e| f64::from(e.y)).sum();
        Some((sx / n, sy / n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use tempfile::tempdir;

    #[test]
    fn infer_derives_cycles() {
        let shape = TraceShape::infer(3 * 2 * 10 * 4, 3, 4).unwrap();
        assert_eq!(shape.cycles, 10);
        assert!(TraceShape::infer(3 * 2 * 10 * 4 + 1, 3, 4).is_err());
        assert!(TraceShape::infer(0, 3, 4).is_err());
    }

    #[test]
    fn from_flat_layout_is_sample_polarity_cycle_position() {
        // 1 sample, 2 polarities, 2 cycles, 3 positions
        let values: Vec<u8> = vec![0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 0, 0];
        let trace = TrajectoryTrace::from_flat(values, 1, 3).unwrap();
        assert_eq!(trace.shape().cycles, 2);
        assert_eq!(trace.flags()[[0, 0, 0, 2]], 1);
        assert_eq!(trace.flags()[[0, 1, 1, 0]], 1);
        assert_eq!(trace.cycle(1)[[0, 1, 0]], 1);
    }

    #[test]
    fn non_binary_flags_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("result_ratio10_cycle2000.txt");
        std::fs::write(&path, "0 1\n0 2\n").unwrap();
        assert!(matches!(
            parse_trace_file(&path, 1, 1),
            Err(AnomalyError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn loader_caches_converted_trace() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("data_trajectory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("result_ratio10_cycle2000.txt");
        std::fs::write(&path, "0 1 1 0\n1 1 0 0\n").unwrap();

        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let loader = TraceLoader::new(cache.clone(), 1, 2);
        let (key, trace) = loader.load(&path).unwrap();
        assert_eq!(key.ratio, 10);
        assert_eq!(trace.shape().cycles, 2);

        std::fs::remove_file(&path).unwrap();
        let (_, again) = loader.load(&path).unwrap();
        assert_eq!(again, trace);
    }

    fn entry(x: i32, polarity: usize, anomalous: bool) -> PositionEntry {
        PositionEntry { x, y: 2 * x, polarity, anomalous }
    }

    #[test]
    fn table_slices_layer_per_polarity() {
        // P = 2, C = 3 cycles; x encodes polarity*100 + cycle*10 + position
        let mut rows = Vec::new();
        for p in 0..2 {
            for c in 0..3 {
                for pos in 0..2 {
                    rows.push(entry((p * 100 + c * 10 + pos) as i32, p, c == 1));
                }
            }
        }
        let table = PositionTable::from_rows(&rows, 2, 1).unwrap();
        let xs: Vec<i32> = (0..4).map(|i| table.get(i).unwrap().x).collect();
        assert_eq!(xs, vec![10, 11, 110, 111]);
        assert_eq!(table.index(1, 1), 3);

        let (cx, cy) = table.anomaly_centroid().unwrap();
        assert_eq!(cx, (10.0 + 11.0 + 110.0 + 111.0) / 4.0);
        assert_eq!(cy, 2.0 * cx);

        assert!(PositionTable::from_rows(&rows, 2, 3).is_err());
        assert!(PositionTable::from_rows(&rows[..5], 2, 0).is_err());
    }

    #[test]
    fn pos_file_parses_rows() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("result_ratio10_cycle2000.txt.pos");
        std::fs::write(&path, "0 0 0 0\n2 0 0 1\n0 1 1 0\n2 1 1 1\n").unwrap();
        let table = PositionTable::from_pos_file(&path, 2, 500).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.anomaly_centroid(), Some((2.0, 0.5)));
    }
}
