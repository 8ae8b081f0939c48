//! Content store: parsed per-position activity records.
//!
//! A raw count file holds one line per (position, sample):
//!
//! ```text
//! <X|Z> <x> <y> <count>
//! ```
//!
//! Lines for the same position are samples in file order. Positions are kept
//! in first-seen order, which every downstream matrix row index relies on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheExt, CacheKey, CacheStore};
use crate::error::{AnomalyError, Result};
use crate::key::{ConfigKey, PositionKey};
use crate::stats::confidence_half_width;

/// Cache namespace of parsed records.
pub const CONTENT_NAMESPACE: &str = "content";

// ---------------------------------------------------------------------------
// ActivitySample / ActivityRecords
// ---------------------------------------------------------------------------

/// One sample of one position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivitySample {
    /// Raw event count over the window.
    pub count: u64,
    /// Per-cycle frequency, `count / window`.
    pub frequency: f64,
    /// Confidence half-width of `frequency`.
    pub half_width: f64,
}

impl ActivitySample {
    /// Derive frequency and half-width from a raw count.
    pub fn from_count(count: u64, window: usize, confidence: f64) -> Self {
        let frequency = count as f64 / window as f64;
        Self {
            count,
            frequency,
            half_width: confidence_half_width(frequency, window, confidence),
        }
    }
}

/// Ordered mapping `PositionKey -> [ActivitySample]` for one configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecords {
    positions: Vec<PositionKey>,
    samples: Vec<Vec<ActivitySample>>,
}

impl ActivityRecords {
    /// Build from `(position, sample)` pairs, grouping by position in
    /// first-seen order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (PositionKey, ActivitySample)>) -> Self {
        let mut index: HashMap<PositionKey, usize> = HashMap::new();
        let mut records = Self::default();
        for (pos, sample) in pairs {
            let row = *index.entry(pos).or_insert_with(|| {
                records.positions.push(pos);
                records.samples.push(Vec::new());
                records.positions.len() - 1
            });
            records.samples[row].push(sample);
        }
        records
    }

    /// Number of distinct positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no position was recorded.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions in first-seen order.
    pub fn positions(&self) -> &[PositionKey] {
        &self.positions
    }

    /// Samples of `position`, if present.
    pub fn get(&self, position: &PositionKey) -> Option<&[ActivitySample]> {
        self.positions
            .iter()
            .position(|p| p == position)
            .map(|i| self.samples[i].as_slice())
    }

    /// Iterate `(position, samples)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&PositionKey, &[ActivitySample])> + '_ {
        self.positions
            .iter()
            .zip(self.samples.iter().map(Vec::as_slice))
    }
}

/// Parse a raw count file recorded over `window` cycles.
pub fn parse_count_file(path: &Path, window: usize, confidence: f64) -> Result<ActivityRecords> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnomalyError::not_found(path, "raw count file missing"),
        _ => AnomalyError::io(path, e),
    })?;

    let mut pairs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(AnomalyError::parse(
                path,
                line_no,
                format!("expected `<type> <x> <y> <count>`, got {} fields", fields.len()),
            ));
        }
        let kind = fields[0]
            .parse()
            .map_err(|e: AnomalyError| AnomalyError::parse(path, line_no, e.to_string()))?;
        let x: i32 = fields[1]
            .parse()
            .map_err(|_| AnomalyError::parse(path, line_no, format!("bad x `{}`", fields[1])))?;
        let y: i32 = fields[2]
            .parse()
            .map_err(|_| AnomalyError::parse(path, line_no, format!("bad y `{}`", fields[2])))?;
        let count: u64 = fields[3].parse().map_err(|_| {
            AnomalyError::parse(path, line_no, format!("bad count `{}`", fields[3]))
        })?;
        pairs.push((
            PositionKey::new(kind, x, y),
            ActivitySample::from_count(count, window, confidence),
        ));
    }
    Ok(ActivityRecords::from_pairs(pairs))
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

/// Loads activity records per configuration and memoizes them.
///
/// Cache entries are never invalidated automatically; if a raw file changes,
/// its cache entry must be removed externally.
#[derive(Debug)]
pub struct ContentStore {
    data_root: PathBuf,
    cache: Arc<dyn CacheStore>,
    confidence: f64,
}

impl ContentStore {
    /// Create a store reading `<data_root>/<config_id>/result_ratio*_cycle*.txt`.
    pub fn new(data_root: impl Into<PathBuf>, cache: Arc<dyn CacheStore>, confidence: f64) -> Self {
        Self {
            data_root: data_root.into(),
            cache,
            confidence,
        }
    }

    /// Path of the raw count file for a configuration.
    pub fn source_path(&self, config_id: &str, key: ConfigKey) -> PathBuf {
        self.data_root.join(config_id).join(key.file_name())
    }

    /// Activity records of `(config_id, window, ratio)`.
    ///
    /// # Errors
    ///
    /// [`AnomalyError::InvalidKey`] for `window == 0`,
    /// [`AnomalyError::NotFound`] if neither a cache entry nor the raw file
    /// exists, and [`AnomalyError::Parse`] for malformed lines.
    pub fn get_activity_records(
        &self,
        config_id: &str,
        window: usize,
        ratio: u32,
    ) -> Result<ActivityRecords> {
        let key = ConfigKey::new(window, ratio)?;
        let cache_key = CacheKey::new(CONTENT_NAMESPACE, config_id, key);
        if let Some(records) = self.cache.get_value::<ActivityRecords>(&cache_key)? {
            return Ok(records);
        }

        let path = self.source_path(config_id, key);
        debug!("Parsing {}", path.display());
        let records = parse_count_file(&path, window, self.confidence)?;
        self.cache.put_value(&cache_key, &records)?;
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::key::StabilizerKind;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    const SAMPLE: &str = "X 0 1 3\nZ 1 0 5\nX 0 1 4\nZ 1 0 6\n";

    fn write_sample(root: &Path) {
        let dir = root.join("sweep");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("result_ratio1_cycle100.txt"), SAMPLE).unwrap();
    }

    #[test]
    fn groups_samples_in_first_seen_order() {
        let tmp = tempdir().unwrap();
        write_sample(tmp.path());
        let records =
            parse_count_file(&tmp.path().join("sweep/result_ratio1_cycle100.txt"), 100, 0.99)
                .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records.positions()[0], PositionKey::new(StabilizerKind::X, 0, 1));
        assert_eq!(records.positions()[1], PositionKey::new(StabilizerKind::Z, 1, 0));

        let z = records.get(&PositionKey::new(StabilizerKind::Z, 1, 0)).unwrap();
        assert_eq!(z.iter().map(|s| s.count).collect::<Vec<_>>(), vec![5, 6]);
        assert_relative_eq!(z[0].frequency, 0.05);
        assert!(z[0].half_width > 0.0);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.txt");
        std::fs::write(&path, "X 0 1 3\nX 0 one 3\n").unwrap();
        match parse_count_file(&path, 10, 0.99) {
            Err(AnomalyError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = ContentStore::new(tmp.path(), Arc::new(MemoryCache::new()), 0.99);
        let err = store.get_activity_records("sweep", 100, 7).unwrap_err();
        assert!(err.is_per_configuration());
    }

    #[test]
    fn zero_window_is_rejected() {
        let tmp = tempdir().unwrap();
        let store = ContentStore::new(tmp.path(), Arc::new(MemoryCache::new()), 0.99);
        assert!(matches!(
            store.get_activity_records("sweep", 0, 1),
            Err(AnomalyError::InvalidKey(_))
        ));
    }

    #[test]
    fn second_call_is_served_from_cache() {
        let tmp = tempdir().unwrap();
        write_sample(tmp.path());
        let cache = Arc::new(MemoryCache::new());
        let store = ContentStore::new(tmp.path(), cache.clone(), 0.99);

        let first = store.get_activity_records("sweep", 100, 1).unwrap();
        assert_eq!(cache.len(), 1);

        std::fs::remove_file(tmp.path().join("sweep/result_ratio1_cycle100.txt")).unwrap();
        let second = store.get_activity_records("sweep", 100, 1).unwrap();
        assert_eq!(first, second);
    }
}
