//! Dense activity matrices (positions × samples of per-cycle frequency).

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::{CacheExt, CacheKey, CacheStore};
use crate::content::{ActivityRecords, ContentStore};
use crate::error::{AnomalyError, Result};
use crate::key::{ConfigKey, PositionKey};

/// Cache namespace of built matrices.
pub const MATRIX_NAMESPACE: &str = "matrix";

/// Per-cycle frequency of every (position, sample) of one configuration.
///
/// Row `i` is `positions[i]`, in content-store order.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityMatrix {
    positions: Vec<PositionKey>,
    values: Array2<f64>,
}

/// Flat on-disk form.
#[derive(Serialize, Deserialize)]
struct StoredMatrix {
    positions: Vec<PositionKey>,
    samples: usize,
    values: Vec<f64>,
}

impl ActivityMatrix {
    /// Build from parsed records.
    ///
    /// # Errors
    ///
    /// [`AnomalyError::Shape`] if positions disagree on the sample count.
    pub fn from_records(records: &ActivityRecords) -> Result<Self> {
        let samples = records.iter().next().map_or(0, |(_, s)| s.len());
        let mut values = Array2::<f64>::zeros((records.len(), samples));
        for (row, (pos, recs)) in records.iter().enumerate() {
            if recs.len() != samples {
                return Err(AnomalyError::shape(
                    format!("activity matrix row {row} ({pos})"),
                    format!("{samples} samples"),
                    format!("{} samples", recs.len()),
                ));
            }
            for (col, s) in recs.iter().enumerate() {
                values[[row, col]] = s.frequency;
            }
        }
        Ok(Self {
            positions: records.positions().to_vec(),
            values,
        })
    }

    /// Assemble from parts; `values` must have one row per position.
    pub fn from_parts(positions: Vec<PositionKey>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != positions.len() {
            return Err(AnomalyError::shape(
                "activity matrix",
                format!("{} rows", positions.len()),
                format!("{} rows", values.nrows()),
            ));
        }
        Ok(Self { positions, values })
    }

    /// Row keys.
    pub fn positions(&self) -> &[PositionKey] {
        &self.positions
    }

    /// Frequency matrix, shape `(positions, samples)`.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Number of rows.
    pub fn position_count(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns.
    pub fn sample_count(&self) -> usize {
        self.values.ncols()
    }

    /// Mean frequency of each position over its own samples.
    ///
    /// `None` when there are no samples.
    pub fn position_means(&self) -> Option<Array1<f64>> {
        self.values.mean_axis(Axis(1))
    }

    fn to_stored(&self) -> StoredMatrix {
        StoredMatrix {
            positions: self.positions.clone(),
            samples: self.sample_count(),
            values: self.values.iter().copied().collect(),
        }
    }

    fn from_stored(stored: StoredMatrix) -> Result<Self> {
        let rows = stored.positions.len();
        let values = Array2::from_shape_vec((rows, stored.samples), stored.values).map_err(|e| {
            AnomalyError::shape("cached activity matrix", format!("{rows}x{}", stored.samples), e)
        })?;
        Ok(Self {
            positions: stored.positions,
            values,
        })
    }
}

/// Builds activity matrices from a [`ContentStore`] and memoizes them.
#[derive(Debug)]
pub struct MatrixBuilder {
    content: ContentStore,
    cache: Arc<dyn CacheStore>,
}

impl MatrixBuilder {
    /// Create a builder over `content`, memoizing into `cache`.
    pub fn new(content: ContentStore, cache: Arc<dyn CacheStore>) -> Self {
        Self { content, cache }
    }

    /// Underlying content store.
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Activity matrix of `(config_id, window, ratio)`.
    pub fn get_activity_matrix(
        &self,
        config_id: &str,
        window: usize,
        ratio: u32,
    ) -> Result<ActivityMatrix> {
        let key = ConfigKey::new(window, ratio)?;
        let cache_key = CacheKey::new(MATRIX_NAMESPACE, config_id, key);
        if let Some(stored) = self.cache.get_value::<StoredMatrix>(&cache_key)? {
            // A stored matrix with an inconsistent shape is rebuilt from content.
            if let Ok(matrix) = ActivityMatrix::from_stored(stored) {
                return Ok(matrix);
            }
        }

        let records = self.content.get_activity_records(config_id, window, ratio)?;
        let matrix = ActivityMatrix::from_records(&records)?;
        self.cache.put_value(&cache_key, &matrix.to_stored())?;
        Ok(matrix)
    }
}
