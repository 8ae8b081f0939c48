//! Detection latency and localization error from scanner output.
//!
//! Latency is the index of the first window placement whose flagged count
//! exceeds `nth`. A sample that never crosses reports the number of
//! placements seen, never zero. Position errors before a sample's first
//! detection are missing (`None`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AnomalyError;
use crate::scan::WindowFrame;
use crate::stats::{mean, median, Summary};
use crate::trajectory::PositionTable;

/// Index of the first entry strictly greater than `nth`, or `counts.len()`.
///
/// ```rust
/// use ruqu_anomaly::extract::first_crossing;
///
/// assert_eq!(first_crossing(&[0, 1, 3, 5], 2), 2);
/// assert_eq!(first_crossing(&[0, 1, 2], 2), 3);
/// ```
pub fn first_crossing(counts: &[usize], nth: usize) -> usize {
    counts.iter().position(|&c| c > nth).unwrap_or(counts.len())
}

/// Streaming first-crossing detector over all samples of a scan.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    nth: usize,
    detected: Vec<Option<usize>>,
    seen: usize,
}

impl LatencyTracker {
    pub fn new(nth: usize, samples: usize) -> Self {
        Self {
            nth,
            detected: vec![None; samples],
            seen: 0,
        }
    }

    /// Feed the next frame, in placement order.
    pub fn observe(&mut self, frame: &WindowFrame) {
        if self.detected.len() < frame.above_counts.len() {
            self.detected.resize(frame.above_counts.len(), None);
        }
        for (slot, &count) in self.detected.iter_mut().zip(&frame.above_counts) {
            if slot.is_none() && count > self.nth {
                *slot = Some(self.seen);
            }
        }
        self.seen += 1;
    }

    /// Placement index at which `sample` was first detected, if it was.
    pub fn detected_at(&self, sample: usize) -> Option<usize> {
        self.detected.get(sample).copied().flatten()
    }

    /// Frames observed so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Per-sample latency; undetected samples report [`seen`](Self::seen).
    pub fn finish(self) -> Vec<usize> {
        let seen = self.seen;
        self.detected.into_iter().map(|d| d.unwrap_or(seen)).collect()
    }
}

/// [`first_crossing`] of each sample's above-count series.
pub fn detection_latencies<'a>(
    frames: impl IntoIterator<Item = &'a WindowFrame>,
    nth: usize,
) -> Vec<usize> {
    let mut tracker = LatencyTracker::new(nth, 0);
    for frame in frames {
        tracker.observe(frame);
    }
    tracker.finish()
}

// ---------------------------------------------------------------------------
// Localization
// ---------------------------------------------------------------------------

/// Estimator of the flagged-set centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Localization {
    /// Coordinate-wise median.
    #[default]
    Median,
    /// Coordinate-wise mean.
    Mean,
}

impl fmt::Display for Localization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Localization::Median => f.write_str("median"),
            Localization::Mean => f.write_str("mean"),
        }
    }
}

impl FromStr for Localization {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self, AnomalyError> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(Localization::Median),
            "mean" => Ok(Localization::Mean),
            other => Err(AnomalyError::InvalidKey(format!(
                "unknown localization `{other}` (expected median or mean)"
            ))),
        }
    }
}

/// Centre of the flagged indices, looked up in `table`.
///
/// `None` for an empty flagged set; indices outside the table are ignored.
pub fn flagged_centre(
    flagged: &[usize],
    table: &PositionTable,
    mode: Localization,
) -> Option<(f64, f64)> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = flagged
        .iter()
        .filter_map(|&i| table.get(i))
        .map(|e| (f64::from(e.x), f64::from(e.y)))
        .unzip();
    let reduce = match mode {
        Localization::Median => median,
        Localization::Mean => mean,
    };
    Some((reduce(&xs)?, reduce(&ys)?))
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Distance of each placement's centre from the anomaly centroid.
///
/// Entries before `detected_at`, and placements with no flagged positions,
/// are `None`.
pub fn position_error(
    centres: &[Option<(f64, f64)>],
    anomaly_centroid: (f64, f64),
    detected_at: usize,
) -> Vec<Option<f64>> {
    centres
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i < detected_at {
                None
            } else {
                c.map(|c| distance(c, anomaly_centroid))
            }
        })
        .collect()
}

/// Position error of every sample of one frame.
///
/// Uses `tracker` for detection state, so the frame must already have been
/// observed by it.
pub fn frame_position_errors(
    frame: &WindowFrame,
    frame_index: usize,
    tracker: &LatencyTracker,
    table: &PositionTable,
    anomaly_centroid: (f64, f64),
    mode: Localization,
) -> Vec<Option<f64>> {
    frame
        .flagged
        .iter()
        .enumerate()
        .map(|(sample, flagged)| match tracker.detected_at(sample) {
            Some(at) if at <= frame_index => {
                flagged_centre(flagged, table, mode).map(|c| distance(c, anomaly_centroid))
            }
            _ => None,
        })
        .collect()
}

/// Summary over the defined entries; `None` if every entry is missing.
pub fn summarize_errors(errors: &[Option<f64>]) -> Option<Summary> {
    let defined: Vec<f64> = errors.iter().flatten().copied().collect();
    Summary::from_slice(&defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::PositionEntry;
    use approx::assert_relative_eq;

    fn frame(start: usize, counts: &[usize]) -> WindowFrame {
        WindowFrame {
            start,
            window: 3,
            above_counts: counts.to_vec(),
            flagged: counts.iter().map(|&c| (0..c).collect()).collect(),
        }
    }

    fn table() -> PositionTable {
        let rows: Vec<PositionEntry> = [(0, 0, false), (4, 0, false), (0, 3, true), (8, 3, true)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y, anomalous))| PositionEntry {
                x,
                y,
                polarity: i / 2,
                anomalous,
            })
            .collect();
        PositionTable::from_rows(&rows, 2, 0).unwrap()
    }

    #[test]
    fn never_crossing_returns_length() {
        assert_eq!(first_crossing(&[], 0), 0);
        assert_eq!(first_crossing(&[5, 5, 5], 5), 3);
        assert_eq!(first_crossing(&[6], 5), 0);
    }

    #[test]
    fn latencies_per_sample() {
        let frames = vec![frame(0, &[0, 3]), frame(1, &[1, 0]), frame(2, &[4, 0])];
        assert_eq!(detection_latencies(&frames, 2), vec![2, 0]);
        assert_eq!(detection_latencies(&frames, 10), vec![3, 3]);
    }

    #[test]
    fn median_and_mean_centres() {
        let t = table();
        assert_eq!(flagged_centre(&[0, 1, 3], &t, Localization::Median), Some((4.0, 0.0)));
        assert_eq!(flagged_centre(&[0, 1, 3], &t, Localization::Mean), Some((4.0, 1.0)));
        assert_eq!(flagged_centre(&[], &t, Localization::Mean), None);
        assert_eq!(t.anomaly_centroid(), Some((4.0, 3.0)));
    }

    #[test]
    fn errors_before_detection_are_missing() {
        let centres = vec![Some((0.0, 0.0)), Some((3.0, 4.0)), None, Some((0.0, 0.0))];
        let errs = position_error(&centres, (0.0, 0.0), 1);
        assert_eq!(errs[0], None);
        assert_relative_eq!(errs[1].unwrap(), 5.0);
        assert_eq!(errs[2], None);
        assert_eq!(errs[3], Some(0.0));
    }

    #[test]
    fn frame_errors_follow_tracker() {
        let t = table();
        let mut tracker = LatencyTracker::new(1, 2);
        let frames = vec![frame(0, &[2, 0]), frame(1, &[2, 1])];
        tracker.observe(&frames[0]);
        let e0 = frame_position_errors(&frames[0], 0, &tracker, &t, (4.0, 3.0), Localization::Mean);
        // sample 0 flags indices 0 and 1: centre (2, 0)
        assert_relative_eq!(e0[0].unwrap(), (4.0f64 + 9.0).sqrt());
        assert_eq!(e0[1], None);

        tracker.observe(&frames[1]);
        assert_eq!(tracker.detected_at(1), None);
        assert_eq!(tracker.finish(), vec![0, 2]);
        assert!(summarize_errors(&[None, None]).is_none());
    }

    #[test]
    fn localization_parses_and_serializes_lowercase() {
        assert_eq!("Mean".parse::<Localization>().unwrap(), Localization::Mean);
        assert!("mode".parse::<Localization>().is_err());
        assert_eq!(serde_json::to_string(&Localization::Median).unwrap(), "\"median\"");
    }
}
