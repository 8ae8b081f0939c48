//! Sliding-window replay of trajectory traces.
//!
//! For each window placement `[start, start + window)` the flags of every
//! (sample, polarity, position) are summed over the window and compared with
//! the calibrated threshold. The sums are maintained incrementally: moving
//! the window by one cycle adds the entering cycle and subtracts the leaving
//! one, which yields exactly the same integers as re-summing.
//!
//! Placements start at `0 ..= cycles − window − 1`, i.e. there are
//! `cycles − window` of them.

use ndarray::{Array3, Axis, Zip};

use crate::error::{AnomalyError, Result};
use crate::stats::Summary;
use crate::trajectory::TrajectoryTrace;

/// Scanner output for one window placement.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrame {
    /// First cycle of the window.
    pub start: usize,
    /// Window length.
    pub window: usize,
    /// Per-sample number of flagged positions.
    pub above_counts: Vec<usize>,
    /// Per-sample flagged indices (`polarity · P + position`), ascending.
    pub flagged: Vec<Vec<usize>>,
}

impl WindowFrame {
    /// Cycle at which the window closes, `start + window`.
    pub fn cycle(&self) -> usize {
        self.start + self.window
    }

    /// Mean, std and range of the per-sample above counts.
    pub fn summary(&self) -> Option<Summary> {
        Summary::from_counts(&self.above_counts)
    }
}

/// Number of window placements for a trace of `cycles` cycles.
pub fn placement_count(cycles: usize, window: usize) -> usize {
    cycles.saturating_sub(window)
}

/// Start scanning `trace` with a window of `window` cycles.
///
/// The returned iterator is lazy. A clone continues from the same placement;
/// call again to replay from the first one.
///
/// # Errors
///
/// [`AnomalyError::InvalidKey`] if `window == 0`.
pub fn scan_trajectory(
    trace: &TrajectoryTrace,
    window: usize,
    threshold: f64,
) -> Result<TrajectoryScan<'_>> {
    if window == 0 {
        return Err(AnomalyError::InvalidKey("scan window must be > 0".into()));
    }
    let shape = trace.shape();
    Ok(TrajectoryScan {
        trace,
        window,
        threshold,
        placements: placement_count(shape.cycles, window),
        next: 0,
        sums: None,
    })
}

/// Lazy sequence of [`WindowFrame`]s over one trace.
#[derive(Debug, Clone)]
pub struct TrajectoryScan<'a> {
    trace: &'a TrajectoryTrace,
    window: usize,
    threshold: f64,
    placements: usize,
    next: usize,
    /// Window sums `(sample, polarity, position)` of the previous placement.
    sums: Option<Array3<u32>>,
}

impl TrajectoryScan<'_> {
    fn add_cycle(sums: &mut Array3<u32>, trace: &TrajectoryTrace, cycle: usize) {
        Zip::from(sums)
            .and(trace.cycle(cycle))
            .for_each(|s, &f| *s += u32::from(f));
    }

    fn sub_cycle(sums: &mut Array3<u32>, trace: &TrajectoryTrace, cycle: usize) {
        Zip::from(sums)
            .and(trace.cycle(cycle))
            .for_each(|s, &f| *s -= u32::from(f));
    }

    fn frame(&self, start: usize, sums: &Array3<u32>) -> WindowFrame {
        let positions = sums.len_of(Axis(2));
        let mut above_counts = Vec::with_capacity(sums.len_of(Axis(0)));
        let mut flagged = Vec::with_capacity(sums.len_of(Axis(0)));
        for sample in sums.axis_iter(Axis(0)) {
            let mut indices = Vec::new();
            for (polarity, row) in sample.axis_iter(Axis(0)).enumerate() {
                for (pos, &sum) in row.iter().enumerate() {
                    if f64::from(sum) > self.threshold {
                        indices.push(polarity * positions + pos);
                    }
                }
            }
            above_counts.push(indices.len());
            flagged.push(indices);
        }
        WindowFrame {
            start,
            window: self.window,
            above_counts,
            flagged,
        }
    }
}

impl Iterator for TrajectoryScan<'_> {
    type Item = WindowFrame;

    fn next(&mut self) -> Option<WindowFrame> {
        if self.next >= self.placements {
            return None;
        }
        let start = self.next;
        let sums = match self.sums.take() {
            Some(mut sums) => {
                Self::add_cycle(&mut sums, self.trace, start + self.window - 1);
                Self::sub_cycle(&mut sums, self.trace, start - 1);
                sums
            }
            None => {
                let shape = self.trace.shape();
                let mut sums =
                    Array3::<u32>::zeros((shape.samples, shape.polarities, shape.positions));
                for cycle in start..start + self.window {
                    Self::add_cycle(&mut sums, self.trace, cycle);
                }
                sums
            }
        };
        let frame = self.frame(start, &sums);
        self.sums = Some(sums);
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.placements - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TrajectoryScan<'_> {}
