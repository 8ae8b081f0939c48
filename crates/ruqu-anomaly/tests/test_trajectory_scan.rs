//! Sliding-window replay, detection latency and localization error on a
//! hand-built trace whose crossings are known in advance.

use approx::assert_relative_eq;
use ndarray::Array4;
use std::path::Path;
use std::sync::Arc;

use ruqu_anomaly::cache::MemoryCache;
use ruqu_anomaly::extract::{
    detection_latencies, first_crossing, flagged_centre, frame_position_errors, position_error,
    LatencyTracker, Localization,
};
use ruqu_anomaly::key::ConfigKey;
use ruqu_anomaly::scan::{placement_count, scan_trajectory, WindowFrame};
use ruqu_anomaly::trajectory::{PositionEntry, PositionTable, TraceLoader, TrajectoryTrace};
use ruqu_anomaly::AnomalyError;

const P: usize = 4;
const CYCLES: usize = 10;
const WINDOW: usize = 3;
const THRESHOLD: f64 = 1.5;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One sample. Every polarity-0 position fires at cycles 5 and 6; polarity-1
/// position 0 fires at cycles 0 and 1.
fn burst_flags() -> Array4<u8> {
    Array4::from_shape_fn((1, 2, CYCLES, P), |(_, pol, c, x)| {
        let on = match pol {
            0 => c == 5 || c == 6,
            _ => x == 0 && c <= 1,
        };
        u8::from(on)
    })
}

/// Polarity 0 sits on the anomaly at `(10..14, 0)`; polarity 1 is far away.
fn table() -> PositionTable {
    let rows: Vec<PositionEntry> = (0..2)
        .flat_map(|pol| {
            (0..P as i32).map(move |i| PositionEntry {
                x: if pol == 0 { 10 + i } else { i },
                y: if pol == 0 { 0 } else { 5 },
                polarity: pol,
                anomalous: pol == 0,
            })
        })
        .collect();
    PositionTable::from_rows(&rows, P, 0).unwrap()
}

fn write_trace(path: &Path, flags: &Array4<u8>) {
    // One line per cycle row; line breaks carry no meaning to the parser.
    let mut body = String::new();
    for row in flags.rows() {
        let line: Vec<String> = row.iter().map(|f| f.to_string()).collect();
        body.push_str(&line.join(" "));
        body.push('\n');
    }
    std::fs::write(path, body).unwrap();
}

fn frames() -> Vec<WindowFrame> {
    let trace = TrajectoryTrace::from_array(burst_flags()).unwrap();
    scan_trajectory(&trace, WINDOW, THRESHOLD).unwrap().collect()
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

#[test]
fn test_scan_flags_known_placements() {
    let frames = frames();
    assert_eq!(frames.len(), placement_count(CYCLES, WINDOW));
    assert_eq!(frames.len(), 7);
    assert_eq!(frames.last().unwrap().start, CYCLES - WINDOW - 1);

    let counts: Vec<usize> = frames.iter().map(|f| f.above_counts[0]).collect();
    assert_eq!(counts, vec![1, 0, 0, 0, 4, 4, 0]);
    assert_eq!(frames[0].flagged[0], vec![P]);
    assert_eq!(frames[4].flagged[0], vec![0, 1, 2, 3]);
    assert_eq!(frames[4].cycle(), 4 + WINDOW);
}

#[test]
fn test_scan_from_disk_matches_in_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("traj");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(ConfigKey::new(2000, 5).unwrap().file_name());
    write_trace(&path, &burst_flags());

    let loader = TraceLoader::new(Arc::new(MemoryCache::new()), 1, P);
    let (key, trace) = loader.load(&path).unwrap();
    assert_eq!(key, ConfigKey::new(2000, 5).unwrap());
    assert_eq!(trace.shape().cycles, CYCLES);

    let from_disk: Vec<WindowFrame> = scan_trajectory(&trace, WINDOW, THRESHOLD)
        .unwrap()
        .collect();
    assert_eq!(from_disk, frames());

    // Served from the cache once the file is gone.
    std::fs::remove_file(&path).unwrap();
    let (_, cached) = loader.load(&path).unwrap();
    assert_eq!(cached, trace);
}

#[test]
fn test_final_window_is_scanned() {
    // Only the window starting at C - w - 1 covers the whole burst.
    let flags = Array4::from_shape_fn((1, 2, CYCLES, P), |(_, pol, c, x)| {
        u8::from(pol == 1 && x == 2 && c >= CYCLES - WINDOW - 1 && c < CYCLES - 1)
    });
    let trace = TrajectoryTrace::from_array(flags).unwrap();
    let frames: Vec<WindowFrame> = scan_trajectory(&trace, WINDOW, 2.5).unwrap().collect();

    let starts: Vec<usize> = frames.iter().map(|f| f.start).collect();
    assert_eq!(starts, (0..CYCLES - WINDOW).collect::<Vec<_>>());
    let last = frames.last().unwrap();
    assert_eq!(last.flagged[0], vec![P + 2]);
    assert_eq!(detection_latencies(&frames, 0), vec![CYCLES - WINDOW - 1]);
}

#[test]
fn test_trace_with_wrong_value_count_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("result_ratio5_cycle100.txt");
    std::fs::write(&path, "0 1 0\n").unwrap();

    let loader = TraceLoader::new(Arc::new(MemoryCache::new()), 1, P);
    let err = loader.load(&path).unwrap_err();
    assert!(matches!(err, AnomalyError::Shape { .. }));
}

#[test]
fn test_trace_shorter_than_window_has_no_placements() {
    let trace = TrajectoryTrace::from_array(burst_flags()).unwrap();
    let scan = scan_trajectory(&trace, CYCLES, THRESHOLD).unwrap();
    assert_eq!(scan.len(), 0);
    assert!(scan_trajectory(&trace, 0, THRESHOLD).is_err());
}

// ---------------------------------------------------------------------------
// Latency
// ---------------------------------------------------------------------------

#[test]
fn test_latency_is_first_crossing() {
    let frames = frames();
    assert_eq!(detection_latencies(&frames, 2), vec![4]);

    let counts: Vec<usize> = frames.iter().map(|f| f.above_counts[0]).collect();
    assert_eq!(first_crossing(&counts, 2), 4);
    assert_eq!(first_crossing(&counts, 0), 0);
}

#[test]
fn test_undetected_sample_reports_placement_count() {
    let frames = frames();
    assert_eq!(detection_latencies(&frames, 10), vec![frames.len()]);
}

// ---------------------------------------------------------------------------
// Localization
// ---------------------------------------------------------------------------

#[test]
fn test_position_error_is_missing_before_detection() {
    let table = table();
    let centroid = table.anomaly_centroid().unwrap();
    assert_relative_eq!(centroid.0, 11.5);
    assert_relative_eq!(centroid.1, 0.0);

    let frames = frames();
    let centres: Vec<Option<(f64, f64)>> = frames
        .iter()
        .map(|f| flagged_centre(&f.flagged[0], &table, Localization::Median))
        .collect();
    // Placement 0 has a centre but precedes the detection.
    assert!(centres[0].is_some());

    let errors = position_error(&centres, centroid, 4);
    assert!(errors[..4].iter().all(Option::is_none));
    assert_relative_eq!(errors[4].unwrap(), 0.0);
    assert_relative_eq!(errors[5].unwrap(), 0.0);
    // Detected, but nothing flagged in the last placement.
    assert_eq!(errors[6], None);
}

#[test]
fn test_streaming_errors_match_batch_errors() {
    let table = table();
    let centroid = table.anomaly_centroid().unwrap();
    let frames = frames();

    let mut tracker = LatencyTracker::new(2, 1);
    let mut streamed = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        tracker.observe(frame);
        let errors =
            frame_position_errors(frame, i, &tracker, &table, centroid, Localization::Mean);
        streamed.push(errors[0]);
    }

    let centres: Vec<_> = frames
        .iter()
        .map(|f| flagged_centre(&f.flagged[0], &table, Localization::Mean))
        .collect();
    assert_eq!(streamed, position_error(&centres, centroid, 4));
    assert_eq!(tracker.finish(), vec![4]);
}

#[test]
fn test_median_and_mean_differ_on_skewed_sets() {
    let table = table();
    // x = 10, 11, 13 and 0 (polarity 1 at y = 5)
    let flagged = [0, 1, 3, P];
    let (mx, my) = flagged_centre(&flagged, &table, Localization::Median).unwrap();
    let (ax, ay) = flagged_centre(&flagged, &table, Localization::Mean).unwrap();
    assert_relative_eq!(mx, 10.5);
    assert_relative_eq!(my, 0.0);
    assert_relative_eq!(ax, 8.5);
    assert_relative_eq!(ay, 1.25);
    assert!(flagged_centre(&[], &table, Localization::Median).is_none());
}

#[test]
fn test_position_file_is_sliced_at_layer() {
    // 3 cycles of rows per polarity; layer 1 carries the anomaly.
    let mut body = String::new();
    for pol in 0..2 {
        for cycle in 0..3 {
            for i in 0..P {
                let anomalous = u8::from(cycle == 1 && pol == 0);
                body.push_str(&format!("{} {} {pol} {anomalous}\n", i + 100 * cycle, pol));
            }
        }
    }
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("layout.txt.pos");
    std::fs::write(&path, body).unwrap();

    let table = PositionTable::from_pos_file(&path, P, 1).unwrap();
    assert_eq!(table.len(), 2 * P);
    assert_eq!(table.get(0).unwrap().x, 100);
    assert_eq!(table.get(table.index(1, 2)).unwrap().x, 102);
    assert_eq!(table.get(table.index(1, 2)).unwrap().y, 1);
    let (cx, cy) = table.anomaly_centroid().unwrap();
    assert_relative_eq!(cx, 101.5);
    assert_relative_eq!(cy, 0.0);

    assert!(PositionTable::from_pos_file(&path, P, 3).is_err());
}
