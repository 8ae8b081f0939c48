//! Sliding-window scanner benchmarks.
//!
//! Traces are generated from a fixed pattern (no RNG) at sizes bracketing the
//! d = 21 production layout (420 positions per polarity).
//!
//! Run with: `cargo bench -p ruqu-anomaly --bench scan_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array4;

use ruqu_anomaly::extract::LatencyTracker;
use ruqu_anomaly::scan::{placement_count, scan_trajectory};
use ruqu_anomaly::trajectory::TrajectoryTrace;

fn patterned_trace(samples: usize, cycles: usize, positions: usize) -> TrajectoryTrace {
    let flags = Array4::from_shape_fn((samples, 2, cycles, positions), |(s, p, c, x)| {
        // ~1/16 activity with a hot block in the last quarter of positions
        let hot = x >= positions * 3 / 4 && c >= cycles / 2;
        let h = (s * 131 + p * 17 + c * 29 + x * 7) % 16;
        u8::from(h == 0 || (hot && h < 4))
    });
    TrajectoryTrace::from_array(flags).expect("polarity axis is 2")
}

// ============================================================================
// SCAN THROUGHPUT
// ============================================================================

fn bench_scan_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_window");
    let trace = patterned_trace(10, 500, 420);

    for window in [10usize, 50, 200] {
        let placements = placement_count(500, window);
        group.throughput(Throughput::Elements(placements as u64));
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &w| {
            let threshold = w as f64 / 8.0;
            b.iter(|| {
                let scan = scan_trajectory(black_box(&trace), w, threshold).expect("window > 0");
                scan.map(|f| f.above_counts.iter().sum::<usize>()).sum::<usize>()
            })
        });
    }
    group.finish();
}

fn bench_scan_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_samples");
    for samples in [1usize, 10, 50] {
        let trace = patterned_trace(samples, 300, 420);
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &samples, |b, &n| {
            b.iter(|| {
                let mut tracker = LatencyTracker::new(20, n);
                for frame in scan_trajectory(black_box(&trace), 50, 6.0).expect("window > 0") {
                    tracker.observe(&frame);
                }
                tracker.finish()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan_window, bench_scan_samples);
criterion_main!(benches);
