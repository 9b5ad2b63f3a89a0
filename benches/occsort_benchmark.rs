use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use occsort_rs::{Detection, OccSort};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/* ----------------------------------------------------------------------------
 * Synthetic sequence
 * ---------------------------------------------------------------------------- */

/// Objects on straight constant-velocity paths across a 1920x1080 scene,
/// with light positional jitter on the reported boxes.
fn build_sequence(
    num_objects: usize,
    num_frames: usize,
) -> Vec<Vec<Detection>> {
    let mut rng = StdRng::seed_from_u64(42);

    let starts: Vec<(f32, f32)> = (0..num_objects)
        .map(|_| {
            (
                rng.gen_range(100.0f32..800.0),
                rng.gen_range(100.0f32..800.0),
            )
        })
        .collect();
    let velocities: Vec<(f32, f32)> = (0..num_objects)
        .map(|_| (rng.gen_range(-4.0f32..4.0), rng.gen_range(-4.0f32..4.0)))
        .collect();

    (0..num_frames)
        .map(|frame| {
            (0..num_objects)
                .map(|i| {
                    let t = frame as f32;
                    let x = starts[i].0 + velocities[i].0 * t
                        + rng.gen_range(-1.0f32..1.0);
                    let y = starts[i].1 + velocities[i].1 * t
                        + rng.gen_range(-1.0f32..1.0);
                    Detection::new(x, y, x + 60.0, y + 120.0, 0.9)
                })
                .collect()
        })
        .collect()
}

/* ----------------------------------------------------------------------------
 * Benchmarks
 * ---------------------------------------------------------------------------- */

fn bench_sparse_scene(c: &mut Criterion) {
    let sequence = build_sequence(8, 100);

    c.bench_function("occsort_sparse_scene", |b| {
        b.iter(|| {
            let mut tracker = OccSort::new(3, 3);
            for detections in sequence.iter() {
                let _ = tracker.update(detections, &[]);
            }
        });
    });
}

fn bench_crowded_scene(c: &mut Criterion) {
    let sequence = build_sequence(50, 100);

    c.bench_function("occsort_crowded_scene", |b| {
        b.iter(|| {
            let mut tracker = OccSort::new(3, 3);
            for detections in sequence.iter() {
                let _ = tracker.update(detections, &[]);
            }
        });
    });
}

fn bench_intermittent_detections(c: &mut Criterion) {
    // Every third frame drops half the detections, exercising the recovery
    // and occlusion paths.
    let sequence: Vec<Vec<Detection>> = build_sequence(20, 100)
        .into_iter()
        .enumerate()
        .map(|(frame, mut detections)| {
            if frame % 3 == 0 {
                detections.truncate(10);
            }
            detections
        })
        .collect();

    c.bench_function("occsort_intermittent_detections", |b| {
        b.iter(|| {
            let mut tracker =
                OccSort::new(3, 3).with_confidence_thresholds(0.3, 0.7);
            for detections in sequence.iter() {
                let _ = tracker.update(detections, &[]);
            }
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_sparse_scene, bench_crowded_scene, bench_intermittent_detections
}
criterion_main!(benches);
