use criterion::{black_box, criterion_group, criterion_main, Criterion};
use session_converter::signal::{align_and_mask, edges_from_mask, edges_from_ranges};

/// One hour of tracking at 30 frames per second.
const FRAMES: usize = 30 * 3600;

fn frame_times() -> Vec<f64> {
    (0..FRAMES).map(|i| i as f64 / 30.0).collect()
}

pub fn bench_align_and_mask(c: &mut Criterion) {
    let times = frame_times();
    // Every 7th sample lost, as with dropped tracking frames
    let values: Vec<f64> = (0..FRAMES)
        .map(|i| if i % 7 == 0 { f64::NAN } else { i as f64 })
        .collect();

    c.bench_function("align_and_mask_1h", |b| {
        b.iter(|| black_box(align_and_mask(black_box(&times), black_box(&values))))
    });
}

pub fn bench_edges(c: &mut Criterion) {
    let times = frame_times();
    // 10 s epochs alternating with 20 s gaps
    let mask: Vec<f64> = (0..FRAMES)
        .map(|i| if (i / 300) % 3 == 0 { 1.0 } else { 0.0 })
        .collect();
    let ranges: Vec<Option<(f64, f64)>> = (0..FRAMES / 900)
        .map(|i| Some((i as f64 * 30.0, i as f64 * 30.0 + 10.0)))
        .collect();

    c.bench_function("edges_from_mask_1h", |b| {
        b.iter(|| black_box(edges_from_mask(black_box(&times), black_box(&mask))))
    });
    c.bench_function("edges_from_ranges_1h", |b| {
        b.iter(|| black_box(edges_from_ranges(black_box(&ranges))))
    });
}

criterion_group!(benches, bench_align_and_mask, bench_edges);
criterion_main!(benches);
