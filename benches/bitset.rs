use blockvault::LiveBits;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const CAPACITY: usize = 1 << 20;

fn bench_find_set(c: &mut Criterion) {
    // Sparse occupancy, the shape compaction sees: a handful of live slots
    // scattered across a large window.
    let mut bits = LiveBits::new(CAPACITY);
    for i in (0..CAPACITY).step_by(4096) {
        bits.set(i, true);
    }
    let mut pos = 0usize;
    c.bench_function("find_set/sparse_1m", |b| {
        b.iter(|| {
            pos = (pos + 997) % CAPACITY;
            black_box(bits.find_set(pos))
        })
    });
}

fn bench_set(c: &mut Criterion) {
    let mut bits = LiveBits::new(CAPACITY);
    let mut i = 0usize;
    c.bench_function("set/toggle_1m", |b| {
        b.iter(|| {
            i = (i + 8191) % CAPACITY;
            bits.set(i, true);
            bits.set(i, false);
        })
    });
}

criterion_group!(benches, bench_find_set, bench_set);
criterion_main!(benches);
