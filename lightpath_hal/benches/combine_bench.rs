//! Status composition benchmarks.
//!
//! Measures the cost of building a composite over N pending statuses and
//! completing every child, and of a full signal write round trip through
//! the simulated transport.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lightpath_hal::prelude::*;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn bench_combine_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_complete");
    for n in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let (statuses, completions): (Vec<_>, Vec<_>) =
                    (0..n).map(|i| Status::new(format!("child{i}"))).unzip();
                let composite = combine(&statuses, None);
                for completion in &completions {
                    completion.succeed();
                }
                black_box(composite.success())
            });
        });
    }
    group.finish();
}

fn bench_combine_done(c: &mut Criterion) {
    let statuses: Vec<_> = (0..64).map(|i| Status::done(format!("done{i}"))).collect();
    c.bench_function("combine_64_finished", |b| {
        b.iter(|| black_box(combine(black_box(&statuses), Some(Duration::from_secs(1)))));
    });
}

fn bench_signal_write(c: &mut Criterion) {
    let sim = Arc::new(SimTransport::new().with_channel("BENCH:POS", 0.0));
    let schema = SignalSchema::new("position", "BENCH:POS", ValueKind::Float);
    let signal = Signal::from_schema("bench_position", &schema, sim.clone()).expect("signal");
    signal
        .connect(Duration::from_secs(1))
        .wait(Some(Duration::from_secs(1)));

    let mut target = 0.0;
    c.bench_function("signal_write_round_trip", |b| {
        b.iter(|| {
            target += 1.0;
            let status = signal.write(target).expect("valid write");
            black_box(status.wait(Some(Duration::from_secs(1))))
        });
    });
}

criterion_group!(
    benches,
    bench_combine_complete,
    bench_combine_done,
    bench_signal_write
);
criterion_main!(benches);
