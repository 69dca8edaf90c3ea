//! Scan buffer throughput benchmarks.
//!
//! Measures the sampler-side row write and the consumer-side bulk read for
//! the channel counts the boards support. The aggregate ceiling is 100 kS/s,
//! so a row write must stay well under 10 µs.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use daqhat::buffer::{BufferMode, ScanBuffer};
use daqhat::scan::{ReadRequest, ScanShared, Wait};
use std::hint::black_box;

fn bench_write_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_buffer_write_row");
    for channels in [1usize, 2, 8] {
        let mut buffer =
            ScanBuffer::allocate(BufferMode::Continuous, channels, 10_000, 1000.0).unwrap();
        let row = vec![1.25; channels];
        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| black_box(buffer.write_row(black_box(&row))));
        });
    }
    group.finish();
}

fn bench_read_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_buffer_read_1000_rows");
    for channels in [1usize, 8] {
        let mut buffer =
            ScanBuffer::allocate(BufferMode::Continuous, channels, 10_000, 1000.0).unwrap();
        let row = vec![0.5; channels];
        let mut out = vec![0.0; 1000 * channels];
        group.bench_with_input(BenchmarkId::from_parameter(channels), &channels, |b, _| {
            b.iter(|| {
                for _ in 0..1000 {
                    buffer.write_row(&row);
                }
                black_box(buffer.read_rows(1000, &mut out))
            });
        });
    }
    group.finish();
}

fn bench_shared_push_and_read(c: &mut Criterion) {
    let buffer = ScanBuffer::allocate(BufferMode::Continuous, 2, 10_000, 1000.0).unwrap();
    let shared = ScanShared::new(0, buffer);
    let row = [0.1, -0.1];

    c.bench_function("scan_shared_push_100_read_all", |b| {
        b.iter(|| {
            for _ in 0..100 {
                shared.push_row(black_box(&row));
            }
            black_box(shared.read(ReadRequest::All, Wait::Immediate).rows)
        });
    });
}

criterion_group!(
    benches,
    bench_write_row,
    bench_read_rows,
    bench_shared_push_and_read
);
criterion_main!(benches);
