//! Benchmarks for the location packet codec

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use protocol::{LocationSample, decode_packet, encode_packet};
use std::time::{Duration, UNIX_EPOCH};

fn benchmark_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("location_packet");

    let sample = LocationSample::new(
        37.7749,
        -122.4194,
        10.0,
        UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
    );

    group.bench_function("encode", |b| b.iter(|| encode_packet(black_box(&sample))));

    let packet = encode_packet(&sample);
    group.bench_function("decode", |b| b.iter(|| decode_packet(black_box(&packet))));

    group.finish();
}

criterion_group!(benches, benchmark_packet);
criterion_main!(benches);
