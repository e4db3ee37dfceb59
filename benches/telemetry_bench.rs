use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, io::Cursor};

use servo_rts::telemetry::{
    collector::collect,
    wire::{Sample, parse_line},
};

fn encode_bench(c: &mut Criterion) {
    let sample = Sample::new(4_990, -149_987);
    c.bench_function("sample_to_line", |b| b.iter(|| black_box(sample).to_line()));
}

fn parse_bench(c: &mut Criterion) {
    c.bench_function("parse_sample_line", |b| {
        b.iter(|| parse_line(black_box("4990,-149987\r\n")))
    });
}

fn collect_run_bench(c: &mut Criterion) {
    // One default run: 500 samples at 10 ms plus the sentinel.
    let mut stream = String::new();
    for i in 0..500i64 {
        stream.push_str(&Sample::new(i as u64 * 10, i * 200).to_line());
        stream.push('\n');
    }
    stream.push_str("End\n");

    c.bench_function("collect_500_sample_run", |b| {
        b.iter(|| collect(Cursor::new(black_box(stream.as_bytes()))).unwrap())
    });
}

criterion_group!(benches, encode_bench, parse_bench, collect_run_bench);
criterion_main!(benches);
