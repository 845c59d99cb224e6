use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logpi::{Config, Pipeline};
use std::io::{Cursor, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn generate_log_file(lines: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for i in 0..lines {
        writeln!(
            file,
            "2024-01-15 10:32:{:02} GET /api from 10.{}.{}.{} mac=aa:bb:cc:dd:ee:{:02x}",
            i % 60,
            (i / 256) % 256,
            (i / 16) % 256,
            i % 256,
            i % 256
        )
        .unwrap();
    }
    file.flush().unwrap();
    file
}

fn bench_pipeline_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_throughput");
    group.sample_size(10);

    for lines in [1_000, 10_000, 50_000].iter() {
        let file = generate_log_file(*lines);
        let byte_len = std::fs::metadata(file.path()).unwrap().len();

        group.throughput(Throughput::Bytes(byte_len));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &file, |b, file| {
            b.iter(|| {
                let config = Config::builder().build();
                let pipeline = Pipeline::new(config);
                let mut out = Cursor::new(Vec::new());
                pipeline
                    .run_file(file.path(), &mut out, Arc::new(AtomicBool::new(false)))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_serial_vs_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("serial_vs_parallel");
    group.sample_size(10);

    let file = generate_log_file(20_000);
    let byte_len = std::fs::metadata(file.path()).unwrap().len();
    group.throughput(Throughput::Bytes(byte_len));

    group.bench_function("serial", |b| {
        b.iter(|| {
            let config = Config::builder().serial(true).build();
            let pipeline = Pipeline::new(config);
            let mut out = Cursor::new(Vec::new());
            pipeline
                .run_file(file.path(), &mut out, Arc::new(AtomicBool::new(false)))
                .unwrap();
        });
    });

    group.bench_function("parallel", |b| {
        b.iter(|| {
            let config = Config::builder().worker_count(4).build();
            let pipeline = Pipeline::new(config);
            let mut out = Cursor::new(Vec::new());
            pipeline
                .run_file(file.path(), &mut out, Arc::new(AtomicBool::new(false)))
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline_throughput, bench_serial_vs_parallel);
criterion_main!(benches);
