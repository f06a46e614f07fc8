//! Criterion benchmarks for netsched queue operations.
//!
//! Run with: cargo bench
//! Results saved to: target/criterion/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

use netsched::config::{QueueParams, SchedulerConfig};
use netsched::protocol::{Client, SubmitRequest};
use netsched::queue::{Queue, QueueRegistry};

/// Open a registry with one static queue in a temp dir.
fn setup(params: QueueParams) -> (TempDir, Arc<QueueRegistry>, Arc<Queue>) {
    let dir = TempDir::new().unwrap();
    let mut config = SchedulerConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.storage.synchronous = 0;
    config.classes.insert("bench".to_string(), params);
    config.queues.insert("bench".to_string(), "bench".to_string());
    let registry = QueueRegistry::open(config).unwrap();
    let queue = registry.queue("bench").unwrap();
    (dir, registry, queue)
}

fn bench_params() -> QueueParams {
    QueueParams {
        notif_timeout: 0,
        max_run_attempts: 0,
        ..Default::default()
    }
}

/// Benchmark single submit.
fn bench_submit(c: &mut Criterion) {
    let (_dir, _registry, queue) = setup(bench_params());
    let client = Client::new("bench-submitter");

    let mut group = c.benchmark_group("queue_submit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        b.iter(|| queue.submit(&client, SubmitRequest::new("payload")).unwrap())
    });
    group.finish();
}

/// Benchmark batch submit.
fn bench_submit_batch(c: &mut Criterion) {
    let (_dir, _registry, queue) = setup(bench_params());
    let client = Client::new("bench-submitter");

    let mut group = c.benchmark_group("queue_submit_batch");
    for size in [10usize, 100, 1000] {
        let reqs: Vec<SubmitRequest> = (0..size)
            .map(|i| SubmitRequest::new(format!("job-{}", i)).with_affinity(format!("a{}", i % 8)))
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &reqs, |b, reqs| {
            b.iter(|| queue.submit_batch(&client, reqs).unwrap())
        });
    }
    group.finish();
}

/// Benchmark the worker exchange: submit, fetch, report.
fn bench_lifecycle(c: &mut Criterion) {
    let (_dir, _registry, queue) = setup(bench_params());
    let submitter = Client::new("bench-submitter");
    let worker = Client::new("bench-node").with_node_id("w1");

    let mut group = c.benchmark_group("queue_lifecycle");
    group.throughput(Throughput::Elements(1));
    group.bench_function("submit_get_put", |b| {
        b.iter(|| {
            let id = queue
                .submit(&submitter, SubmitRequest::new("payload"))
                .unwrap();
            let job = queue.get_job(&worker, &[]).unwrap().unwrap();
            queue.put_result(&worker, job.id, 0, "ok").unwrap();
            id
        })
    });
    group.finish();
}

/// Benchmark selection over a populated queue.
fn bench_select(c: &mut Criterion) {
    let (_dir, _registry, queue) = setup(bench_params());
    let client = Client::new("bench-submitter");
    let reqs: Vec<SubmitRequest> = (0..10_000)
        .map(|i| SubmitRequest::new("x").with_tag("shard", format!("{}", i % 16)))
        .collect();
    queue.submit_batch(&client, &reqs).unwrap();

    let mut group = c.benchmark_group("queue_select");
    group.bench_function("status", |b| {
        b.iter(|| queue.exec_select("status = Pending").unwrap())
    });
    group.bench_function("tag_and_status", |b| {
        b.iter(|| {
            queue
                .exec_select("tag.shard IN (1, 2, 3) AND NOT status = Done")
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_submit,
    bench_submit_batch,
    bench_lifecycle,
    bench_select
);
criterion_main!(benches);
