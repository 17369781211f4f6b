//! Benchmarks for queue-pairs, routing and whole pipeline runs
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rowflow::config::{EngineConfig, StepConfig, Topology};
use rowflow::pipeline::{
    DataMovement, FieldMeta, Fetch, OutputRouter, Pipeline, QueuePair, Row, Schema, StepRegistry,
    TargetRoute, Value, ValueType,
};
use std::sync::Arc;
use std::thread;

fn sample_rows(count: usize) -> Vec<Row> {
    let schema = Arc::new(
        Schema::new(vec![
            FieldMeta::new("id", ValueType::Integer),
            FieldMeta::new("region", ValueType::String),
            FieldMeta::new("amount", ValueType::Number),
        ])
        .expect("valid schema"),
    );
    (0..count)
        .map(|i| {
            Row::new(
                schema.clone(),
                vec![
                    Value::Integer(i as i64),
                    Value::String(format!("R{}", i % 8)),
                    Value::Number(i as f64 * 1.5),
                ],
            )
        })
        .collect()
}

fn bench_queue_pair_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_pair_handoff");
    let rows = 10_000;
    group.throughput(Throughput::Elements(rows as u64));

    for capacity in [1, 16, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, &capacity| {
            let input = sample_rows(rows);
            b.iter(|| {
                let pair = Arc::new(QueuePair::new("producer.0 - consumer.0", capacity));
                let consumer = {
                    let pair = pair.clone();
                    thread::spawn(move || {
                        let mut received = 0usize;
                        while let Fetch::Row(row) = pair.get(None) {
                            black_box(&row);
                            received += 1;
                        }
                        received
                    })
                };
                for row in input.iter().cloned() {
                    pair.put(row).expect("consumer is attached");
                }
                pair.signal_end();
                black_box(consumer.join().expect("consumer thread"))
            });
        });
    }

    group.finish();
}

fn bench_partition_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_routing");
    let rows = sample_rows(1_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for copies in [2, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(copies), copies, |b, &copies| {
            b.iter(|| {
                let pairs: Vec<_> = (0..copies)
                    .map(|i| Arc::new(QueuePair::new(format!("p.0 - c.{}", i), rows.len())))
                    .collect();
                let route = TargetRoute::new("c", pairs, vec!["region".to_string()]);
                let mut router = OutputRouter::new(vec![route], DataMovement::Distribute);
                for row in rows.iter().cloned() {
                    router.route(row).expect("pairs have room");
                }
                black_box(router.targets().len())
            });
        });
    }

    group.finish();
}

fn bench_pipeline_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_run");
    group.sample_size(10);
    let limit = 20_000;
    group.throughput(Throughput::Elements(limit));

    let registry = Arc::new(StepRegistry::with_builtins());
    for copies in [1, 4].iter() {
        let topology = Topology::new("bench")
            .step(
                StepConfig::new("source", "generator")
                    .with_option("limit", limit as i64)
                    .with_option("sequence_field", "id"),
            )
            .step(
                StepConfig::new("filter", "filter")
                    .with_copies(*copies)
                    .with_option("field", "id")
                    .with_option("op", ">")
                    .with_option("value", 0),
            )
            .step(StepConfig::new("sink", "dummy"))
            .hop("source", "filter")
            .hop("filter", "sink");

        group.bench_with_input(BenchmarkId::from_parameter(copies), &topology, |b, topology| {
            b.iter(|| {
                let config = EngineConfig::default().with_queue_capacity(256);
                let result = Pipeline::run(topology, registry.clone(), config).expect("run");
                black_box(result.rows_written)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_pair_handoff,
    bench_partition_routing,
    bench_pipeline_run
);
criterion_main!(benches);
