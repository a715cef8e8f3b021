//! Throughput benchmarks for the queue engine's hot paths: durable `add`
//! and the interleaved `readNew` drain. Benchmarks the persistence layer
//! directly rather than through the network stack.

use std::sync::Arc;

use clientq::{
    DurableEnvironment, FjallEnvironment, InMemoryPayloadStore, NewPublish, NoopQueueTelemetry,
    OverflowStrategy, QoS, QueueEngine, QueueKey,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn build_engine(dir: &std::path::Path) -> QueueEngine {
    let env: Box<dyn DurableEnvironment> = Box::new(FjallEnvironment::open(dir, 0).unwrap());
    let payload_store = Arc::new(InMemoryPayloadStore::new());
    let telemetry = Arc::new(NoopQueueTelemetry);
    QueueEngine::new(vec![env], u64::MAX, 64, payload_store, telemetry)
}

fn bench_add_durable(c: &mut Criterion) {
    c.bench_function("add_qos1_durable", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let engine = build_engine(dir.path());
                (dir, engine, 0u64)
            },
            |(dir, engine, mut payload_id)| {
                let key = QueueKey::session("bench-client");
                for _ in 0..256 {
                    payload_id += 1;
                    engine
                        .add(
                            &key,
                            NewPublish {
                                payload_id,
                                topic: "bench/topic".to_string(),
                                qos: QoS::AtLeastOnce,
                                expiry_interval_secs: None,
                                unique_id: format!("u{payload_id}"),
                                retain: false,
                            },
                            usize::MAX,
                            OverflowStrategy::Discard,
                            0,
                        )
                        .unwrap();
                }
                drop(dir);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_read_new_interleaved(c: &mut Criterion) {
    c.bench_function("read_new_interleaved_qos0_qos1", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let engine = build_engine(dir.path());
                let key = QueueKey::session("bench-client");
                for i in 0..128u64 {
                    engine
                        .add(
                            &key,
                            NewPublish {
                                payload_id: i,
                                topic: "bench/topic".to_string(),
                                qos: QoS::AtLeastOnce,
                                expiry_interval_secs: None,
                                unique_id: format!("u{i}"),
                                retain: false,
                            },
                            usize::MAX,
                            OverflowStrategy::Discard,
                            0,
                        )
                        .unwrap();
                    engine
                        .add(
                            &key,
                            NewPublish {
                                payload_id: 1_000 + i,
                                topic: "bench/topic0".to_string(),
                                qos: QoS::AtMostOnce,
                                expiry_interval_secs: None,
                                unique_id: format!("q0-{i}"),
                                retain: false,
                            },
                            usize::MAX,
                            OverflowStrategy::Discard,
                            0,
                        )
                        .unwrap();
                }
                (dir, engine, key)
            },
            |(dir, engine, key)| {
                let packet_ids: Vec<u16> = (1..=64).collect();
                engine.read_new(&key, &packet_ids, u64::MAX, 0).unwrap();
                drop(dir);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_add_durable, bench_read_new_interleaved);
criterion_main!(benches);
