//! End-to-end scenarios for the queue engine's public surface, exercised
//! against a real durable backend, one scenario per test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clientq::{
    Entry, FjallEnvironment, InMemoryPayloadStore, NewPublish, NoopQueueTelemetry,
    OverflowStrategy, QoS, QueueConfig, QueueEngine, QueueKey, QueueTelemetry, ReleaseEntry,
};

#[derive(Default)]
struct CountingTelemetry {
    queue_full: AtomicUsize,
    qos0_memory_exceeded: AtomicUsize,
}

impl QueueTelemetry for CountingTelemetry {
    fn queue_full(&self, _queue_id: &str, _topic: &str, _qos: QoS) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }
    fn queue_full_shared(&self, _queue_id: &str, _topic: &str, _qos: QoS) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }
    fn qos0_memory_exceeded(&self, _queue_id: &str, _topic: &str, _qos: QoS, _current: u64, _limit: u64) {
        self.qos0_memory_exceeded.fetch_add(1, Ordering::Relaxed);
    }
    fn qos0_memory_exceeded_shared(
        &self,
        _queue_id: &str,
        _topic: &str,
        _qos: QoS,
        _current: u64,
        _limit: u64,
    ) {
        self.qos0_memory_exceeded.fetch_add(1, Ordering::Relaxed);
    }
}

fn new_engine(
    qos0_memory_limit: u64,
) -> (QueueEngine, Arc<InMemoryPayloadStore>, Arc<CountingTelemetry>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let env: Box<dyn clientq::DurableEnvironment> =
        Box::new(FjallEnvironment::open(dir.path(), 0).unwrap());
    let payload_store = Arc::new(InMemoryPayloadStore::new());
    let telemetry = Arc::new(CountingTelemetry::default());
    let engine = QueueEngine::new(vec![env], qos0_memory_limit, 64, payload_store.clone(), telemetry.clone());
    (engine, payload_store, telemetry, dir)
}

fn publish(payload_store: &InMemoryPayloadStore, payload_id: u64, qos: QoS, unique_id: &str) -> NewPublish {
    payload_store.increment(payload_id);
    NewPublish {
        payload_id,
        topic: "a/b".to_string(),
        qos,
        expiry_interval_secs: None,
        unique_id: unique_id.to_string(),
        retain: false,
    }
}

#[test]
fn scenario_1_add_then_read_new_assigns_packet_id() {
    let (engine, payload_store, _telemetry, _dir) = new_engine(u64::MAX);
    let key = QueueKey::session("c");

    engine
        .add(&key, publish(&payload_store, 1, QoS::AtLeastOnce, "u1"), 10, OverflowStrategy::Discard, 0)
        .unwrap();

    let delivered = engine.read_new(&key, &[5], u64::MAX, 0).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].unique_id, "u1");
    assert_eq!(delivered[0].packet_id, 5);
    assert_eq!(engine.size(&key, 0), 1);
}

#[test]
fn scenario_2_remove_acknowledges_and_releases_payload() {
    let (engine, payload_store, _telemetry, _dir) = new_engine(u64::MAX);
    let key = QueueKey::session("c");

    engine
        .add(&key, publish(&payload_store, 1, QoS::AtLeastOnce, "u1"), 10, OverflowStrategy::Discard, 0)
        .unwrap();
    engine.read_new(&key, &[5], u64::MAX, 0).unwrap();

    let removed = engine.remove(&key, 5, Some("u1"), 0).unwrap();
    assert_eq!(removed.as_deref(), Some("u1"));
    assert_eq!(engine.size(&key, 0), 0);
    assert_eq!(payload_store.ref_count(1), 0);
}

#[test]
fn scenario_3_discard_oldest_keeps_two_most_recent() {
    let (engine, payload_store, telemetry, _dir) = new_engine(u64::MAX);
    let key = QueueKey::session("c");

    for (payload_id, unique_id) in [(1, "u1"), (2, "u2"), (3, "u3")] {
        engine
            .add(
                &key,
                publish(&payload_store, payload_id, QoS::AtLeastOnce, unique_id),
                2,
                OverflowStrategy::DiscardOldest,
                0,
            )
            .unwrap();
    }

    assert_eq!(engine.size(&key, 0), 2);
    assert_eq!(payload_store.ref_count(1), 0, "oldest entry's payload ref should be released");
    assert_eq!(payload_store.ref_count(2), 1);
    assert_eq!(payload_store.ref_count(3), 1);
    assert_eq!(telemetry.queue_full.load(Ordering::Relaxed), 1);

    let delivered = engine.read_new(&key, &[1, 2], u64::MAX, 0).unwrap();
    let unique_ids: Vec<&str> = delivered.iter().map(|p| p.unique_id.as_str()).collect();
    assert_eq!(unique_ids, vec!["u2", "u3"]);
}

#[test]
fn scenario_4_qos2_publish_pubrec_pubcomp_lifecycle() {
    let (engine, payload_store, _telemetry, _dir) = new_engine(u64::MAX);
    let key = QueueKey::session("c");

    engine
        .add(&key, publish(&payload_store, 9, QoS::ExactlyOnce, "u9"), 10, OverflowStrategy::Discard, 0)
        .unwrap();

    let delivered = engine.read_new(&key, &[7], u64::MAX, 0).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].packet_id, 7);

    let replaced = engine.replace(&key, ReleaseEntry { packet_id: 7 }, 0).unwrap();
    assert_eq!(replaced.as_deref(), Some("u9"));
    assert_eq!(payload_store.ref_count(9), 0);

    let inflight = engine.read_inflight(&key, 10, u64::MAX, 0).unwrap();
    assert_eq!(inflight.len(), 1);
    assert!(matches!(inflight[0], Entry::Release(r) if r.packet_id == 7));

    engine.remove(&key, 7, None, 0).unwrap();
    assert_eq!(engine.size(&key, 0), 0);
}

#[test]
fn scenario_5_bootstrap_recovers_size_refs_and_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let key = QueueKey::session("bootstrap-client");
    const N: u64 = 4;
    let mut last_index_before_restart = 0i64;

    {
        let env: Box<dyn clientq::DurableEnvironment> = Box::new(FjallEnvironment::open(dir.path(), 0).unwrap());
        let payload_store = Arc::new(InMemoryPayloadStore::new());
        let telemetry = Arc::new(CountingTelemetry::default());
        let engine = QueueEngine::new(vec![env], u64::MAX, 64, payload_store.clone(), telemetry);
        for i in 0..N {
            engine
                .add(&key, publish(&payload_store, i, QoS::AtLeastOnce, &format!("u{i}")), 100, OverflowStrategy::Discard, 0)
                .unwrap();
        }
        last_index_before_restart = clientq::INITIAL_INDEX_WATERMARK + N as i64 - 1;
    }

    // Restart: a fresh engine bootstraps itself from the durable store left
    // behind above instead of starting from empty bookkeeping.
    let env: Box<dyn clientq::DurableEnvironment> = Box::new(FjallEnvironment::open(dir.path(), 0).unwrap());
    let payload_store = Arc::new(InMemoryPayloadStore::new());
    let telemetry = Arc::new(CountingTelemetry::default());
    let engine = QueueEngine::bootstrap(vec![env], u64::MAX, 64, payload_store.clone(), telemetry).unwrap();

    assert_eq!(engine.size(&key, 0), N as usize);
    assert_eq!(payload_store.total_references(), N as i64);

    // A publish added after restart must receive an index past everything
    // recovered, preserving FIFO order across the restart boundary.
    engine
        .add(&key, publish(&payload_store, 99, QoS::AtLeastOnce, "u-after-restart"), 100, OverflowStrategy::Discard, 0)
        .unwrap();
    let delivered = engine.read_new(&key, &[1, 2, 3, 4, 5], u64::MAX, 0).unwrap();
    assert_eq!(delivered.len(), N as usize + 1);
    assert_eq!(delivered.last().unwrap().unique_id, "u-after-restart");
    assert!(last_index_before_restart >= clientq::INITIAL_INDEX_WATERMARK);
}

#[test]
fn scenario_6_qos0_memory_pressure_drops_only_qos0() {
    let (engine, payload_store, telemetry, _dir) = new_engine(1);
    let key = QueueKey::session("c");

    engine
        .add(&key, publish(&payload_store, 1, QoS::AtMostOnce, "u1"), 10, OverflowStrategy::Discard, 0)
        .unwrap();
    assert_eq!(engine.qos0_size(&key, 0), 1);

    engine
        .add(&key, publish(&payload_store, 2, QoS::AtMostOnce, "u2"), 10, OverflowStrategy::Discard, 0)
        .unwrap();
    assert_eq!(engine.qos0_size(&key, 0), 1, "second QoS 0 publish should be dropped over the memory limit");
    assert_eq!(payload_store.ref_count(2), 0);
    assert_eq!(telemetry.qos0_memory_exceeded.load(Ordering::Relaxed), 1);

    engine
        .add(&key, publish(&payload_store, 3, QoS::AtLeastOnce, "u3"), 10, OverflowStrategy::Discard, 0)
        .unwrap();
    assert_eq!(engine.size(&key, 0), 2, "qos 1 add is unaffected by the qos0 memory budget");
}

#[test]
fn from_config_opens_one_environment_per_bucket_and_resolves_qos0_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        bucket_count: 3,
        qos0_memory_hard_limit_divisor: 4,
        qos0_node_overhead_bytes: 64,
        data_dir: dir.path().to_path_buf(),
    };
    let payload_store = Arc::new(InMemoryPayloadStore::new());
    let telemetry = Arc::new(NoopQueueTelemetry);
    let engine = QueueEngine::from_config(&config, 4_000, payload_store, telemetry).unwrap();

    assert_eq!(engine.shard_count(), 3);
    assert_eq!(engine.qos0_memory_limit(), 1_000);
}
