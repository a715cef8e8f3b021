//! Bootstrap scanner: rebuilds per-queue size counters and payload
//! reference counts, and recovers the monotone entry-index watermark, by
//! scanning each shard's durable store once before the engine serves
//! traffic.

use ahash::AHashMap;

use crate::queue::durable::{DurableEnvironment, ScanRead};
use crate::queue::entry::{self, Entry};
use crate::queue::error::Result;
use crate::queue::key::{self, QueueKey, INITIAL_INDEX_WATERMARK};
use crate::queue::payload::PayloadStore;

/// Recovered state from scanning one shard: its queue sizes and the
/// highest entry index observed, if any.
pub struct ShardBootstrap {
    pub sizes: AHashMap<QueueKey, usize>,
    pub max_index: Option<i64>,
}

/// Scans one shard's entire durable environment, replaying payload
/// reference-count increments for every publish entry found and
/// accumulating per-queue-key sizes. Entries for a given queue key are
/// contiguous in key order, so a running count per key is equivalent to
/// materializing counts at queue-key boundaries — this crate takes the
/// simpler of the two, not boundary detection.
///
/// Does not touch the in-memory QoS 0 layer, which holds nothing across a
/// restart.
pub fn bootstrap_shard(environment: &dyn DurableEnvironment, payload_store: &dyn PayloadStore) -> Result<ShardBootstrap> {
    let mut sizes: AHashMap<QueueKey, usize> = AHashMap::default();
    let mut max_index: Option<i64> = None;

    let mut cursor = environment.read_only()?;
    cursor.seek_range(&[]);
    while cursor.next() {
        let Some(entry_key) = cursor.current_key() else {
            break;
        };
        let queue_key = key::deserialize_queue_key(entry_key);
        let index = key::deserialize_index(entry_key);
        let value = cursor.current_value();

        if let Some(qk) = queue_key {
            *sizes.entry(qk).or_insert(0) += 1;
        }
        if let Some(index) = index {
            max_index = Some(max_index.map_or(index, |m: i64| m.max(index)));
        }
        if let Some(Entry::Publish(publish)) = value.and_then(entry::deserialize_entry) {
            payload_store.increment_on_bootstrap(publish.payload_id);
        }
    }

    if let Some(err) = cursor.take_error() {
        return Err(err);
    }

    Ok(ShardBootstrap { sizes, max_index })
}

/// Combines every shard's [`ShardBootstrap::max_index`] into the global
/// next-index watermark, defaulting to `i64::MAX / 2` on a fresh start.
///
/// `max_index` is the highest *used* index found in any shard; the
/// watermark handed to the allocator must be one past that, or the first
/// post-restart `add` would reuse it and overwrite the last recovered entry
/// instead of appending a new one.
pub fn resolve_watermark(shard_results: &[ShardBootstrap]) -> i64 {
    match shard_results.iter().filter_map(|s| s.max_index).max() {
        Some(max_index) => (max_index + 1).max(INITIAL_INDEX_WATERMARK),
        None => INITIAL_INDEX_WATERMARK,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::queue::engine::{NewPublish, OverflowStrategy, QueueEngine};
    use crate::queue::fjall_env::FjallEnvironment;
    use crate::queue::payload::InMemoryPayloadStore;
    use crate::queue::telemetry::NoopQueueTelemetry;
    use crate::queue::QueueKey;
    use crate::protocol::QoS;

    use super::*;

    #[test]
    fn replays_increments_and_recovers_watermark() {
        let dir = tempfile::tempdir().unwrap();

        {
            let env: Box<dyn DurableEnvironment> = Box::new(FjallEnvironment::open(&dir.path().join("shard"), 0).unwrap());
            let payload_store = Arc::new(InMemoryPayloadStore::new());
            let telemetry = Arc::new(NoopQueueTelemetry);
            let engine = QueueEngine::new(vec![env], u64::MAX, 64, payload_store.clone(), telemetry);
            let key = QueueKey::session("bootstrap-client");
            for i in 0..5u64 {
                payload_store.increment(i);
                engine
                    .add(
                        &key,
                        NewPublish {
                            payload_id: i,
                            topic: "t".to_string(),
                            qos: QoS::AtLeastOnce,
                            expiry_interval_secs: None,
                            unique_id: format!("u{i}"),
                            retain: false,
                        },
                        100,
                        OverflowStrategy::Discard,
                        0,
                    )
                    .unwrap();
            }
        }

        let env = FjallEnvironment::open(&dir.path().join("shard"), 0).unwrap();
        let payload_store = InMemoryPayloadStore::new();
        let result = bootstrap_shard(&env, &payload_store).unwrap();

        let key = QueueKey::session("bootstrap-client");
        assert_eq!(result.sizes.get(&key), Some(&5));
        assert_eq!(payload_store.total_references(), 5);
        assert!(result.max_index.unwrap() >= INITIAL_INDEX_WATERMARK);
        assert_eq!(resolve_watermark(&[result]), INITIAL_INDEX_WATERMARK + 5);
    }

    #[test]
    fn empty_shard_resolves_default_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let env = FjallEnvironment::open(dir.path(), 0).unwrap();
        let payload_store = InMemoryPayloadStore::new();
        let result = bootstrap_shard(&env, &payload_store).unwrap();
        assert!(result.sizes.is_empty());
        assert_eq!(resolve_watermark(&[result]), INITIAL_INDEX_WATERMARK);
    }
}
