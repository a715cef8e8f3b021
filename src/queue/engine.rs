//! Queue engine: the public operations of the per-client queue persistence
//! layer.
//!
//! One [`QueueEngine`] owns every shard. Each shard pairs a durable
//! environment ([`DurableEnvironment`]) with in-memory bookkeeping (queue
//! sizes and the QoS 0 lists of [`Qos0Shard`]) guarded by a
//! [`parking_lot::Mutex`]. The broker's thread dispatcher is expected to
//! route every call for a given shard to that shard's single owning thread;
//! [`QueueEngine::with_shard`] records and asserts that ownership rather
//! than relying on it silently, since a violation is a programming error
//! that must fail fast.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use ahash::AHashMap;
use ahash::AHasher;
use parking_lot::Mutex;
use tracing::info;

use crate::protocol::QoS;
use crate::queue::bootstrap::{self, ShardBootstrap};
use crate::queue::config::QueueConfig;
use crate::queue::durable::{self, DurableEnvironment, ScanControl, ScanRead, ScanWrite};
use crate::queue::entry::{self, Entry, PublishEntry, ReleaseEntry, NO_PACKET_ID};
use crate::queue::error::Result;
use crate::queue::fjall_env::FjallEnvironment;
use crate::queue::key::{self, QueueKey, INITIAL_INDEX_WATERMARK};
use crate::queue::memory::{Qos0Memory, Qos0Shard};
use crate::queue::payload::PayloadStore;
use crate::queue::telemetry::QueueTelemetry;

/// Overflow policy for a durable queue at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Drop the incoming message.
    Discard,
    /// Evict the oldest queued (not in-flight) entry to make room.
    DiscardOldest,
}

/// A publish handed to [`QueueEngine::add`]. The caller is assumed to already
/// hold one payload-store reference on `payload_id` on the caller's behalf;
/// `add` either transfers that reference to the resident entry or releases
/// it if the message is dropped (see [`crate::queue::payload`]).
#[derive(Debug, Clone)]
pub struct NewPublish {
    pub payload_id: u64,
    pub topic: String,
    pub qos: QoS,
    pub expiry_interval_secs: Option<u32>,
    pub unique_id: String,
    pub retain: bool,
}

struct ShardState {
    sizes: AHashMap<QueueKey, usize>,
    qos0: Qos0Shard,
    owner_thread: Option<ThreadId>,
}

impl ShardState {
    fn new() -> Self {
        Self::with_sizes(AHashMap::default())
    }

    fn with_sizes(sizes: AHashMap<QueueKey, usize>) -> Self {
        Self {
            sizes,
            qos0: Qos0Shard::new(),
            owner_thread: None,
        }
    }
}

pub struct QueueEngine {
    shards: Vec<Mutex<ShardState>>,
    environments: Vec<Box<dyn DurableEnvironment>>,
    qos0_memory: Qos0Memory,
    payload_store: Arc<dyn PayloadStore>,
    telemetry: Arc<dyn QueueTelemetry>,
    next_index: AtomicI64,
    stopped: AtomicBool,
}

impl QueueEngine {
    /// Builds an engine over one durable environment per shard, starting
    /// from empty in-memory bookkeeping (no bootstrap scan). `environments.len()`
    /// fixes the shard count (`PERSISTENCE_BUCKET_COUNT`) for this engine's
    /// lifetime. Use [`QueueEngine::bootstrap`] instead when the
    /// environments may already hold entries from a prior run.
    pub fn new(
        environments: Vec<Box<dyn DurableEnvironment>>,
        qos0_memory_limit: u64,
        qos0_node_overhead_bytes: u64,
        payload_store: Arc<dyn PayloadStore>,
        telemetry: Arc<dyn QueueTelemetry>,
    ) -> Self {
        let shards = environments.iter().map(|_| Mutex::new(ShardState::new())).collect();
        Self {
            shards,
            environments,
            qos0_memory: Qos0Memory::new(qos0_memory_limit, qos0_node_overhead_bytes),
            payload_store,
            telemetry,
            next_index: AtomicI64::new(INITIAL_INDEX_WATERMARK),
            stopped: AtomicBool::new(false),
        }
    }

    /// Builds an engine by first running the bootstrap scanner over every
    /// shard's durable environment: replays payload reference-count
    /// increments, rebuilds each queue key's size counter, and recovers the
    /// monotone entry-index watermark. Must be called before the engine
    /// starts serving traffic.
    pub fn bootstrap(
        environments: Vec<Box<dyn DurableEnvironment>>,
        qos0_memory_limit: u64,
        qos0_node_overhead_bytes: u64,
        payload_store: Arc<dyn PayloadStore>,
        telemetry: Arc<dyn QueueTelemetry>,
    ) -> Result<Self> {
        let mut shard_results: Vec<ShardBootstrap> = Vec::with_capacity(environments.len());
        for environment in &environments {
            shard_results.push(bootstrap::bootstrap_shard(environment.as_ref(), payload_store.as_ref())?);
        }
        let watermark = bootstrap::resolve_watermark(&shard_results);

        let shards = shard_results
            .into_iter()
            .enumerate()
            .map(|(shard_index, result)| {
                info!(
                    shard = shard_index,
                    recovered_queues = result.sizes.len(),
                    watermark,
                    "recovered client queue state from durable store"
                );
                Mutex::new(ShardState::with_sizes(result.sizes))
            })
            .collect();

        Ok(Self {
            shards,
            environments,
            qos0_memory: Qos0Memory::new(qos0_memory_limit, qos0_node_overhead_bytes),
            payload_store,
            telemetry,
            next_index: AtomicI64::new(watermark),
            stopped: AtomicBool::new(false),
        })
    }

    /// Opens one [`FjallEnvironment`] per `config.bucket_count` shard under
    /// `config.data_dir` and bootstraps recovered state from each, the way
    /// an embedding broker wires its persistence layer together at startup.
    pub fn from_config(
        config: &QueueConfig,
        max_heap_bytes: u64,
        payload_store: Arc<dyn PayloadStore>,
        telemetry: Arc<dyn QueueTelemetry>,
    ) -> Result<Self> {
        let mut environments: Vec<Box<dyn DurableEnvironment>> = Vec::with_capacity(config.bucket_count);
        for shard_index in 0..config.bucket_count {
            environments.push(Box::new(FjallEnvironment::open(&config.data_dir, shard_index)?));
        }
        Self::bootstrap(
            environments,
            config.resolve_qos0_limit(max_heap_bytes),
            config.qos0_node_overhead_bytes,
            payload_store,
            telemetry,
        )
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn qos0_memory_usage(&self) -> u64 {
        self.qos0_memory.used()
    }

    pub fn qos0_memory_limit(&self) -> u64 {
        self.qos0_memory.limit()
    }

    /// Short-circuits [`QueueEngine::clean_up`] to a no-op.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Restores the next-index watermark recovered by the bootstrap
    /// scanner. Must be called, if at all, before the engine starts serving
    /// traffic.
    pub fn restore_index_watermark(&self, watermark: i64) {
        self.next_index.store(watermark.max(INITIAL_INDEX_WATERMARK), Ordering::Relaxed);
    }

    /// Convenience hash of a queue key into a shard index. The thread
    /// dispatcher that owns shard routing is out of scope for this crate;
    /// this exists so the engine is directly usable without reimplementing
    /// the same hash at every call site.
    pub fn bucket_for(&self, key: &QueueKey) -> usize {
        let mut hasher = AHasher::default();
        key.queue_id.hash(&mut hasher);
        key.shared.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn with_shard<R>(&self, bucket_index: usize, f: impl FnOnce(&mut ShardState) -> R) -> R {
        let mut guard = self.shards[bucket_index].lock();
        let current = std::thread::current().id();
        match guard.owner_thread {
            None => guard.owner_thread = Some(current),
            Some(owner) => assert_eq!(
                owner, current,
                "shard {bucket_index} accessed from a thread other than its single writer"
            ),
        }
        f(&mut guard)
    }

    fn allocate_index(&self) -> i64 {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    fn build_publish_entry(&self, publish: NewPublish) -> PublishEntry {
        PublishEntry {
            payload_id: publish.payload_id,
            topic: publish.topic,
            qos: publish.qos,
            expiry_interval_secs: publish.expiry_interval_secs,
            timestamp_secs: now_secs(),
            unique_id: publish.unique_id,
            packet_id: NO_PACKET_ID,
            dup: false,
            retain: publish.retain,
        }
    }

    fn emit_queue_full(&self, key: &QueueKey, topic: &str, qos: QoS) {
        if key.shared {
            self.telemetry.queue_full_shared(&key.queue_id, topic, qos);
        } else {
            self.telemetry.queue_full(&key.queue_id, topic, qos);
        }
    }

    fn emit_qos0_exceeded(&self, key: &QueueKey, topic: &str, qos: QoS) {
        let current = self.qos0_memory.used();
        let limit = self.qos0_memory.limit();
        if key.shared {
            self.telemetry.qos0_memory_exceeded_shared(&key.queue_id, topic, qos, current, limit);
        } else {
            self.telemetry.qos0_memory_exceeded(&key.queue_id, topic, qos, current, limit);
        }
    }

    /// `add(queueId, shared, publish, max, strategy, bucketIndex)`.
    pub fn add(
        &self,
        key: &QueueKey,
        publish: NewPublish,
        max: usize,
        strategy: OverflowStrategy,
        bucket_index: usize,
    ) -> Result<()> {
        if publish.qos == QoS::AtMostOnce {
            self.add_qos0(key, publish, bucket_index);
            Ok(())
        } else {
            self.add_durable(key, publish, max, strategy, bucket_index)
        }
    }

    fn add_qos0(&self, key: &QueueKey, publish: NewPublish, bucket_index: usize) {
        if self.qos0_memory.over_limit() {
            self.emit_qos0_exceeded(key, &publish.topic, QoS::AtMostOnce);
            self.payload_store.decrement(publish.payload_id);
            return;
        }
        let entry = self.build_publish_entry(publish);
        self.with_shard(bucket_index, |shard| {
            shard.qos0.push(&self.qos0_memory, key, entry);
            *shard.sizes.entry(key.clone()).or_insert(0) += 1;
        });
    }

    fn add_durable(
        &self,
        key: &QueueKey,
        publish: NewPublish,
        max: usize,
        strategy: OverflowStrategy,
        bucket_index: usize,
    ) -> Result<()> {
        let topic = publish.topic.clone();
        let qos = publish.qos;
        let payload_id = publish.payload_id;
        let entry = self.build_publish_entry(publish);

        let non_zero_size = self.with_shard(bucket_index, |shard| {
            let total = *shard.sizes.get(key).unwrap_or(&0);
            total - shard.qos0.len(key)
        });

        if non_zero_size >= max {
            let made_room = match strategy {
                OverflowStrategy::Discard => false,
                OverflowStrategy::DiscardOldest => self.discard_oldest(key, &topic, qos, bucket_index)?,
            };
            if !made_room {
                self.emit_queue_full(key, &topic, qos);
                self.payload_store.decrement(payload_id);
                return Ok(());
            }
        }

        let index = self.allocate_index();
        let entry_key = key::serialize_entry_key(key, index);
        let value = entry::serialize_publish_without_packet_id(&entry);
        let mut txn = self.environments[bucket_index].exclusive()?;
        txn.put(entry_key, value);
        txn.commit()?;

        self.with_shard(bucket_index, |shard| {
            *shard.sizes.entry(key.clone()).or_insert(0) += 1;
        });
        Ok(())
    }

    /// `discardOldest(queueKey) -> bool` (internal).
    fn discard_oldest(&self, key: &QueueKey, topic: &str, qos: QoS, bucket_index: usize) -> Result<bool> {
        let mut discarded_payload: Option<u64> = None;
        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, true, |cursor| {
                if let Some(Entry::Publish(p)) = cursor.current_value().and_then(entry::deserialize_entry) {
                    discarded_payload = Some(p.payload_id);
                }
                cursor.delete_current();
                Ok(ScanControl::Stop)
            })?;
            txn.commit()?;
        }

        match discarded_payload {
            Some(payload_id) => {
                self.payload_store.decrement(payload_id);
                self.emit_queue_full(key, topic, qos);
                self.with_shard(bucket_index, |shard| {
                    if let Some(count) = shard.sizes.get_mut(key) {
                        *count = count.saturating_sub(1);
                    }
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pops `key`'s QoS 0 head, if any, accounting size. `None` means the
    /// list was already empty; `Some(None)` means an expired entry was
    /// popped and silently dropped (payload ref released); `Some(Some(_))`
    /// is a non-expired entry ready to emit.
    fn pop_qos0_head(&self, key: &QueueKey, bucket_index: usize, now: u64) -> Option<Option<PublishEntry>> {
        let popped = self.with_shard(bucket_index, |shard| {
            let popped = shard.qos0.pop_front(&self.qos0_memory, key);
            if popped.is_some() {
                if let Some(count) = shard.sizes.get_mut(key) {
                    *count = count.saturating_sub(1);
                }
            }
            popped
        })?;
        if popped.is_expired(now) {
            self.payload_store.decrement(popped.payload_id);
            Some(None)
        } else {
            Some(Some(popped))
        }
    }

    fn drain_qos0_head(&self, key: &QueueKey, limit: usize, bucket_index: usize, now: u64) -> Vec<PublishEntry> {
        let mut results = Vec::new();
        while results.len() < limit {
            match self.pop_qos0_head(key, bucket_index, now) {
                Some(Some(publish)) => results.push(publish),
                Some(None) => continue,
                None => break,
            }
        }
        results
    }

    /// `readNew(queueId, shared, packetIds, bytesLimit, bucketIndex)`.
    pub fn read_new(
        &self,
        key: &QueueKey,
        packet_ids: &[u16],
        bytes_limit: u64,
        bucket_index: usize,
    ) -> Result<Vec<PublishEntry>> {
        let now = now_secs();
        let (total_size, qos0_count) =
            self.with_shard(bucket_index, |shard| (*shard.sizes.get(key).unwrap_or(&0), shard.qos0.len(key)));

        if total_size == 0 {
            return Ok(Vec::new());
        }
        if total_size == qos0_count {
            return Ok(self.drain_qos0_head(key, packet_ids.len(), bucket_index, now));
        }

        let mut results = Vec::new();
        let mut bytes: u64 = 0;
        let mut packet_id_index = 0usize;
        let mut expired_payload_ids: Vec<u64> = Vec::new();

        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, true, |cursor| {
                let Some(value) = cursor.current_value().map(<[u8]>::to_vec) else {
                    return Ok(ScanControl::Stop);
                };
                let Some(Entry::Publish(mut publish)) = entry::deserialize_entry(&value) else {
                    return Ok(ScanControl::Stop);
                };

                if publish.is_expired(now) {
                    cursor.delete_current();
                    expired_payload_ids.push(publish.payload_id);
                } else if packet_id_index < packet_ids.len() {
                    let assigned = packet_ids[packet_id_index];
                    packet_id_index += 1;
                    cursor.put_current(entry::serialize_and_set_packet_id(&value, assigned));
                    publish.packet_id = assigned;
                    bytes += publish.estimated_size();
                    results.push(publish);
                }

                if let Some(Some(popped)) = self.pop_qos0_head(key, bucket_index, now) {
                    bytes += popped.estimated_size();
                    results.push(popped);
                }

                if results.len() >= packet_ids.len() || bytes > bytes_limit {
                    Ok(ScanControl::Stop)
                } else {
                    Ok(ScanControl::Continue)
                }
            })?;
            txn.commit()?;
        }

        if !expired_payload_ids.is_empty() {
            self.with_shard(bucket_index, |shard| {
                if let Some(count) = shard.sizes.get_mut(key) {
                    *count = count.saturating_sub(expired_payload_ids.len());
                }
            });
            for payload_id in expired_payload_ids {
                self.payload_store.decrement(payload_id);
            }
        }

        Ok(results)
    }

    /// `readInflight(clientId, shared, batchSize, bytesLimit, bucketIndex)`.
    pub fn read_inflight(
        &self,
        key: &QueueKey,
        batch_size: usize,
        bytes_limit: u64,
        bucket_index: usize,
    ) -> Result<Vec<Entry>> {
        let mut results = Vec::new();
        let mut bytes: u64 = 0;
        let mut txn = self.environments[bucket_index].read_only()?;
        durable::scan(&mut *txn, key, false, |cursor| {
            let Some(value) = cursor.current_value() else {
                return Ok(ScanControl::Stop);
            };
            let Some(mut parsed) = entry::deserialize_entry(value) else {
                return Ok(ScanControl::Stop);
            };
            if !parsed.is_in_flight() {
                return Ok(ScanControl::Stop);
            }
            if let Entry::Publish(ref mut p) = parsed {
                p.dup = true;
                bytes += p.estimated_size();
            }
            results.push(parsed);
            if results.len() >= batch_size || bytes > bytes_limit {
                Ok(ScanControl::Stop)
            } else {
                Ok(ScanControl::Continue)
            }
        })?;
        Ok(results)
    }

    /// `replace(clientId, release, bucketIndex)`.
    pub fn replace(&self, key: &QueueKey, release: ReleaseEntry, bucket_index: usize) -> Result<Option<String>> {
        let mut replaced_unique_id: Option<String> = None;
        let mut found = false;
        let mut payload_to_release: Option<u64> = None;

        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, false, |cursor| {
                let Some(value) = cursor.current_value() else {
                    return Ok(ScanControl::Stop);
                };
                let Some(parsed) = entry::deserialize_entry(value) else {
                    return Ok(ScanControl::Stop);
                };
                if !parsed.is_in_flight() {
                    return Ok(ScanControl::Stop);
                }
                if parsed.packet_id() != release.packet_id {
                    return Ok(ScanControl::Continue);
                }
                found = true;
                if let Entry::Publish(p) = &parsed {
                    replaced_unique_id = Some(p.unique_id.clone());
                    payload_to_release = Some(p.payload_id);
                }
                cursor.put_current(entry::serialize_release(&release));
                Ok(ScanControl::Stop)
            })?;
            txn.commit()?;
        }

        if let Some(payload_id) = payload_to_release {
            self.payload_store.decrement(payload_id);
        }

        if !found {
            let index = self.allocate_index();
            let entry_key = key::serialize_entry_key(key, index);
            let value = entry::serialize_release(&release);
            let mut txn = self.environments[bucket_index].exclusive()?;
            txn.put(entry_key, value);
            txn.commit()?;
            self.with_shard(bucket_index, |shard| {
                *shard.sizes.entry(key.clone()).or_insert(0) += 1;
            });
        }

        Ok(replaced_unique_id)
    }

    /// `remove(clientId, packetId, uniqueIdOpt, bucketIndex)`.
    pub fn remove(
        &self,
        key: &QueueKey,
        packet_id: u16,
        unique_id: Option<&str>,
        bucket_index: usize,
    ) -> Result<Option<String>> {
        let mut result: Option<String> = None;
        let mut removed = false;
        let mut payload_to_release: Option<u64> = None;

        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, false, |cursor| {
                let Some(value) = cursor.current_value() else {
                    return Ok(ScanControl::Stop);
                };
                let Some(parsed) = entry::deserialize_entry(value) else {
                    return Ok(ScanControl::Stop);
                };
                if parsed.packet_id() != packet_id {
                    return Ok(ScanControl::Continue);
                }
                if let Entry::Publish(p) = &parsed {
                    if let Some(expected) = unique_id {
                        if p.unique_id != expected {
                            return Ok(ScanControl::Stop);
                        }
                    }
                    result = Some(p.unique_id.clone());
                    payload_to_release = Some(p.payload_id);
                }
                cursor.delete_current();
                removed = true;
                Ok(ScanControl::Stop)
            })?;
            txn.commit()?;
        }

        if removed {
            if let Some(payload_id) = payload_to_release {
                self.payload_store.decrement(payload_id);
            }
            self.with_shard(bucket_index, |shard| {
                if let Some(count) = shard.sizes.get_mut(key) {
                    *count = count.saturating_sub(1);
                }
            });
        }

        Ok(result)
    }

    /// `clear(queueId, shared, bucketIndex)`.
    pub fn clear(&self, key: &QueueKey, bucket_index: usize) -> Result<()> {
        let mut released_payloads: Vec<u64> = Vec::new();
        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, false, |cursor| {
                if let Some(Entry::Publish(p)) = cursor.current_value().and_then(entry::deserialize_entry) {
                    released_payloads.push(p.payload_id);
                }
                cursor.delete_current();
                Ok(ScanControl::Continue)
            })?;
            txn.commit()?;
        }

        for payload_id in released_payloads {
            self.payload_store.decrement(payload_id);
        }

        self.with_shard(bucket_index, |shard| {
            let drained = shard.qos0.drain(&self.qos0_memory, key);
            for entry in drained {
                self.payload_store.decrement(entry.payload_id);
            }
            shard.sizes.remove(key);
        });

        Ok(())
    }

    /// `removeAllQos0Messages(queueId, shared, bucketIndex)`.
    pub fn remove_all_qos0_messages(&self, key: &QueueKey, bucket_index: usize) {
        self.with_shard(bucket_index, |shard| {
            let drained = shard.qos0.drain(&self.qos0_memory, key);
            let count = drained.len();
            for entry in drained {
                self.payload_store.decrement(entry.payload_id);
            }
            if let Some(size) = shard.sizes.get_mut(key) {
                *size = size.saturating_sub(count);
            }
        });
    }

    /// `removeShared(groupName, uniqueId, bucketIndex)`.
    pub fn remove_shared(&self, group_name: &str, unique_id: &str, bucket_index: usize) -> Result<()> {
        let key = QueueKey::shared(group_name);
        let mut removed = false;
        let mut payload_to_release: Option<u64> = None;

        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, &key, false, |cursor| {
                let Some(value) = cursor.current_value() else {
                    return Ok(ScanControl::Stop);
                };
                match entry::deserialize_entry(value) {
                    Some(Entry::Publish(p)) if p.unique_id == unique_id => {
                        payload_to_release = Some(p.payload_id);
                        cursor.delete_current();
                        removed = true;
                        Ok(ScanControl::Stop)
                    }
                    Some(Entry::Publish(_)) => Ok(ScanControl::Continue),
                    _ => Ok(ScanControl::Stop),
                }
            })?;
            txn.commit()?;
        }

        if removed {
            if let Some(payload_id) = payload_to_release {
                self.payload_store.decrement(payload_id);
            }
            self.with_shard(bucket_index, |shard| {
                if let Some(count) = shard.sizes.get_mut(&key) {
                    *count = count.saturating_sub(1);
                }
            });
        }

        Ok(())
    }

    /// `removeInflightMarker(groupName, uniqueId, bucketIndex)`.
    pub fn remove_inflight_marker(&self, group_name: &str, unique_id: &str, bucket_index: usize) -> Result<()> {
        let key = QueueKey::shared(group_name);
        let mut txn = self.environments[bucket_index].exclusive()?;
        durable::scan(&mut *txn, &key, false, |cursor| {
            let Some(value) = cursor.current_value() else {
                return Ok(ScanControl::Stop);
            };
            match entry::deserialize_entry(value) {
                Some(Entry::Publish(p)) if p.unique_id == unique_id => {
                    let reset = entry::serialize_and_set_packet_id(value, NO_PACKET_ID);
                    cursor.put_current(reset);
                    Ok(ScanControl::Stop)
                }
                Some(Entry::Publish(_)) => Ok(ScanControl::Continue),
                _ => Ok(ScanControl::Stop),
            }
        })?;
        txn.commit()
    }

    /// `size(queueId, shared, bucketIndex)`.
    pub fn size(&self, key: &QueueKey, bucket_index: usize) -> usize {
        self.with_shard(bucket_index, |shard| *shard.sizes.get(key).unwrap_or(&0))
    }

    /// `qos0Size(queueId, shared, bucketIndex)`.
    pub fn qos0_size(&self, key: &QueueKey, bucket_index: usize) -> usize {
        self.with_shard(bucket_index, |shard| shard.qos0.len(key))
    }

    /// `cleanUp(bucketIndex) -> set of shared queue names`.
    pub fn clean_up(&self, bucket_index: usize) -> Result<HashSet<String>> {
        if self.is_stopped() {
            return Ok(HashSet::new());
        }

        let keys: Vec<QueueKey> = self.with_shard(bucket_index, |shard| shard.sizes.keys().cloned().collect());

        let mut shared_queue_ids = HashSet::new();
        for key in &keys {
            self.sweep_expired(key, bucket_index)?;
            if key.shared {
                shared_queue_ids.insert(key.queue_id.clone());
            }
        }

        Ok(shared_queue_ids)
    }

    /// Expiration sweep (internal).
    fn sweep_expired(&self, key: &QueueKey, bucket_index: usize) -> Result<()> {
        let now = now_secs();

        let expired_qos0 = self.with_shard(bucket_index, |shard| shard.qos0.retain_unexpired(&self.qos0_memory, key, now));
        if let Some(expired) = expired_qos0 {
            if !expired.is_empty() {
                self.with_shard(bucket_index, |shard| {
                    if let Some(count) = shard.sizes.get_mut(key) {
                        *count = count.saturating_sub(expired.len());
                    }
                });
                for entry in expired {
                    self.payload_store.decrement(entry.payload_id);
                }
            }
        }

        let mut released_payloads: Vec<u64> = Vec::new();
        {
            let mut txn = self.environments[bucket_index].exclusive()?;
            durable::scan(&mut *txn, key, false, |cursor| {
                let Some(value) = cursor.current_value() else {
                    return Ok(ScanControl::Stop);
                };
                let Some(Entry::Publish(p)) = entry::deserialize_entry(value) else {
                    return Ok(ScanControl::Continue);
                };
                if !p.is_expired(now) {
                    return Ok(ScanControl::Continue);
                }
                if p.qos == QoS::ExactlyOnce && p.packet_id != NO_PACKET_ID {
                    return Ok(ScanControl::Continue);
                }
                released_payloads.push(p.payload_id);
                cursor.delete_current();
                Ok(ScanControl::Continue)
            })?;
            txn.commit()?;
        }

        if !released_payloads.is_empty() {
            self.with_shard(bucket_index, |shard| {
                if let Some(count) = shard.sizes.get_mut(key) {
                    *count = count.saturating_sub(released_payloads.len());
                }
            });
            for payload_id in released_payloads {
                self.payload_store.decrement(payload_id);
            }
        }

        Ok(())
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
impl QueueEngine {
    /// Recomputes `size == durable count + qos0 len` and
    /// `qos0MemoryBytes == Σ(estimatedSize + NODE_OVERHEAD)` for `key`
    /// independently of the running counters the engine itself maintains
    /// incrementally, and panics if either has drifted. Test-only: a
    /// production caller has no reason to pay for a full re-scan.
    fn assert_invariants_for(&self, key: &QueueKey, bucket_index: usize) {
        let mut durable_count = 0usize;
        {
            let mut txn = self.environments[bucket_index].read_only().expect("read_only txn");
            durable::scan(&mut *txn, key, false, |_| {
                durable_count += 1;
                Ok(ScanControl::Continue)
            })
            .expect("scan");
        }

        let (reported_size, qos0_len, qos0_bytes) = self.with_shard(bucket_index, |shard| {
            let qos0_bytes: u64 = shard
                .qos0
                .iter(key)
                .map(|p| p.estimated_size() + self.qos0_memory.node_overhead())
                .sum();
            (*shard.sizes.get(key).unwrap_or(&0), shard.qos0.len(key), qos0_bytes)
        });

        assert_eq!(reported_size, durable_count + qos0_len, "size counter drifted for {key:?}");
        assert_eq!(self.qos0_memory.used(), qos0_bytes, "qos0 memory counter drifted for {key:?}");
    }
}
