//! In-memory QoS 0 layer: per-shard `{queueKey -> ordered publish
//! list}`, backed by a global byte-usage counter shared across all shards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::queue::entry::PublishEntry;
use crate::queue::key::QueueKey;

/// Global QoS 0 memory accounting, shared by every shard's writer thread —
/// any shard's writer can mutate it, hence atomic.
pub struct Qos0Memory {
    used: AtomicU64,
    limit: u64,
    node_overhead: u64,
}

impl Qos0Memory {
    pub fn new(limit: u64, node_overhead: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            limit,
            node_overhead,
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Per-entry overhead added to a publish's estimated size when
    /// accounting QoS 0 memory usage (`QueueConfig::qos0_node_overhead_bytes`).
    pub fn node_overhead(&self) -> u64 {
        self.node_overhead
    }

    /// `add` must check this *before* admitting a new QoS 0 entry.
    pub fn over_limit(&self) -> bool {
        self.used() > self.limit
    }

    fn add(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    fn sub(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// One shard's QoS 0 lists. Not internally synchronized: a shard is
/// mutated by exactly one thread, so a plain (non-concurrent) map is
/// sufficient.
#[derive(Default)]
pub struct Qos0Shard {
    lists: AHashMap<QueueKey, VecDeque<PublishEntry>>,
}

impl Qos0Shard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, key: &QueueKey) -> usize {
        self.lists.get(key).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &QueueKey) -> bool {
        self.len(key) == 0
    }

    /// Appends a publish to the tail of `key`'s list and accounts its bytes
    /// against `memory`. Caller must have already checked
    /// [`Qos0Memory::over_limit`].
    pub fn push(&mut self, memory: &Qos0Memory, key: &QueueKey, publish: PublishEntry) {
        memory.add(publish.estimated_size() + memory.node_overhead());
        self.lists.entry(key.clone()).or_default().push_back(publish);
    }

    /// Removes and returns the head entry of `key`'s list, if any,
    /// accounting its bytes back out of `memory`.
    pub fn pop_front(&mut self, memory: &Qos0Memory, key: &QueueKey) -> Option<PublishEntry> {
        let list = self.lists.get_mut(key)?;
        let popped = list.pop_front();
        if let Some(ref p) = popped {
            memory.sub(p.estimated_size() + memory.node_overhead());
        }
        if list.is_empty() {
            self.lists.remove(key);
        }
        popped
    }

    pub fn front(&self, key: &QueueKey) -> Option<&PublishEntry> {
        self.lists.get(key).and_then(|l| l.front())
    }

    /// Iterates `key`'s list without removing anything, for checks that need
    /// to recompute the accounted byte total independently of the running
    /// counter.
    pub fn iter(&self, key: &QueueKey) -> impl Iterator<Item = &PublishEntry> {
        self.lists.get(key).into_iter().flatten()
    }

    /// Drains and returns every entry in `key`'s list, accounting all of
    /// their bytes back out of `memory` and removing the map slot (used by
    /// `clear` and `removeAllQos0Messages`).
    pub fn drain(&mut self, memory: &Qos0Memory, key: &QueueKey) -> VecDeque<PublishEntry> {
        match self.lists.remove(key) {
            Some(list) => {
                let freed: u64 = list
                    .iter()
                    .map(|p| p.estimated_size() + memory.node_overhead())
                    .sum();
                memory.sub(freed);
                list
            }
            None => VecDeque::new(),
        }
    }

    pub fn queue_keys(&self) -> impl Iterator<Item = &QueueKey> {
        self.lists.keys()
    }

    pub fn remove_queue(&mut self, key: &QueueKey) {
        self.lists.remove(key);
    }

    /// Removes every entry in `key`'s list whose expiry has elapsed,
    /// accounting their bytes back out of `memory` and leaving the
    /// non-expired entries in their original order. Returns the removed
    /// entries, or `None` if the queue has no list at all (used by the
    /// expiration sweep).
    pub fn retain_unexpired(
        &mut self,
        memory: &Qos0Memory,
        key: &QueueKey,
        now_secs: u64,
    ) -> Option<Vec<PublishEntry>> {
        let mut list = self.lists.remove(key)?;
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(list.len());
        for entry in list.drain(..) {
            if entry.is_expired(now_secs) {
                memory.sub(entry.estimated_size() + memory.node_overhead());
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        if !kept.is_empty() {
            self.lists.insert(key.clone(), kept);
        }
        Some(expired)
    }
}
