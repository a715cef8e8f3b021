//! Payload store interface (consumed).
//!
//! The real payload store — a content-addressed, reference-counted blob
//! cache — is out of scope for this crate; it lives alongside the broker's
//! other storage engines. The engine consumes exactly two of its
//! operations: `incrementReferenceCounterOnBootstrap` and
//! `decrementReferenceCounter`. The caller that hands a publish to `add`
//! holds the one reference that entry will own for its lifetime in this
//! queue (acquired before `add` is called, outside this crate); `add` either
//! lets that reference transfer to the resident entry (accepted) or releases
//! it itself (dropped for capacity). Every other departure — `remove`,
//! `replace`, `clear`, `removeAllQos0Messages`, `removeShared`, expiry —
//! releases the one reference the departing entry held. Restarting the
//! process loses the in-memory reference counts entirely, so bootstrap
//! scanning replays one increment per durable publish entry found.

pub trait PayloadStore: Send + Sync {
    /// Called once per publish entry recovered during bootstrap scanning,
    /// replaying the increments that would have happened had the broker
    /// never restarted.
    fn increment_on_bootstrap(&self, payload_id: u64);

    /// Called exactly once per publish entry leaving a queue: removed,
    /// replaced by a release marker, discarded for capacity, or expired.
    fn decrement(&self, payload_id: u64);
}

/// Reference [`PayloadStore`] used by this crate's own tests and
/// benchmarks. Not a production payload cache — it holds no actual payload
/// bytes, only reference counts, so the engine's tests can assert
/// one-ref-per-resident-publish without depending on the broker's real blob
/// store.
#[derive(Default)]
pub struct InMemoryPayloadStore {
    counts: dashmap::DashMap<u64, i64>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reference count for a payload id (0 if never referenced).
    pub fn ref_count(&self, payload_id: u64) -> i64 {
        self.counts.get(&payload_id).map(|c| *c).unwrap_or(0)
    }

    /// Sum of all positive reference counts; used by tests to assert global
    /// ref-count conservation.
    pub fn total_references(&self) -> i64 {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    /// Simulates the reference a real caller acquires before handing a
    /// publish to `QueueEngine::add`. Test-only: the production trait has no
    /// generic increment because the engine itself never calls one.
    pub fn increment(&self, payload_id: u64) {
        *self.counts.entry(payload_id).or_insert(0) += 1;
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn increment_on_bootstrap(&self, payload_id: u64) {
        *self.counts.entry(payload_id).or_insert(0) += 1;
    }

    fn decrement(&self, payload_id: u64) {
        let mut entry = self.counts.entry(payload_id).or_insert(0);
        *entry -= 1;
    }
}
