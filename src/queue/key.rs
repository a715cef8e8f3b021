//! Queue and entry key codec.
//!
//! A queue key identifies one client session queue or one shared-subscription
//! queue. Every durable entry key is `queueId bytes || shared flag (1 byte)
//! || entry index (8 bytes, big-endian)`. Big-endian index bytes keep entries
//! for one queue sorted by insertion order under plain lexicographic
//! comparison, which is what the durable store offers.

use std::sync::atomic::{AtomicI64, Ordering};

/// Reserves the upper half of the index space for this process's lifetime:
/// a fresh start (no bootstrap data) begins at `i64::MAX / 2`, leaving
/// headroom on either side for future schemes.
pub const INITIAL_INDEX_WATERMARK: i64 = i64::MAX / 2;

const SHARED_FLAG_LEN: usize = 1;
const INDEX_LEN: usize = 8;

/// Identifies one client session queue or one shared-subscription group
/// queue. `shared` disambiguates the two namespaces so that a client id and
/// a group name can collide without aliasing each other's queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub queue_id: String,
    pub shared: bool,
}

impl QueueKey {
    pub fn session(client_id: impl Into<String>) -> Self {
        Self {
            queue_id: client_id.into(),
            shared: false,
        }
    }

    pub fn shared(group_name: impl Into<String>) -> Self {
        Self {
            queue_id: group_name.into(),
            shared: true,
        }
    }
}

/// Result of comparing a durable entry key's prefix against a reference
/// queue key, used to drive the scan protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixMatch {
    /// The candidate's queue-id bytes equal the reference's, but the shared
    /// flag differs (or the candidate id is a strict extension sharing the
    /// same byte prefix) — the scan must step past it without yielding it.
    SamePrefix,
    /// The candidate is an entry of the reference queue key.
    Match,
    /// The candidate belongs to neither this queue key nor a same-prefix
    /// neighbor — the scan is done.
    NoMatch,
}

/// Serializes the seek prefix for a queue key: `queueId bytes || shared
/// flag`. This is not a full entry key (it has no index suffix) — it is used
/// only as the starting point of a range scan.
pub fn serialize_queue_key(key: &QueueKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.queue_id.len() + SHARED_FLAG_LEN);
    buf.extend_from_slice(key.queue_id.as_bytes());
    buf.push(key.shared as u8);
    buf
}

/// Serializes a full entry key with a freshly allocated monotone index.
/// `next_index` must come from the shard's index allocator; this function
/// does not allocate it.
pub fn serialize_entry_key(key: &QueueKey, index: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.queue_id.len() + SHARED_FLAG_LEN + INDEX_LEN);
    buf.extend_from_slice(key.queue_id.as_bytes());
    buf.push(key.shared as u8);
    buf.extend_from_slice(&(index as u64).to_be_bytes());
    buf
}

/// Deserializes the queue key embedded in a full entry key (queue-id bytes
/// plus shared flag, dropping the trailing index).
pub fn deserialize_queue_key(entry_key: &[u8]) -> Option<QueueKey> {
    if entry_key.len() < SHARED_FLAG_LEN + INDEX_LEN {
        return None;
    }
    let prefix_len = entry_key.len() - SHARED_FLAG_LEN - INDEX_LEN;
    let queue_id = String::from_utf8(entry_key[..prefix_len].to_vec()).ok()?;
    let shared = entry_key[prefix_len] != 0;
    Some(QueueKey { queue_id, shared })
}

/// Extracts the monotone entry index from a full entry key.
pub fn deserialize_index(entry_key: &[u8]) -> Option<i64> {
    if entry_key.len() < INDEX_LEN {
        return None;
    }
    let start = entry_key.len() - INDEX_LEN;
    let mut bytes = [0u8; INDEX_LEN];
    bytes.copy_from_slice(&entry_key[start..]);
    Some(u64::from_be_bytes(bytes) as i64)
}

/// Compares a candidate durable entry key against a reference queue key's
/// seek prefix, yielding SAME_PREFIX / MATCH / NO_MATCH.
///
/// The comparator exists because two queue keys can share a byte prefix —
/// `"c"` and `"c2"`, or `("c", shared=true)` vs `("c", shared=false)` — so a
/// plain `starts_with` seek is not sufficient to find the true range
/// boundary; the shared flag must be compared once the id bytes run out.
pub fn compare_client_id(reference: &QueueKey, candidate_key: &[u8]) -> PrefixMatch {
    let ref_id = reference.queue_id.as_bytes();
    if candidate_key.len() < SHARED_FLAG_LEN + INDEX_LEN {
        return PrefixMatch::NoMatch;
    }
    let candidate_id_len = candidate_key.len() - SHARED_FLAG_LEN - INDEX_LEN;
    let candidate_id = &candidate_key[..candidate_id_len];

    match candidate_id.cmp(ref_id) {
        std::cmp::Ordering::Less => PrefixMatch::NoMatch,
        std::cmp::Ordering::Greater => {
            if candidate_id.starts_with(ref_id) {
                PrefixMatch::SamePrefix
            } else {
                PrefixMatch::NoMatch
            }
        }
        std::cmp::Ordering::Equal => {
            let candidate_shared = candidate_key[candidate_id_len] != 0;
            if candidate_shared == reference.shared {
                PrefixMatch::Match
            } else {
                PrefixMatch::SamePrefix
            }
        }
    }
}
