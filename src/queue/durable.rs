//! Durable store adapter: a typed, cursor-based range scan abstraction
//! over one shard's ordered key-value environment, plus the scan protocol
//! shared by every queue-touching operation.
//!
//! The physical key-value engine is an external collaborator; this module
//! defines the interface the queue engine consumes
//! ([`DurableEnvironment`]) and the scan protocol built on top of it
//! ([`scan`]). [`crate::queue::fjall_env`] supplies the production
//! implementation backed by `fjall`.

use crate::queue::error::Result;
use crate::queue::key::{self, PrefixMatch, QueueKey};

/// A forward, read-only view over one shard's key range.
///
/// `seek_range` positions the cursor so that the *next* call to `next`
/// lands on the first key greater than or equal to `start`; a fresh cursor
/// yields nothing until `seek_range` has been called.
pub trait ScanRead {
    fn seek_range(&mut self, start: &[u8]);

    /// Advances to the next key in range order. Returns `false` once the
    /// range is exhausted (or a store error occurred — check
    /// [`ScanRead::take_error`]).
    fn next(&mut self) -> bool;

    fn current_key(&self) -> Option<&[u8]>;
    fn current_value(&self) -> Option<&[u8]>;

    /// Takes any store error observed during iteration. Callers must check
    /// this after a scan loop exits early due to `next` returning `false`.
    fn take_error(&mut self) -> Option<crate::queue::error::ClientQueueError>;
}

/// A [`ScanRead`] cursor that additionally supports mutation, for use inside
/// an exclusive transaction. Mutations are buffered and applied atomically
/// on [`ScanWrite::commit`].
pub trait ScanWrite: ScanRead {
    /// Overwrites the value at the cursor's current key.
    fn put_current(&mut self, value: Vec<u8>);

    /// Deletes the entry at the cursor's current key.
    fn delete_current(&mut self);

    /// Inserts or overwrites an arbitrary key, independent of cursor
    /// position (used for fresh entry insertion, e.g. `add` and
    /// `serializeUnknownReleaseKey`).
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Commits all buffered mutations. On success, on-disk state reflects
    /// every `put`/`put_current`/`delete_current` call made through this
    /// cursor; on failure, on-disk state is unchanged.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// One shard's durable environment: an ordered key-value store scoped to
/// that shard's key range, exposing read-only and exclusive transactional
/// cursors.
pub trait DurableEnvironment: Send + Sync {
    fn read_only(&self) -> Result<Box<dyn ScanRead + '_>>;
    fn exclusive(&self) -> Result<Box<dyn ScanWrite + '_>>;
}

/// Outcome of a single scan-protocol callback invocation, controlling
/// whether the scan continues: if it returns `Stop`, the scan stops.
pub enum ScanControl {
    Continue,
    Stop,
}

/// Runs the scan protocol against an already-positioned
/// cursor: seeks to the queue key's prefix, steps over SAME_PREFIX
/// neighbors, optionally steps past in-flight entries when `skip_with_id` is
/// set, then invokes `on_match` for each entry in the queue's range until it
/// signals [`ScanControl::Stop`] or the range ends.
///
/// `on_match` receives the cursor so it can inspect and mutate (via
/// `ScanWrite`) the current entry.
pub fn scan<C: ScanRead + ?Sized>(
    cursor: &mut C,
    key: &QueueKey,
    skip_with_id: bool,
    mut on_match: impl FnMut(&mut C) -> Result<ScanControl>,
) -> Result<()> {
    let start = key::serialize_queue_key(key);
    cursor.seek_range(&start);

    if !cursor.next() {
        return propagate_or_ok(cursor);
    }

    loop {
        let Some(current) = cursor.current_key() else {
            return propagate_or_ok(cursor);
        };
        match key::compare_client_id(key, current) {
            PrefixMatch::SamePrefix => {
                if !cursor.next() {
                    return propagate_or_ok(cursor);
                }
            }
            PrefixMatch::NoMatch => return propagate_or_ok(cursor),
            PrefixMatch::Match => break,
        }
    }

    if skip_with_id {
        loop {
            let Some(current) = cursor.current_key() else { break };
            if key::compare_client_id(key, current) != PrefixMatch::Match {
                break;
            }
            let has_id = cursor
                .current_value()
                .and_then(crate::queue::entry::deserialize_packet_id)
                .map(|id| id != crate::queue::entry::NO_PACKET_ID)
                .unwrap_or(false);
            if !has_id {
                break;
            }
            if !cursor.next() {
                return propagate_or_ok(cursor);
            }
        }
    }

    loop {
        let Some(current) = cursor.current_key() else {
            return propagate_or_ok(cursor);
        };
        if key::compare_client_id(key, current) != PrefixMatch::Match {
            return propagate_or_ok(cursor);
        }
        match on_match(cursor)? {
            ScanControl::Stop => return propagate_or_ok(cursor),
            ScanControl::Continue => {
                if !cursor.next() {
                    return propagate_or_ok(cursor);
                }
            }
        }
    }
}

fn propagate_or_ok<C: ScanRead + ?Sized>(cursor: &mut C) -> Result<()> {
    match cursor.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
