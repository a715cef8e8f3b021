//! Production [`DurableEnvironment`] backed by `fjall`, one `Keyspace` per
//! shard: the durable store is partitioned one environment per shard,
//! eliminating cross-shard lock contention. Follows the broker's
//! `persistence::fjall::FjallBackend` open/partition pattern.

use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::queue::durable::{DurableEnvironment, ScanRead, ScanWrite};
use crate::queue::error::{ClientQueueError, Result};

/// Persistence name and schema version. A version bump requires an
/// explicit migration; this crate does not implement one.
pub const PARTITION_NAME: &str = "client_queue";
pub const SCHEMA_VERSION: &str = "040000";

pub struct FjallEnvironment {
    #[allow(dead_code)]
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl FjallEnvironment {
    /// Opens (creating if absent) the shard's environment at
    /// `base_dir/shard_<index>`.
    pub fn open(base_dir: &Path, shard_index: usize) -> Result<Self> {
        let path = base_dir.join(format!("shard_{shard_index:04}"));
        let keyspace = Config::new(path).open()?;
        let partition = keyspace.open_partition(PARTITION_NAME, PartitionCreateOptions::default())?;
        Ok(Self { keyspace, partition })
    }

}

impl DurableEnvironment for FjallEnvironment {
    fn read_only(&self) -> Result<Box<dyn ScanRead + '_>> {
        Ok(Box::new(FjallReadCursor {
            partition: &self.partition,
            iter: Box::new(std::iter::empty()),
            current: None,
            error: None,
            started: false,
        }))
    }

    fn exclusive(&self) -> Result<Box<dyn ScanWrite + '_>> {
        Ok(Box::new(FjallWriteCursor {
            partition: &self.partition,
            iter: Box::new(std::iter::empty()),
            current: None,
            error: None,
            started: false,
            batch: self.keyspace.batch(),
        }))
    }
}

type ByteItem = std::result::Result<(Vec<u8>, Vec<u8>), ClientQueueError>;

struct FjallReadCursor<'a> {
    partition: &'a PartitionHandle,
    iter: Box<dyn Iterator<Item = ByteItem> + 'a>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<ClientQueueError>,
    started: bool,
}

impl<'a> ScanRead for FjallReadCursor<'a> {
    fn seek_range(&mut self, start: &[u8]) {
        self.started = true;
        let iter = self
            .partition
            .range(start.to_vec()..)
            .map(|r| r.map_err(ClientQueueError::from).map(|(k, v)| (k.to_vec(), v.to_vec())));
        self.iter = Box::new(iter);
    }

    fn next(&mut self) -> bool {
        if !self.started {
            return false;
        }
        match self.iter.next() {
            Some(Ok(kv)) => {
                self.current = Some(kv);
                true
            }
            Some(Err(e)) => {
                self.error = Some(e);
                self.current = None;
                false
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn current_key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn current_value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    fn take_error(&mut self) -> Option<ClientQueueError> {
        self.error.take()
    }
}

struct FjallWriteCursor<'a> {
    partition: &'a PartitionHandle,
    iter: Box<dyn Iterator<Item = ByteItem> + 'a>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<ClientQueueError>,
    started: bool,
    batch: fjall::Batch,
}

impl<'a> FjallWriteCursor<'a> {
    fn rebind_range(&mut self, start: &[u8]) {
        let iter = self
            .partition
            .range(start.to_vec()..)
            .map(|r| r.map_err(ClientQueueError::from).map(|(k, v)| (k.to_vec(), v.to_vec())));
        self.iter = Box::new(iter);
    }
}

impl<'a> ScanRead for FjallWriteCursor<'a> {
    fn seek_range(&mut self, start: &[u8]) {
        self.started = true;
        self.rebind_range(start);
    }

    fn next(&mut self) -> bool {
        if !self.started {
            return false;
        }
        match self.iter.next() {
            Some(Ok(kv)) => {
                self.current = Some(kv);
                true
            }
            Some(Err(e)) => {
                self.error = Some(e);
                self.current = None;
                false
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn current_key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn current_value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    fn take_error(&mut self) -> Option<ClientQueueError> {
        self.error.take()
    }
}

impl<'a> ScanWrite for FjallWriteCursor<'a> {
    fn put_current(&mut self, value: Vec<u8>) {
        if let Some((key, _)) = self.current.clone() {
            self.batch.insert(self.partition, key.clone(), value.clone());
            self.current = Some((key, value));
        }
    }

    fn delete_current(&mut self) {
        if let Some((key, _)) = &self.current {
            self.batch.remove(self.partition, key.clone());
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.batch.insert(self.partition, key, value);
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.batch.commit()?;
        Ok(())
    }
}
