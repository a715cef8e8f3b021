//! Queue engine configuration, meant to compose into an embedding broker's
//! root configuration struct the way a `PersistenceConfig` section would.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `PERSISTENCE_BUCKET_COUNT`: fixed shard count, read once at startup.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// `QOS_0_MEMORY_HARD_LIMIT_DIVISOR`: `qos0MemoryLimit = maxHeapBytes /
    /// divisor`. A configured value `< 1` falls back to the default of 4.
    #[serde(default = "default_qos0_divisor")]
    pub qos0_memory_hard_limit_divisor: i64,

    /// Per-entry overhead added to a publish's estimated size when
    /// accounting QoS 0 memory usage. Approximates the cost of the list
    /// node, map entry, and bookkeeping around a resident message.
    #[serde(default = "default_node_overhead")]
    pub qos0_node_overhead_bytes: u64,

    /// Directory under which each shard opens its own durable environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_bucket_count() -> usize {
    16
}

fn default_qos0_divisor() -> i64 {
    4
}

fn default_node_overhead() -> u64 {
    64
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/client_queue")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bucket_count: default_bucket_count(),
            qos0_memory_hard_limit_divisor: default_qos0_divisor(),
            qos0_node_overhead_bytes: default_node_overhead(),
            data_dir: default_data_dir(),
        }
    }
}

impl QueueConfig {
    /// Resolves the effective QoS 0 memory budget from the process's
    /// configured heap ceiling, applying the `< 1` fallback rule.
    pub fn resolve_qos0_limit(&self, max_heap_bytes: u64) -> u64 {
        let divisor = if self.qos0_memory_hard_limit_divisor < 1 {
            default_qos0_divisor()
        } else {
            self.qos0_memory_hard_limit_divisor
        };
        max_heap_bytes / divisor as u64
    }
}
