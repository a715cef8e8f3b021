//! Per-client and shared-subscription message queue persistence.
//!
//! Each MQTT session (and each shared-subscription group) owns one ordered
//! queue of outstanding publishes. QoS 0 messages live entirely in memory
//! under a global byte budget; QoS 1/2 messages are durable and carry a
//! packet-identifier lifecycle (unassigned → in-flight → acknowledged or
//! replaced by a release marker). The engine is sharded: each queue key
//! hashes to a fixed bucket, and every operation against a given bucket is
//! expected to run on that bucket's single owning thread (asserted, not
//! locked, per bucket — see [`engine`]).

mod bootstrap;
mod config;
mod durable;
mod engine;
mod entry;
mod error;
mod fjall_env;
mod key;
mod memory;
mod payload;
mod telemetry;

pub use bootstrap::{bootstrap_shard, resolve_watermark, ShardBootstrap};
pub use config::QueueConfig;
pub use durable::{DurableEnvironment, ScanControl, ScanRead, ScanWrite};
pub use engine::{NewPublish, OverflowStrategy, QueueEngine};
pub use entry::{Entry, PublishEntry, ReleaseEntry, NO_PACKET_ID};
pub use error::{ClientQueueError, Result};
pub use fjall_env::FjallEnvironment;
pub use key::{QueueKey, INITIAL_INDEX_WATERMARK};
pub use payload::{InMemoryPayloadStore, PayloadStore};
pub use telemetry::{NoopQueueTelemetry, PrometheusQueueTelemetry, QueueTelemetry};
