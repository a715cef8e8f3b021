//! clientq - per-client and shared-subscription MQTT message queue
//! persistence engine.
//!
//! Every MQTT session (and every shared-subscription group) owns one
//! ordered queue of outbound publishes. QoS 0 messages live entirely in
//! memory under a global byte budget; QoS 1/2 messages are durable and
//! carry a packet-identifier lifecycle. See [`queue`] for the engine
//! itself.

pub mod protocol;
pub mod queue;

pub use protocol::QoS;
pub use queue::{
    bootstrap_shard, resolve_watermark, ClientQueueError, DurableEnvironment, Entry,
    FjallEnvironment, InMemoryPayloadStore, NewPublish, NoopQueueTelemetry, OverflowStrategy,
    PayloadStore, PrometheusQueueTelemetry, PublishEntry, QueueConfig, QueueEngine, QueueKey,
    QueueTelemetry, ReleaseEntry, Result, ScanControl, ScanRead, ScanWrite, ShardBootstrap,
    INITIAL_INDEX_WATERMARK, NO_PACKET_ID,
};
