//! Telemetry interface (consumed).
//!
//! The engine never tracks drops itself beyond logging — it reports them
//! through this trait so an embedding broker can surface counters alongside
//! its own metrics registry. [`PrometheusQueueTelemetry`] is the production
//! implementation, registering into a caller-supplied `prometheus::Registry`
//! the way a broker's own counters would; [`NoopQueueTelemetry`] is used by
//! tests and by callers embedding the engine standalone.

use prometheus::{IntCounterVec, Opts, Registry};
use tracing::warn;

use crate::protocol::QoS;

pub trait QueueTelemetry: Send + Sync {
    fn queue_full(&self, queue_id: &str, topic: &str, qos: QoS);
    fn queue_full_shared(&self, queue_id: &str, topic: &str, qos: QoS);
    fn qos0_memory_exceeded(&self, queue_id: &str, topic: &str, qos: QoS, current: u64, limit: u64);
    fn qos0_memory_exceeded_shared(
        &self,
        queue_id: &str,
        topic: &str,
        qos: QoS,
        current: u64,
        limit: u64,
    );
}

/// Discards every event. Used in unit tests and benchmarks where the
/// telemetry side effects are not under test.
#[derive(Default)]
pub struct NoopQueueTelemetry;

impl QueueTelemetry for NoopQueueTelemetry {
    fn queue_full(&self, _queue_id: &str, _topic: &str, _qos: QoS) {}
    fn queue_full_shared(&self, _queue_id: &str, _topic: &str, _qos: QoS) {}
    fn qos0_memory_exceeded(&self, _queue_id: &str, _topic: &str, _qos: QoS, _current: u64, _limit: u64) {}
    fn qos0_memory_exceeded_shared(
        &self,
        _queue_id: &str,
        _topic: &str,
        _qos: QoS,
        _current: u64,
        _limit: u64,
    ) {
    }
}

fn qos_label(qos: QoS) -> &'static str {
    match qos {
        QoS::AtMostOnce => "0",
        QoS::AtLeastOnce => "1",
        QoS::ExactlyOnce => "2",
    }
}

/// Prometheus-backed telemetry, registered into a caller-supplied
/// `prometheus::Registry` the same way an embedding broker registers its
/// other counters.
pub struct PrometheusQueueTelemetry {
    queue_full_total: IntCounterVec,
    qos0_memory_exceeded_total: IntCounterVec,
}

impl PrometheusQueueTelemetry {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let queue_full_total = IntCounterVec::new(
            Opts::new(
                "clientq_queue_full_total",
                "Total messages dropped because a queue reached its size limit",
            ),
            &["qos", "shared"],
        )?;
        let qos0_memory_exceeded_total = IntCounterVec::new(
            Opts::new(
                "clientq_qos0_memory_exceeded_total",
                "Total QoS 0 messages dropped because the global memory budget was exceeded",
            ),
            &["shared"],
        )?;

        registry.register(Box::new(queue_full_total.clone()))?;
        registry.register(Box::new(qos0_memory_exceeded_total.clone()))?;

        Ok(Self {
            queue_full_total,
            qos0_memory_exceeded_total,
        })
    }
}

impl QueueTelemetry for PrometheusQueueTelemetry {
    fn queue_full(&self, queue_id: &str, topic: &str, qos: QoS) {
        warn!(queue_id, topic, qos = qos_label(qos), "queue full, dropping message");
        self.queue_full_total.with_label_values(&[qos_label(qos), "false"]).inc();
    }

    fn queue_full_shared(&self, queue_id: &str, topic: &str, qos: QoS) {
        warn!(queue_id, topic, qos = qos_label(qos), "shared queue full, dropping message");
        self.queue_full_total.with_label_values(&[qos_label(qos), "true"]).inc();
    }

    fn qos0_memory_exceeded(&self, queue_id: &str, topic: &str, qos: QoS, current: u64, limit: u64) {
        warn!(
            queue_id,
            topic,
            qos = qos_label(qos),
            current,
            limit,
            "qos0 memory limit exceeded, dropping message"
        );
        self.qos0_memory_exceeded_total.with_label_values(&["false"]).inc();
    }

    fn qos0_memory_exceeded_shared(
        &self,
        queue_id: &str,
        topic: &str,
        qos: QoS,
        current: u64,
        limit: u64,
    ) {
        warn!(
            queue_id,
            topic,
            qos = qos_label(qos),
            current,
            limit,
            "shared qos0 memory limit exceeded, dropping message"
        );
        self.qos0_memory_exceeded_total.with_label_values(&["true"]).inc();
    }
}
