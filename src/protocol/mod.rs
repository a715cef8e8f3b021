//! MQTT protocol-level types shared by the queue engine.
//!
//! The full MQTT wire protocol (packet framing, v5 properties, reason
//! codes) is out of scope for this crate: wire-format serialization and the
//! outer protocol handler are external collaborators. `QoS` is the one
//! protocol type the queue engine itself is defined in terms of — a durable
//! entry's wire layout embeds it, and the overflow/expiry rules key off it —
//! so it lives here rather than in `queue`.

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery: fire-and-forget, held in memory only.
    #[default]
    AtMostOnce = 0,
    /// At least once delivery: durable, packet-id assigned on delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery: durable, publish replaced by a release
    /// marker once PUBREC is received.
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_round_trips_through_u8() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(QoS::from_u8(qos as u8), Some(qos));
        }
        assert_eq!(QoS::from_u8(3), None);
    }
}
