//! Entry value codec.
//!
//! A durable entry value is a tagged record: a QoS 1/2 `Publish` (with its
//! packet identifier slot placed at a fixed trailing offset so it can be
//! rewritten in place) or a `Release` marker left behind once a QoS 2
//! publish has been acknowledged with PUBREC.

use crate::protocol::QoS;

/// Sentinel packet identifier meaning "not yet assigned" — an entry in this
/// state has not been sent to the client and is eligible for `readNew`.
pub const NO_PACKET_ID: u16 = 0;

const TAG_PUBLISH: u8 = 0x01;
const TAG_RELEASE: u8 = 0x02;

/// A queue entry as stored durably or resident in memory (for QoS 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Publish(PublishEntry),
    Release(ReleaseEntry),
}

impl Entry {
    pub fn packet_id(&self) -> u16 {
        match self {
            Entry::Publish(p) => p.packet_id,
            Entry::Release(r) => r.packet_id,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.packet_id() != NO_PACKET_ID
    }
}

/// QoS 1/2 publish record held in a queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEntry {
    pub payload_id: u64,
    pub topic: String,
    pub qos: QoS,
    /// Message expiry interval in seconds (v5.0 `message_expiry_interval`);
    /// `None` means the message never expires.
    pub expiry_interval_secs: Option<u32>,
    /// Unix timestamp (seconds) when this entry was added to the queue.
    pub timestamp_secs: u64,
    /// Broker-assigned identifier correlating this entry across replace /
    /// remove calls and across the payload store.
    pub unique_id: String,
    pub packet_id: u16,
    pub dup: bool,
    pub retain: bool,
}

impl PublishEntry {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        match self.expiry_interval_secs {
            None => false,
            Some(interval) => now_secs.saturating_sub(self.timestamp_secs) >= interval as u64,
        }
    }

    /// Estimated heap footprint used for QoS 0 memory accounting and
    /// `readNew` byte-limit bookkeeping.
    pub fn estimated_size(&self) -> u64 {
        (self.topic.len() + self.unique_id.len() + 32) as u64
    }
}

/// QoS 2 release marker, replacing a publish once PUBREC has been received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEntry {
    pub packet_id: u16,
}

/// Serializes a fresh QoS 1/2 publish with `packet_id` set to
/// [`NO_PACKET_ID`].
pub fn serialize_publish_without_packet_id(publish: &PublishEntry) -> Vec<u8> {
    let mut entry = publish.clone();
    entry.packet_id = NO_PACKET_ID;
    encode_publish(&entry)
}

/// Rewrites a previously serialized publish's packet-identifier slot without
/// touching payload metadata or re-serializing the rest of the record.
///
/// The packet id occupies a known 2-byte slot directly following the tag
/// byte, so this overwrites those two bytes in place. Implementations that
/// prefer a partially-decoded round trip instead of true in-place mutation
/// produce an identical result.
pub fn serialize_and_set_packet_id(existing_value: &[u8], packet_id: u16) -> Vec<u8> {
    let mut bytes = existing_value.to_vec();
    if bytes.first() == Some(&TAG_PUBLISH) && bytes.len() >= 3 {
        bytes[1..3].copy_from_slice(&packet_id.to_be_bytes());
    }
    bytes
}

pub fn serialize_release(release: &ReleaseEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3);
    buf.push(TAG_RELEASE);
    buf.extend_from_slice(&release.packet_id.to_be_bytes());
    buf
}

/// Reads only the packet-identifier slot, for the read-only in-flight scan
/// (`readInflight`) which does not need the rest of the record.
pub fn deserialize_packet_id(value: &[u8]) -> Option<u16> {
    if value.len() < 3 {
        return None;
    }
    Some(u16::from_be_bytes([value[1], value[2]]))
}

pub fn deserialize_entry(value: &[u8]) -> Option<Entry> {
    match value.first()? {
        &TAG_PUBLISH => decode_publish(value).map(Entry::Publish),
        &TAG_RELEASE => {
            let packet_id = deserialize_packet_id(value)?;
            Some(Entry::Release(ReleaseEntry { packet_id }))
        }
        _ => None,
    }
}

fn encode_publish(p: &PublishEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + p.topic.len() + p.unique_id.len());
    buf.push(TAG_PUBLISH);
    buf.extend_from_slice(&p.packet_id.to_be_bytes());
    buf.push(p.qos as u8);
    buf.push((p.dup as u8) | ((p.retain as u8) << 1));
    buf.extend_from_slice(&p.payload_id.to_be_bytes());
    buf.extend_from_slice(&p.timestamp_secs.to_be_bytes());
    match p.expiry_interval_secs {
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        None => buf.push(0),
    }
    write_len_prefixed(&mut buf, p.topic.as_bytes());
    write_len_prefixed(&mut buf, p.unique_id.as_bytes());
    buf
}

fn decode_publish(bytes: &[u8]) -> Option<PublishEntry> {
    let mut cursor = 1usize;
    let packet_id = read_u16(bytes, &mut cursor)?;
    let qos = QoS::from_u8(*bytes.get(cursor)?)?;
    cursor += 1;
    let flags = *bytes.get(cursor)?;
    cursor += 1;
    let dup = flags & 0x01 != 0;
    let retain = flags & 0x02 != 0;
    let payload_id = read_u64(bytes, &mut cursor)?;
    let timestamp_secs = read_u64(bytes, &mut cursor)?;
    let has_expiry = *bytes.get(cursor)?;
    cursor += 1;
    let expiry_interval_secs = if has_expiry == 1 {
        Some(read_u32(bytes, &mut cursor)?)
    } else {
        None
    };
    let topic = read_len_prefixed_string(bytes, &mut cursor)?;
    let unique_id = read_len_prefixed_string(bytes, &mut cursor)?;

    Some(PublishEntry {
        payload_id,
        topic,
        qos,
        expiry_interval_secs,
        timestamp_secs,
        unique_id,
        packet_id,
        dup,
        retain,
    })
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Option<u16> {
    let slice = bytes.get(*cursor..*cursor + 2)?;
    *cursor += 2;
    Some(u16::from_be_bytes(slice.try_into().ok()?))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Option<u32> {
    let slice = bytes.get(*cursor..*cursor + 4)?;
    *cursor += 4;
    Some(u32::from_be_bytes(slice.try_into().ok()?))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Option<u64> {
    let slice = bytes.get(*cursor..*cursor + 8)?;
    *cursor += 8;
    Some(u64::from_be_bytes(slice.try_into().ok()?))
}

fn read_len_prefixed_string(bytes: &[u8], cursor: &mut usize) -> Option<String> {
    let len = read_u32(bytes, cursor)? as usize;
    let slice = bytes.get(*cursor..*cursor + len)?;
    *cursor += len;
    String::from_utf8(slice.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_publish() -> PublishEntry {
        PublishEntry {
            payload_id: 7,
            topic: "a/b".to_string(),
            qos: QoS::ExactlyOnce,
            expiry_interval_secs: Some(30),
            timestamp_secs: 1_000,
            unique_id: "u1".to_string(),
            packet_id: NO_PACKET_ID,
            dup: false,
            retain: true,
        }
    }

    #[test]
    fn round_trips_publish_without_packet_id() {
        let publish = sample_publish();
        let bytes = serialize_publish_without_packet_id(&publish);
        let decoded = deserialize_entry(&bytes).unwrap();
        match decoded {
            Entry::Publish(p) => assert_eq!(p, publish),
            Entry::Release(_) => panic!("expected publish"),
        }
    }

    #[test]
    fn sets_packet_id_in_place_without_touching_payload_metadata() {
        let publish = sample_publish();
        let bytes = serialize_publish_without_packet_id(&publish);
        let updated = serialize_and_set_packet_id(&bytes, 42);
        match deserialize_entry(&updated).unwrap() {
            Entry::Publish(p) => {
                assert_eq!(p.packet_id, 42);
                assert_eq!(p.payload_id, publish.payload_id);
                assert_eq!(p.topic, publish.topic);
            }
            Entry::Release(_) => panic!("expected publish"),
        }
    }

    #[test]
    fn round_trips_release_marker() {
        let release = ReleaseEntry { packet_id: 9 };
        let bytes = serialize_release(&release);
        assert_eq!(deserialize_entry(&bytes), Some(Entry::Release(release)));
        assert_eq!(deserialize_packet_id(&bytes), Some(9));
    }

    #[test]
    fn expiry_is_relative_to_timestamp() {
        let mut publish = sample_publish();
        publish.timestamp_secs = 100;
        publish.expiry_interval_secs = Some(10);
        assert!(!publish.is_expired(109));
        assert!(publish.is_expired(110));
        assert!(publish.is_expired(200));
    }

    #[test]
    fn no_expiry_interval_never_expires() {
        let mut publish = sample_publish();
        publish.expiry_interval_secs = None;
        assert!(!publish.is_expired(u64::MAX));
    }
}
