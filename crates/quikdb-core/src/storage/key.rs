//! Record key encoding.
//!
//! Key format: `[entity name][0x00][tag (1 byte)][payload]`
//!
//! All records of one entity share the `[entity name][0x00]` prefix, so a
//! prefix scan walks a whole table. Payloads are big-endian (integers with the
//! sign bit flipped) so byte order matches key order.

use super::value::Key;

/// Separator between entity name and key payload.
const SEPARATOR: u8 = 0x00;

const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_ROW: u8 = 3;

/// Prefix shared by every record of an entity type.
pub fn entity_prefix(entity: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entity.len() + 1);
    buf.extend_from_slice(entity.as_bytes());
    buf.push(SEPARATOR);
    buf
}

/// Encode the storage key of one record.
pub fn encode_record_key(entity: &str, key: &Key) -> Vec<u8> {
    let mut buf = entity_prefix(entity);
    match key {
        Key::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
        }
        Key::Str(s) => {
            buf.push(TAG_STR);
            buf.extend_from_slice(s.as_bytes());
        }
        Key::Row(r) => {
            buf.push(TAG_ROW);
            buf.extend_from_slice(&r.to_be_bytes());
        }
    }
    buf
}

/// Decode a storage key into its entity name and record key.
pub fn decode_record_key(bytes: &[u8]) -> Option<(String, Key)> {
    let sep = bytes.iter().position(|b| *b == SEPARATOR)?;
    let entity = std::str::from_utf8(&bytes[..sep]).ok()?.to_string();
    let rest = &bytes[sep + 1..];
    let (tag, payload) = rest.split_first()?;

    let key = match *tag {
        TAG_INT => {
            let raw: [u8; 8] = payload.try_into().ok()?;
            Key::Int((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
        }
        TAG_STR => Key::Str(std::str::from_utf8(payload).ok()?.to_string()),
        TAG_ROW => {
            let raw: [u8; 8] = payload.try_into().ok()?;
            Key::Row(u64::from_be_bytes(raw))
        }
        _ => return None,
    };

    Some((entity, key))
}

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_key_roundtrip() {
        for i in [i64::MIN, -1, 0, 1, 42, i64::MAX] {
            let bytes = encode_record_key("Message", &Key::Int(i));
            assert_eq!(decode_record_key(&bytes), Some(("Message".into(), Key::Int(i))));
        }
    }

    #[test]
    fn test_int_keys_sort_numerically() {
        let neg = encode_record_key("Message", &Key::Int(-10));
        let zero = encode_record_key("Message", &Key::Int(0));
        let pos = encode_record_key("Message", &Key::Int(10));
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn test_string_and_row_keys() {
        let bytes = encode_record_key("Contact", &Key::Str("0r1-2A".into()));
        assert_eq!(
            decode_record_key(&bytes),
            Some(("Contact".into(), Key::Str("0r1-2A".into())))
        );

        let bytes = encode_record_key("EmojiSyncNeeded", &Key::Row(9));
        assert_eq!(
            decode_record_key(&bytes),
            Some(("EmojiSyncNeeded".into(), Key::Row(9)))
        );
    }

    #[test]
    fn test_prefix_is_exclusive() {
        // "Message" must not pick up "MessageContentFilter" records.
        let key = encode_record_key("MessageContentFilter", &Key::Int(1));
        assert!(!key.starts_with(&entity_prefix("Message")));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_record_key(b"no-separator"), None);
        assert_eq!(decode_record_key(b"Message\x00\x09abc"), None);
    }
}
