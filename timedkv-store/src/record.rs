//! The 5-byte big-endian deadline prefix stamped on every non-persistent
//! record's stored bytes.

use timedkv_common::DEADLINE_MAX;

/// Width, in bytes, of the deadline prefix.
pub const XTWIDTH: usize = 5;

/// Splits a raw (on-disk) record into its logical value and deadline.
///
/// Persistent databases store the value bytes verbatim with no prefix; the
/// deadline is always reported as [`DEADLINE_MAX`] ("no expiration").
pub fn decode_record(raw: &[u8], persistent: bool) -> (&[u8], u64) {
    if persistent {
        return (raw, DEADLINE_MAX);
    }
    if raw.len() < XTWIDTH {
        return (raw, DEADLINE_MAX);
    }
    let mut buf = [0u8; 8];
    buf[3..8].copy_from_slice(&raw[..XTWIDTH]);
    let deadline = u64::from_be_bytes(buf);
    (&raw[XTWIDTH..], deadline)
}

/// Encodes `value` with `deadline` into the raw on-disk representation.
pub fn encode_record(value: &[u8], deadline: u64, persistent: bool) -> Vec<u8> {
    if persistent {
        return value.to_vec();
    }
    let mut out = Vec::with_capacity(XTWIDTH + value.len());
    let be = deadline.min(DEADLINE_MAX).to_be_bytes();
    out.extend_from_slice(&be[3..8]);
    out.extend_from_slice(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_non_persistent() {
        let raw = encode_record(b"hello", 12345, false);
        let (value, deadline) = decode_record(&raw, false);
        assert_eq!(value, b"hello");
        assert_eq!(deadline, 12345);
    }

    #[test]
    fn persistent_has_no_prefix() {
        let raw = encode_record(b"hello", 12345, true);
        assert_eq!(raw, b"hello");
        let (value, deadline) = decode_record(&raw, true);
        assert_eq!(value, b"hello");
        assert_eq!(deadline, DEADLINE_MAX);
    }

    #[test]
    fn deadline_clamped_to_max() {
        let raw = encode_record(b"v", u64::MAX, false);
        let (_, deadline) = decode_record(&raw, false);
        assert_eq!(deadline, DEADLINE_MAX);
    }
}
