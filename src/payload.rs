//! Timestamp payloads for latency mode.
//!
//! A latency payload is always [`TIMESTAMP_LEN`] bytes. The leading bytes hold
//! the send time in nanoseconds since the Unix epoch as a zig-zag encoded
//! base-128 varint. Eight 7-bit groups cover 56 bits; when bits remain, the
//! ninth byte carries the final 8 bits verbatim, so every `i64` fits. Unused
//! trailing bytes are zero padding.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of a latency-mode message.
pub const TIMESTAMP_LEN: usize = 9;

/// Number of continuation-bit groups before the raw final byte.
const GROUPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("timestamp payload truncated after {len} bytes")]
    Truncated { len: usize },
}

#[inline]
fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Write `value` into the front of `buf`, returning the number of bytes used.
///
/// `buf` must be at least [`TIMESTAMP_LEN`] bytes long.
pub fn encode_varint(value: i64, buf: &mut [u8; TIMESTAMP_LEN]) -> usize {
    let mut x = zigzag(value);
    for (i, slot) in buf.iter_mut().take(GROUPS).enumerate() {
        if x < 0x80 {
            *slot = x as u8;
            return i + 1;
        }
        *slot = (x as u8) | 0x80;
        x >>= 7;
    }
    buf[GROUPS] = x as u8;
    TIMESTAMP_LEN
}

/// Read a varint from the front of `buf`, returning the value and its length.
pub fn decode_varint(buf: &[u8]) -> Result<(i64, usize), DecodeError> {
    let mut x = 0u64;
    for i in 0..GROUPS {
        let byte = *buf.get(i).ok_or(DecodeError::Truncated { len: buf.len() })?;
        x |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((unzigzag(x), i + 1));
        }
    }
    let last = *buf
        .get(GROUPS)
        .ok_or(DecodeError::Truncated { len: buf.len() })?;
    x |= u64::from(last) << (7 * GROUPS);
    Ok((unzigzag(x), TIMESTAMP_LEN))
}

/// Build a latency payload carrying `nanos`.
pub fn encode_timestamp(nanos: i64) -> Bytes {
    let mut buf = [0u8; TIMESTAMP_LEN];
    encode_varint(nanos, &mut buf);
    Bytes::copy_from_slice(&buf)
}

/// Extract the send timestamp from a latency payload.
pub fn decode_timestamp(payload: &[u8]) -> Result<i64, DecodeError> {
    decode_varint(payload).map(|(nanos, _)| nanos)
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Clocks set before the epoch read as negative values.
pub fn unix_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().min(i64::MAX as u128) as i64,
        Err(e) => -(e.duration().as_nanos().min(i64::MAX as u128) as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: i64) {
        let payload = encode_timestamp(value);
        assert_eq!(payload.len(), TIMESTAMP_LEN);
        assert_eq!(decode_timestamp(&payload), Ok(value), "value {value}");
    }

    #[test]
    fn small_values_match_leb128() {
        let mut buf = [0u8; TIMESTAMP_LEN];
        assert_eq!(encode_varint(0, &mut buf), 1);
        assert_eq!(buf[0], 0x00);
        assert_eq!(encode_varint(-1, &mut buf), 1);
        assert_eq!(buf[0], 0x01);
        assert_eq!(encode_varint(1, &mut buf), 1);
        assert_eq!(buf[0], 0x02);
        assert_eq!(encode_varint(64, &mut buf), 2);
        assert_eq!(&buf[..2], &[0x80, 0x01]);
    }

    #[test]
    fn roundtrip_up_to_two_pow_62() {
        for shift in 0..=62 {
            let v = 1i64 << shift;
            roundtrip(v);
            roundtrip(v - 1);
            roundtrip(v + 1);
        }
        roundtrip(1 << 62);
        // a realistic timestamp (2024-01-01T00:00:00Z)
        roundtrip(1_704_067_200_000_000_000);
    }

    #[test]
    fn roundtrip_negative_and_extremes() {
        for v in [-1, -2, -63, -64, -65, -1_000_000_007, i64::MIN, i64::MAX] {
            roundtrip(v);
        }
    }

    #[test]
    fn large_values_use_raw_final_byte() {
        let mut buf = [0u8; TIMESTAMP_LEN];
        assert_eq!(encode_varint(i64::MAX, &mut buf), TIMESTAMP_LEN);
        assert_eq!(decode_varint(&buf), Ok((i64::MAX, TIMESTAMP_LEN)));
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let mut payload = encode_timestamp(42).to_vec();
        payload.extend_from_slice(&[0xff; 16]);
        assert_eq!(decode_timestamp(&payload), Ok(42));
    }

    #[test]
    fn truncated_payloads() {
        assert_eq!(
            decode_timestamp(&[]),
            Err(DecodeError::Truncated { len: 0 })
        );
        assert_eq!(
            decode_timestamp(&[0x80, 0x80]),
            Err(DecodeError::Truncated { len: 2 })
        );
        assert_eq!(
            decode_timestamp(&[0xff; 8]),
            Err(DecodeError::Truncated { len: 8 })
        );
    }

    #[test]
    fn clock_is_after_epoch() {
        assert!(unix_nanos() > 1_600_000_000_000_000_000);
    }
}
