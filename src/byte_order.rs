//! Helpers for explicit network byte-order conversions.
//!
//! Every multi-byte integer on the wire (message ids, keepalive, string
//! length prefixes) is a big-endian `u16`. Keeping the conversions here
//! scopes the Clippy expectation to a single place.

use bytes::{BufMut, BytesMut};

/// Serialise a `u16` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use wiregate::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(0x1234), [0x12, 0x34]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use wiregate::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x12, 0x34]), 0x1234);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Read a network-order `u16` starting at `offset`, or `None` when fewer than
/// two bytes remain.
#[must_use]
pub fn read_network_u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let bytes = buf.get(offset..end)?;
    Some(read_network_u16([bytes[0], bytes[1]]))
}

/// Append `value` to `dst` in network byte order.
pub fn put_network_u16(dst: &mut BytesMut, value: u16) {
    dst.put_slice(&write_network_u16(value));
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::{put_network_u16, read_network_u16_at};

    #[rstest]
    #[case::start(&[0x00, 0x07, 0xff], 0, Some(7))]
    #[case::offset(&[0xff, 0x01, 0x02], 1, Some(0x0102))]
    #[case::short(&[0x01], 0, None)]
    #[case::past_end(&[0x01, 0x02], 1, None)]
    #[case::overflowing_offset(&[0x01, 0x02], usize::MAX, None)]
    fn reads_u16_at_offset(#[case] buf: &[u8], #[case] offset: usize, #[case] want: Option<u16>) {
        assert_eq!(read_network_u16_at(buf, offset), want);
    }

    #[test]
    fn appends_big_endian() {
        let mut dst = BytesMut::new();
        put_network_u16(&mut dst, 0xbeef);
        assert_eq!(&dst[..], &[0xbe, 0xef]);
    }
}
