//! Base-128 remaining-length encoding.
//!
//! Each byte carries seven value bits, least significant group first; the top
//! bit marks continuation. Decoding imposes no byte-count limit of its own, so
//! callers cap the decoded value against their configured frame size.

use bytes::{BufMut, BytesMut};

use super::error::{DecodeError, MalformedFrame};

const CONTINUATION: u8 = 0x80;
const VALUE_MASK: u8 = 0x7f;

/// Append the varint encoding of `value` to `dst`.
pub fn encode_remaining_length(mut value: usize, dst: &mut BytesMut) {
    loop {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "value % 128 always fits in a byte"
        )]
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= CONTINUATION;
        }
        dst.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes the varint encoding of `value` occupies (at least one).
#[must_use]
pub fn remaining_length_len(value: usize) -> usize {
    let mut len = 1;
    let mut rest = value / 128;
    while rest > 0 {
        len += 1;
        rest /= 128;
    }
    len
}

/// Decode a remaining length from the start of `src`.
///
/// Returns the value and the number of bytes it occupied.
///
/// # Errors
///
/// Returns [`DecodeError::Incomplete`] when `src` ends on a continuation byte,
/// and [`MalformedFrame::LengthOverflow`] when the value does not fit `usize`.
pub fn decode_remaining_length(src: &[u8]) -> Result<(usize, usize), DecodeError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (index, byte) in src.iter().enumerate() {
        let group = usize::from(byte & VALUE_MASK)
            .checked_mul(multiplier)
            .ok_or(MalformedFrame::LengthOverflow)?;
        value = value
            .checked_add(group)
            .ok_or(MalformedFrame::LengthOverflow)?;
        if byte & CONTINUATION == 0 {
            return Ok((value, index + 1));
        }
        multiplier = multiplier
            .checked_mul(128)
            .ok_or(MalformedFrame::LengthOverflow)?;
    }
    Err(DecodeError::Incomplete { needed: 1 })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zero(0, &[0x00])]
    #[case::one_byte_max(127, &[0x7f])]
    #[case::two_bytes_min(128, &[0x80, 0x01])]
    #[case::two_bytes_max(16_383, &[0xff, 0x7f])]
    #[case::three_bytes_min(16_384, &[0x80, 0x80, 0x01])]
    #[case::four_bytes_max(268_435_455, &[0xff, 0xff, 0xff, 0x7f])]
    fn encodes_known_values(#[case] value: usize, #[case] wire: &[u8]) {
        let mut dst = BytesMut::new();
        encode_remaining_length(value, &mut dst);
        assert_eq!(&dst[..], wire);
        assert_eq!(remaining_length_len(value), wire.len());
        assert_eq!(decode_remaining_length(wire), Ok((value, wire.len())));
    }

    #[test]
    fn stops_at_first_terminal_byte() {
        assert_eq!(decode_remaining_length(&[0x05, 0xff, 0xff]), Ok((5, 1)));
    }

    #[rstest]
    #[case::empty(&[])]
    #[case::dangling_continuation(&[0x80])]
    #[case::long_dangling(&[0xff, 0xff, 0xff])]
    fn reports_incomplete(#[case] wire: &[u8]) {
        assert!(
            decode_remaining_length(wire)
                .expect_err("truncated varint must not decode")
                .is_incomplete()
        );
    }

    #[test]
    fn rejects_overflowing_length() {
        let wire = [0xff; 16];
        assert_eq!(
            decode_remaining_length(&wire),
            Err(DecodeError::Malformed(MalformedFrame::LengthOverflow))
        );
    }
}
