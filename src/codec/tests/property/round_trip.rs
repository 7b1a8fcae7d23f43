//! Round-trip and length-contract checks over generated frames.

use proptest::{
    prelude::{Strategy, any},
    prop_assert,
    prop_assert_eq,
    test_runner::TestCaseError,
};
use rstest::rstest;

use super::shared::{deterministic_runner, frame_strategy};
use crate::codec::{
    DecodeError,
    MAX_FRAME_LENGTH,
    decode,
    encode_to_bytes,
    varint::{decode_remaining_length, encode_remaining_length, remaining_length_len},
};

fn expected_varint_len(value: usize) -> usize {
    // Smallest k >= 1 with 128^k > value, i.e. ceil(log128(value + 1)).
    let mut len = 1;
    let mut bound = 128usize;
    while value >= bound {
        len += 1;
        bound *= 128;
    }
    len
}

#[rstest]
#[case(256)]
fn generated_frames_round_trip(#[case] cases: u32) {
    let mut runner = deterministic_runner(cases);
    runner
        .run(&frame_strategy(), |frame| {
            let encoded = encode_to_bytes(&frame)
                .map_err(|err| TestCaseError::fail(format!("encode failed: {err}")))?;
            let remaining = frame.remaining_length();
            prop_assert_eq!(encoded.len(), 1 + remaining_length_len(remaining) + remaining);
            prop_assert_eq!(encoded.len(), frame.encoded_len());

            let (decoded, consumed) = decode(&encoded)
                .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?;
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(decoded, frame);
            Ok(())
        })
        .expect("generated frames should round-trip");
}

#[test]
fn generated_remaining_lengths_round_trip() {
    let mut runner = deterministic_runner(512);
    runner
        .run(&(0usize..=MAX_FRAME_LENGTH), |value| {
            let mut wire = bytes::BytesMut::new();
            encode_remaining_length(value, &mut wire);
            prop_assert_eq!(wire.len(), expected_varint_len(value));
            prop_assert_eq!(remaining_length_len(value), wire.len());
            prop_assert_eq!(decode_remaining_length(&wire), Ok((value, wire.len())));
            Ok(())
        })
        .expect("remaining lengths should round-trip");
}

#[test]
fn generated_truncations_are_incomplete() {
    let mut runner = deterministic_runner(256);
    let strategy = (frame_strategy(), any::<proptest::sample::Index>()).prop_map(|(frame, cut)| {
        let encoded = encode_to_bytes(&frame).expect("generated frames encode");
        let at = cut.index(encoded.len());
        encoded.slice(..at)
    });
    runner
        .run(&strategy, |prefix| {
            match decode(&prefix) {
                Err(DecodeError::Incomplete { needed }) => prop_assert!(needed > 0),
                other => {
                    return Err(TestCaseError::fail(format!(
                        "truncated frame should be incomplete, got {other:?}"
                    )));
                }
            }
            Ok(())
        })
        .expect("truncated frames should never decode");
}
