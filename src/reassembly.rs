//! Stream reassembly over a byte-oriented transport.
//!
//! Socket reads deliver arbitrary slices of the byte stream: a read may hold
//! several frames, end halfway through one, or both. [`StreamReassembler`]
//! carries the unparsed tail between reads and carves out complete frames.
//!
//! When decoding hits a [`MalformedFrame`](crate::codec::MalformedFrame) the
//! alignment is presumed lost. The reassembler then scans forward one byte at
//! a time for a position that decodes as a complete, self-consistent frame.
//! Bytes skipped over are discarded and logged; if no such position exists the
//! whole buffer is dropped and the next read starts afresh. Malformed input
//! never surfaces as an error to the caller.

use bytes::{Buf, BytesMut};
use log::warn;

use crate::codec::{
    DEFAULT_MAX_FRAME_LENGTH,
    DecodeError,
    Frame,
    clamp_frame_length,
    decode_with_limit,
};

/// Outcome of feeding one read into the reassembler.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reassembled {
    /// Frames completed by this read, in stream order.
    pub frames: Vec<Frame>,
    /// Bytes thrown away while resynchronising.
    pub discarded: usize,
    /// Number of times alignment was lost.
    pub resyncs: usize,
}

/// Per-connection frame reassembler.
#[derive(Debug)]
pub struct StreamReassembler {
    pending: BytesMut,
    max_frame_length: usize,
}

impl Default for StreamReassembler {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl StreamReassembler {
    /// Create a reassembler rejecting frames above `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    /// Bytes held over from previous reads.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Append `chunk` to the held-over bytes and decode every complete frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Reassembled {
        self.pending.extend_from_slice(chunk);
        let mut out = Reassembled::default();
        let mut offset = 0;

        while offset < self.pending.len() {
            match decode_with_limit(&self.pending[offset..], self.max_frame_length) {
                Ok((frame, consumed)) => {
                    out.frames.push(frame);
                    offset += consumed;
                }
                Err(DecodeError::Incomplete { .. }) => break,
                Err(DecodeError::Malformed(err)) => {
                    out.resyncs += 1;
                    let next = self.find_boundary(offset + 1);
                    let resume = next.unwrap_or(self.pending.len());
                    let lost = resume - offset;
                    out.discarded += lost;
                    crate::metrics::inc_resync_discarded(lost);
                    if next.is_some() {
                        warn!("stream resynchronised: discarded={lost}, error={err}");
                    } else {
                        warn!("no frame boundary found, dropping buffer: discarded={lost}, error={err}");
                    }
                    offset = resume;
                }
            }
        }

        self.pending.advance(offset);
        out
    }

    /// First position at or after `from` that decodes as a complete frame.
    fn find_boundary(&self, from: usize) -> Option<usize> {
        (from..self.pending.len())
            .find(|&pos| decode_with_limit(&self.pending[pos..], self.max_frame_length).is_ok())
    }

    /// Discard any held-over bytes.
    pub fn clear(&mut self) { self.pending.clear(); }
}
