use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::codec::{ESC_END, ESC_ESC, FRAME_END, FRAME_ESC, MAX_FRAME};
use crate::error::FrameError;

const INITIAL_SCRATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Between frames; delimiter bytes here are idle noise.
    AwaitingFrame,
    /// Accumulating frame content.
    InFrame,
    /// Saw an escape byte; the next byte must be a substitution code.
    InEscape,
    /// Dropping an oversized frame; ignore everything up to the next
    /// delimiter.
    Discarding,
}

/// Reassembles delimiter-framed messages from an arbitrarily chunked stream.
///
/// A single OS read can carry zero, one, several, or a partial frame;
/// [`FrameDecoder::decode`] returns every frame completed by the chunk and
/// retains any unterminated remainder for the next call. A frame is never
/// required to arrive in a single read.
///
/// Protocol violations (a bad escape code, an oversized frame) discard the
/// in-progress frame, log once, and resynchronize; they are never raised
/// to the caller.
pub struct FrameDecoder {
    mode: Mode,
    scratch: BytesMut,
    violations: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            mode: Mode::AwaitingFrame,
            scratch: BytesMut::with_capacity(INITIAL_SCRATCH_CAPACITY),
            violations: 0,
        }
    }

    /// Consume a chunk of newly read bytes and return every complete,
    /// unescaped frame it finishes, in wire order.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for &byte in bytes {
            match self.push(byte) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "framing violation, resynchronizing");
                    self.violations += 1;
                }
            }
        }
        frames
    }

    /// Number of framing violations observed since creation.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Discard any partial frame and return to the idle state.
    pub fn reset(&mut self) {
        self.mode = Mode::AwaitingFrame;
        self.scratch.clear();
    }

    fn push(&mut self, byte: u8) -> Result<Option<Bytes>, FrameError> {
        match self.mode {
            Mode::AwaitingFrame => {
                if byte == FRAME_END {
                    // Idle byte between frames.
                    return Ok(None);
                }
                self.scratch.clear();
                self.mode = Mode::InFrame;
                self.consume(byte)
            }
            Mode::InFrame => self.consume(byte),
            Mode::InEscape => match byte {
                ESC_END => {
                    self.mode = Mode::InFrame;
                    self.accept(FRAME_END)
                }
                ESC_ESC => {
                    self.mode = Mode::InFrame;
                    self.accept(FRAME_ESC)
                }
                code => {
                    self.reset();
                    Err(FrameError::BadEscape { code })
                }
            },
            Mode::Discarding => {
                if byte == FRAME_END {
                    self.mode = Mode::AwaitingFrame;
                }
                Ok(None)
            }
        }
    }

    fn consume(&mut self, byte: u8) -> Result<Option<Bytes>, FrameError> {
        match byte {
            FRAME_END => {
                self.mode = Mode::AwaitingFrame;
                Ok(Some(self.scratch.split().freeze()))
            }
            FRAME_ESC => {
                self.mode = Mode::InEscape;
                Ok(None)
            }
            other => self.accept(other),
        }
    }

    fn accept(&mut self, byte: u8) -> Result<Option<Bytes>, FrameError> {
        if self.scratch.len() >= MAX_FRAME {
            let len = self.scratch.len();
            self.scratch.clear();
            self.mode = Mode::Discarding;
            return Err(FrameError::FrameTooLong {
                len,
                max: MAX_FRAME,
            });
        }
        self.scratch.put_u8(byte);
        Ok(None)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;

    fn encode(frame: &[u8]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        encode_frame(frame, &mut wire);
        wire.to_vec()
    }

    #[test]
    fn roundtrip_plain_frame() {
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&encode(b"hello"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"hello");
    }

    #[test]
    fn roundtrip_with_reserved_bytes_in_payload() {
        let payload = [0x00, FRAME_END, 0x7F, FRAME_ESC, FRAME_END, FRAME_ESC, 0xFF];
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&encode(&payload));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), payload);
    }

    #[test]
    fn chunk_boundary_independence() {
        // Splitting the encoded bytes at every possible boundary must yield
        // the same single frame as decoding in one call.
        let payload = [0x01, FRAME_END, FRAME_ESC, 0x02];
        let wire = encode(&payload);
        for split in 0..=wire.len() {
            let mut dec = FrameDecoder::new();
            let mut frames = dec.decode(&wire[..split]);
            frames.extend(dec.decode(&wire[split..]));
            assert_eq!(frames.len(), 1, "split at {split}");
            assert_eq!(frames[0].as_ref(), payload, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_decoding() {
        let payload = [FRAME_ESC, FRAME_END, 0x55];
        let wire = encode(&payload);
        let mut dec = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in wire {
            frames.extend(dec.decode(&[byte]));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), payload);
    }

    #[test]
    fn multi_frame_extraction() {
        let mut wire = Vec::new();
        wire.extend(encode(b"one"));
        wire.extend(encode(b"two"));
        wire.extend(encode(&[FRAME_END, FRAME_ESC]));
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_ref(), b"one");
        assert_eq!(frames[1].as_ref(), b"two");
        assert_eq!(frames[2].as_ref(), &[FRAME_END, FRAME_ESC]);
    }

    #[test]
    fn leading_delimiters_are_idle() {
        let mut wire = vec![FRAME_END; 5];
        wire.extend(encode(b"x"));
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"x");
    }

    #[test]
    fn bad_escape_discards_frame_and_resyncs() {
        // Corrupted frame: escape followed by a code that is neither
        // substitution. The in-progress frame is discarded; the following
        // valid frame decodes normally.
        let mut wire = vec![FRAME_END, 0x10, 0x20, FRAME_ESC, 0x99, FRAME_END];
        wire.extend(encode(b"good"));
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"good");
        assert_eq!(dec.violations(), 1);
    }

    #[test]
    fn escape_then_delimiter_is_a_violation() {
        let wire = [FRAME_END, 0x10, FRAME_ESC, FRAME_END];
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert!(frames.is_empty());
        assert_eq!(dec.violations(), 1);
    }

    #[test]
    fn partial_frame_survives_across_calls() {
        let wire = encode(b"late");
        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&wire[..3]).is_empty());
        let frames = dec.decode(&wire[3..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"late");
    }

    #[test]
    fn oversized_frame_is_discarded() {
        let mut wire = vec![FRAME_END];
        wire.extend(std::iter::repeat(0x11).take(MAX_FRAME + 10));
        wire.push(FRAME_END);
        wire.extend(encode(b"after"));
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert_eq!(dec.violations(), 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"after");
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&[FRAME_END, 0x01, 0x02]).is_empty());
        dec.reset();
        let frames = dec.decode(&encode(b"fresh"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"fresh");
    }
}
