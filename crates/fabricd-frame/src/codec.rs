use bytes::{BufMut, BytesMut};

/// Frame delimiter. Opens and closes every frame on the wire; runs of
/// delimiters between frames are idle/keep-alive bytes.
pub const FRAME_END: u8 = 0xC0;

/// Escape introducer for literal delimiter/escape bytes inside a frame.
pub const FRAME_ESC: u8 = 0xDB;

/// `FRAME_ESC ESC_END` stands for a literal `FRAME_END` payload byte.
pub const ESC_END: u8 = 0xDC;

/// `FRAME_ESC ESC_ESC` stands for a literal `FRAME_ESC` payload byte.
pub const ESC_ESC: u8 = 0xDD;

/// Largest unescaped frame the decoder will accumulate.
///
/// The packet layer never produces frames anywhere near this; anything
/// larger is a corrupted stream and is discarded.
pub const MAX_FRAME: usize = 256;

/// Encode one frame into delimiter-wrapped, escaped wire bytes.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────────────────────────┬───────────┐
/// │ END (1B)  │ escaped frame bytes          │ END (1B)  │
/// │ 0xC0      │ 0xC0 → 0xDB 0xDC             │ 0xC0      │
/// │           │ 0xDB → 0xDB 0xDD             │           │
/// └───────────┴──────────────────────────────┴───────────┘
/// ```
pub fn encode_frame(frame: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(frame));
    dst.put_u8(FRAME_END);
    for &byte in frame {
        match byte {
            FRAME_END => {
                dst.put_u8(FRAME_ESC);
                dst.put_u8(ESC_END);
            }
            FRAME_ESC => {
                dst.put_u8(FRAME_ESC);
                dst.put_u8(ESC_ESC);
            }
            other => dst.put_u8(other),
        }
    }
    dst.put_u8(FRAME_END);
}

/// Exact number of wire bytes `encode_frame` produces for `frame`.
pub fn encoded_len(frame: &[u8]) -> usize {
    let escapes = frame
        .iter()
        .filter(|&&b| b == FRAME_END || b == FRAME_ESC)
        .count();
    frame.len() + escapes + 2
}
