//! Delimiter/escape byte-stream framing for the fabricd serial protocol.
//!
//! The FPGA board multiplexes many hardware cores over one serial link.
//! Every packet travels inside a frame bounded by a reserved delimiter byte;
//! two escape sequences stand for literal delimiter and escape bytes inside
//! the payload, so only genuine boundaries carry the delimiter value.
//!
//! This layer has no knowledge of packet semantics. It turns an arbitrarily
//! chunked inbound byte stream into complete, unescaped frame buffers, and
//! an outbound frame buffer into escaped bytes ready to write.

pub mod codec;
pub mod decoder;
pub mod error;

pub use codec::{encode_frame, encoded_len, ESC_END, ESC_ESC, FRAME_END, FRAME_ESC, MAX_FRAME};
pub use decoder::FrameDecoder;
pub use error::{FrameError, Result};
