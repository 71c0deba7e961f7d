/// Protocol violations in the escape-framed byte stream.
///
/// Violations are recovered locally by resynchronizing at the next frame
/// boundary; they are logged, never propagated to callers as fatal errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An escape byte was followed by something other than the two reserved
    /// substitution codes.
    #[error("invalid escape sequence 0xDB 0x{code:02X}")]
    BadEscape { code: u8 },

    /// The in-progress frame grew past the maximum frame size.
    #[error("frame too long ({len} bytes, max {max})")]
    FrameTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
