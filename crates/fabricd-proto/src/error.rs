/// Structural validation failures for a deframed buffer.
///
/// A violation means the frame is dropped and logged; it is never fatal to
/// the link, which continues to be read.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Violation {
    /// Frame shorter than the packet header.
    #[error("frame too short ({len} bytes)")]
    TooShort { len: usize },

    /// The op/flags byte does not carry the fixed high-nibble sentinel.
    #[error("bad operation sentinel in byte 0x{byte:02X}")]
    BadOpSentinel { byte: u8 },

    /// The operation bits decode to neither a read nor a write.
    #[error("unknown operation bits 0x{bits:02X}")]
    UnknownOperation { bits: u8 },

    /// The core byte does not carry the fixed addressing sentinel.
    #[error("bad addressing sentinel in byte 0x{byte:02X}")]
    BadCoreSentinel { byte: u8 },

    /// Core index outside the registry range.
    #[error("core id {core} out of range")]
    CoreOutOfRange { core: u8 },

    /// Declared count exceeds the protocol's per-packet maximum.
    #[error("count {count} exceeds protocol maximum")]
    CountTooLarge { count: u8 },

    /// Payload length disagrees with the count field.
    #[error("payload length mismatch (declared {declared}, got {actual})")]
    LengthMismatch { declared: u8, actual: usize },

    /// A read response whose trailing remainder byte disagrees with
    /// `requested - returned`; indicates a dropped, duplicated, or
    /// corrupted byte.
    #[error("read count mismatch (expected remainder {expected}, got {actual})")]
    CountMismatch { expected: u8, actual: u8 },
}
