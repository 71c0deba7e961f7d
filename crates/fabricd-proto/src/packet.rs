use bytes::{BufMut, Bytes, BytesMut};

/// Number of addressable cores on the fabric.
pub const NUM_CORES: usize = 16;

/// Largest payload the protocol carries in a single packet.
pub const MAX_PAYLOAD: usize = 60;

/// Wire header size: op/flags, core, register, count.
pub const HEADER_SIZE: usize = 4;

/// Fixed sentinel in the high nibble of the op/flags byte.
pub(crate) const OP_SENTINEL: u8 = 0xA0;

/// Fixed addressing sentinel in the high nibble of the core byte.
pub(crate) const CORE_SENTINEL: u8 = 0xE0;

pub(crate) const SENTINEL_MASK: u8 = 0xF0;
pub(crate) const CORE_MASK: u8 = 0x0F;

// Low-nibble operation bits of byte 0.
pub(crate) const OP_WRITE: u8 = 0x01;
pub(crate) const OP_READ: u8 = 0x02;
pub(crate) const OP_AUTOINC: u8 = 0x04;
pub(crate) const OP_AUTOPUSH: u8 = 0x08;

/// Packet operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read registers. Outbound: a request for `count` bytes. Inbound: a
    /// response carrying the returned bytes plus a trailing remainder.
    Read,
    /// Write `count` payload bytes starting at `register`.
    Write,
}

/// One protocol exchange unit.
///
/// Constructed fresh per send/receive; never persisted. The sentinel bits of
/// the wire layout do not appear here; see [`Packet::to_wire`] and
/// [`crate::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub op: Operation,
    /// Register address advances automatically across payload bytes.
    pub auto_inc: bool,
    /// Set by hardware only: this packet was not solicited by a host
    /// request.
    pub auto_push: bool,
    /// 0-based core index, `< NUM_CORES`.
    pub core: u8,
    /// Starting register address on the target core.
    pub register: u8,
    /// Read request: bytes requested. Write: payload length. Read response:
    /// bytes originally requested (the payload carries what was returned).
    pub count: u8,
    pub payload: Bytes,
    /// Read responses only: `requested - returned`.
    pub remaining: Option<u8>,
}

impl Packet {
    /// A host-side read request for `count` bytes starting at `register`.
    pub fn read_request(core: u8, register: u8, count: u8) -> Self {
        Self {
            op: Operation::Read,
            auto_inc: false,
            auto_push: false,
            core,
            register,
            count,
            payload: Bytes::new(),
            remaining: None,
        }
    }

    /// A host-side write of `payload` starting at `register`.
    pub fn write(core: u8, register: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            op: Operation::Write,
            auto_inc: false,
            auto_push: false,
            core,
            register,
            count: payload.len() as u8,
            payload,
            remaining: None,
        }
    }

    /// Set the auto-increment addressing flag.
    pub fn with_auto_inc(mut self) -> Self {
        self.auto_inc = true;
        self
    }

    /// Bytes actually carried by this packet.
    pub fn returned(&self) -> usize {
        self.payload.len()
    }

    /// Encode for transmission, applying the sentinel bit-packing the
    /// hardware expects.
    ///
    /// Outbound packets never carry the push flag or a remainder byte;
    /// those exist only on the inbound path.
    pub fn to_wire(&self, dst: &mut BytesMut) {
        let mut op = OP_SENTINEL;
        op |= match self.op {
            Operation::Read => OP_READ,
            Operation::Write => OP_WRITE,
        };
        if self.auto_inc {
            op |= OP_AUTOINC;
        }
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_u8(op);
        dst.put_u8(CORE_SENTINEL | (self.core & CORE_MASK));
        dst.put_u8(self.register);
        dst.put_u8(self.count);
        if self.op == Operation::Write {
            dst.put_slice(&self.payload);
        }
    }
}
