use fabricd_proto::Packet;

use crate::error::SendError;

/// Outbound packet-send seam used by drivers and the enumerator.
///
/// Implementations frame the packet and perform exactly one non-blocking
/// write; `Busy` (OS buffer full) is distinguished from `LinkDown` (no link
/// attached) and `Fatal` so callers can decide whether to retry.
pub trait PacketTx {
    fn send(&self, packet: &Packet) -> Result<(), SendError>;

    /// Request `count` bytes starting at `register` on `core`.
    fn send_read(&self, core: u8, register: u8, count: u8) -> Result<(), SendError> {
        self.send(&Packet::read_request(core, register, count))
    }

    /// Write `payload` starting at `register` on `core`.
    fn send_write(&self, core: u8, register: u8, payload: &[u8]) -> Result<(), SendError> {
        self.send(&Packet::write(core, register, payload.to_vec()))
    }
}
