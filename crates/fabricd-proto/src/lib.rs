//! Packet model, wire encoding, and validation for the fabricd protocol.
//!
//! Every exchange with the FPGA board is one [`Packet`]: an operation
//! (read or write) against a register range on one hardware core. The wire
//! layout overlays fixed sentinel bits onto the operation and core bytes for
//! link-level sanity checking; that bit-packing lives only in
//! [`Packet::to_wire`] and [`validate`]; the in-memory representation is
//! sentinel-free.

pub mod error;
pub mod packet;
pub mod validate;

pub use error::Violation;
pub use packet::{Operation, Packet, HEADER_SIZE, MAX_PAYLOAD, NUM_CORES};
pub use validate::validate;
