//! Raw serial-link transport for the fabricd daemon.
//!
//! This is the lowest layer: it owns the file descriptor of the USB serial
//! device the FPGA board is attached to, configures it for raw non-blocking
//! I/O, and exposes plain `Read`/`Write` so everything above stays generic
//! and testable. Nothing else in the daemon touches the descriptor.

pub mod error;

#[cfg(unix)]
pub mod serial;

pub use error::{LinkError, Result};

#[cfg(unix)]
pub use serial::SerialLink;
