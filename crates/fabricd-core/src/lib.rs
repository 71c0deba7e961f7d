//! Dispatch core of the fabricd daemon.
//!
//! Everything between the serial link and the peripheral drivers lives
//! here: the non-blocking port wrapper feeding the frame decoder, the
//! per-core callback registry and dispatcher, the timer wheel, and the
//! enumerator that reads the board's ROM to decide which drivers to load.
//!
//! The whole crate is single-threaded by design. Shared state is
//! `Rc<RefCell<_>>`, callbacks run to completion on the poll-loop thread,
//! and nothing here may block.

#[cfg(unix)]
pub mod daemon;
pub mod dispatch;
pub mod enumerator;
pub mod error;
pub mod loader;
pub mod port;
pub mod registry;
pub mod send;
pub mod timer;

#[cfg(unix)]
pub use daemon::{deliver, Daemon, DaemonConfig};
pub use dispatch::Dispatcher;
pub use enumerator::{
    BoardInfo, Enumerator, Phase, DEFAULT_GUARD_TIMEOUT, NO_DRIVER, ROM_CORE, ROM_DATA_REG,
    ROM_RESERVED_STRINGS, ROM_RESET_REG, ROM_SIZE,
};
pub use error::{LoadError, SendError};
pub use loader::{DriverLoader, LoggingLoader};
pub use port::{LinkPort, PortHandle};
pub use registry::{CoreEntry, CoreRegistry, CoreState, RxCallback, SlotId};
pub use send::PacketTx;
pub use timer::{TimerHandle, TimerId, TimerWheel};
