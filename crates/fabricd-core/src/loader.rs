use tracing::info;

use crate::error::LoadError;
use crate::registry::SlotId;

/// Seam for "load and initialize the driver module for core N".
///
/// The mechanics (shared-library loading, driver init) belong to the
/// embedding daemon; a successful load is expected to end with the driver
/// registering its receive callback for the core.
pub trait DriverLoader {
    fn load(&mut self, core: u8, driver: &str) -> Result<SlotId, LoadError>;
}

/// Stand-in loader for deployments without driver modules on disk: assigns
/// slots sequentially and records the request in the log.
pub struct LoggingLoader {
    next_slot: usize,
}

impl LoggingLoader {
    pub fn new() -> Self {
        // Slot 0 belongs to the enumerator.
        Self { next_slot: 1 }
    }
}

impl Default for LoggingLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverLoader for LoggingLoader {
    fn load(&mut self, core: u8, driver: &str) -> Result<SlotId, LoadError> {
        let slot = SlotId(self.next_slot);
        self.next_slot += 1;
        info!(core, driver, slot = slot.0, "driver load requested");
        Ok(slot)
    }
}
