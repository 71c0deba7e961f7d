use std::cell::RefCell;
use std::rc::Rc;

use fabricd_proto::{Packet, NUM_CORES};
use tracing::{debug, warn};

/// Receive callback a driver registers for its core. Invoked synchronously
/// on the event-loop thread with each validated packet; must not block.
pub type RxCallback = Rc<RefCell<dyn FnMut(&Packet)>>;

/// The daemon's own index for a loaded driver module; distinct from, but
/// mapped to, a core id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub usize);

/// Explicit per-core load state.
///
/// "Not yet booted" and "genuine routing error" are distinguished by this
/// enum rather than inferred from a null callback.
pub enum CoreState {
    Unloaded,
    Loaded { callback: RxCallback, slot: SlotId },
}

impl std::fmt::Debug for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreState::Unloaded => f.write_str("Unloaded"),
            CoreState::Loaded { slot, .. } => f.debug_struct("Loaded").field("slot", slot).finish(),
        }
    }
}

/// One core's registry entry. Lives for the process lifetime.
#[derive(Debug)]
pub struct CoreEntry {
    core: u8,
    driver: Option<String>,
    state: CoreState,
}

impl CoreEntry {
    pub fn core(&self) -> u8 {
        self.core
    }

    /// Driver name recorded by the enumerator, if any.
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, CoreState::Loaded { .. })
    }

    pub fn slot(&self) -> Option<SlotId> {
        match self.state {
            CoreState::Loaded { slot, .. } => Some(slot),
            CoreState::Unloaded => None,
        }
    }
}

/// Fixed-size table mapping core ids to driver state.
///
/// Mutated only by `register`/`unregister`/`set_driver`, read by dispatch;
/// everything happens on the single event-loop thread, so the only guard
/// needed is the `RefCell` it usually lives inside.
#[derive(Debug)]
pub struct CoreRegistry {
    cores: Vec<CoreEntry>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        let cores = (0..NUM_CORES as u8)
            .map(|core| CoreEntry {
                core,
                driver: None,
                state: CoreState::Unloaded,
            })
            .collect();
        Self { cores }
    }

    /// Attach a receive callback for `core`. Re-registering a core that
    /// already has one replaces it (hot-reload semantics).
    pub fn register(&mut self, core: u8, slot: SlotId, callback: RxCallback) {
        let Some(entry) = self.cores.get_mut(core as usize) else {
            warn!(core, "register for core out of range");
            return;
        };
        if entry.is_loaded() {
            debug!(core, "replacing receive callback");
        }
        entry.state = CoreState::Loaded { callback, slot };
    }

    /// Detach the callback for `core`, returning it to `Unloaded`.
    pub fn unregister(&mut self, core: u8) {
        let Some(entry) = self.cores.get_mut(core as usize) else {
            warn!(core, "unregister for core out of range");
            return;
        };
        entry.state = CoreState::Unloaded;
    }

    /// Record which driver module belongs to `core`.
    pub fn set_driver(&mut self, core: u8, driver: &str) {
        if let Some(entry) = self.cores.get_mut(core as usize) {
            entry.driver = Some(driver.to_string());
        }
    }

    pub fn driver(&self, core: u8) -> Option<&str> {
        self.cores.get(core as usize).and_then(CoreEntry::driver)
    }

    pub fn is_loaded(&self, core: u8) -> bool {
        self.cores
            .get(core as usize)
            .is_some_and(CoreEntry::is_loaded)
    }

    pub fn entry(&self, core: u8) -> Option<&CoreEntry> {
        self.cores.get(core as usize)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CoreEntry> {
        self.cores.iter()
    }

    /// Clone the callback handle out so the caller can invoke it without
    /// holding a borrow of the registry (callbacks may re-enter `register`).
    pub(crate) fn callback(&self, core: u8) -> Option<RxCallback> {
        self.cores.get(core as usize).and_then(|e| match &e.state {
            CoreState::Loaded { callback, .. } => Some(Rc::clone(callback)),
            CoreState::Unloaded => None,
        })
    }
}

impl Default for CoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> RxCallback {
        Rc::new(RefCell::new(|_: &Packet| {}))
    }

    #[test]
    fn starts_fully_unloaded() {
        let reg = CoreRegistry::new();
        for core in 0..NUM_CORES as u8 {
            assert!(!reg.is_loaded(core));
            assert!(reg.driver(core).is_none());
        }
    }

    #[test]
    fn register_marks_loaded_with_slot() {
        let mut reg = CoreRegistry::new();
        reg.register(3, SlotId(7), noop());
        assert!(reg.is_loaded(3));
        assert_eq!(reg.entry(3).unwrap().slot(), Some(SlotId(7)));
        assert!(!reg.is_loaded(4));
    }

    #[test]
    fn reregister_replaces_callback() {
        let mut reg = CoreRegistry::new();
        let first_hits = Rc::new(RefCell::new(0u32));
        let second_hits = Rc::new(RefCell::new(0u32));

        let h = Rc::clone(&first_hits);
        reg.register(
            1,
            SlotId(1),
            Rc::new(RefCell::new(move |_: &Packet| *h.borrow_mut() += 1)),
        );
        let h = Rc::clone(&second_hits);
        reg.register(
            1,
            SlotId(2),
            Rc::new(RefCell::new(move |_: &Packet| *h.borrow_mut() += 1)),
        );

        let cb = reg.callback(1).unwrap();
        (cb.borrow_mut())(&Packet::read_request(1, 0, 1));
        assert_eq!(*first_hits.borrow(), 0);
        assert_eq!(*second_hits.borrow(), 1);
        assert_eq!(reg.entry(1).unwrap().slot(), Some(SlotId(2)));
    }

    #[test]
    fn unregister_returns_to_unloaded() {
        let mut reg = CoreRegistry::new();
        reg.register(5, SlotId(1), noop());
        reg.unregister(5);
        assert!(!reg.is_loaded(5));
        assert!(reg.callback(5).is_none());
    }

    #[test]
    fn out_of_range_register_is_ignored() {
        let mut reg = CoreRegistry::new();
        reg.register(200, SlotId(1), noop());
        assert!(reg.entry(200).is_none());
    }

    #[test]
    fn driver_name_survives_unregister() {
        let mut reg = CoreRegistry::new();
        reg.set_driver(2, "gpio4");
        reg.register(2, SlotId(1), noop());
        reg.unregister(2);
        assert_eq!(reg.driver(2), Some("gpio4"));
    }
}
