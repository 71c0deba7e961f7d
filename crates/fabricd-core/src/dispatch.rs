use std::cell::RefCell;
use std::rc::Rc;

use fabricd_proto::Packet;
use tracing::{debug, warn};

use crate::enumerator::ROM_CORE;
use crate::registry::CoreRegistry;

/// Routes each validated packet to the receive callback registered for its
/// core id.
///
/// Dispatch is synchronous and single-threaded: the callback runs to
/// completion before the next frame is decoded, so frames reach drivers in
/// exact wire order.
pub struct Dispatcher {
    registry: Rc<RefCell<CoreRegistry>>,
}

impl Dispatcher {
    pub fn new(registry: Rc<RefCell<CoreRegistry>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Rc<RefCell<CoreRegistry>> {
        &self.registry
    }

    /// Deliver `packet` to its core's driver, if one is attached.
    ///
    /// A missing driver is logged at warn level once the enumerator itself
    /// is up; before that it is the expected startup race (packets arriving
    /// while drivers are still being loaded) and only traced.
    pub fn dispatch(&self, packet: &Packet) {
        let callback = {
            let registry = self.registry.borrow();
            match registry.callback(packet.core) {
                Some(callback) => callback,
                None => {
                    if registry.is_loaded(ROM_CORE) {
                        warn!(core = packet.core, "no driver registered for core");
                    } else {
                        debug!(core = packet.core, "dropping packet during startup");
                    }
                    return;
                }
            }
        };
        // Borrow of the registry is released; the callback may re-enter
        // register/unregister.
        (callback.borrow_mut())(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SlotId;
    use fabricd_proto::Operation;

    fn registry() -> Rc<RefCell<CoreRegistry>> {
        Rc::new(RefCell::new(CoreRegistry::new()))
    }

    #[test]
    fn dispatch_invokes_registered_callback() {
        let reg = registry();
        let seen: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        reg.borrow_mut().register(
            4,
            SlotId(1),
            Rc::new(RefCell::new(move |p: &Packet| {
                sink.borrow_mut().push(p.clone());
            })),
        );

        let dispatcher = Dispatcher::new(reg);
        let packet = Packet::write(4, 0x10, vec![1, 2]);
        dispatcher.dispatch(&packet);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].core, 4);
        assert_eq!(seen[0].op, Operation::Write);
    }

    #[test]
    fn dispatch_without_driver_is_dropped() {
        let dispatcher = Dispatcher::new(registry());
        // No callback anywhere; must not panic, packet is dropped.
        dispatcher.dispatch(&Packet::write(9, 0, vec![0]));
    }

    #[test]
    fn callback_may_reregister_during_dispatch() {
        let reg = registry();
        let reg_inner = Rc::clone(&reg);
        reg.borrow_mut().register(
            2,
            SlotId(1),
            Rc::new(RefCell::new(move |_: &Packet| {
                // Hot reload from inside a callback must not deadlock.
                reg_inner.borrow_mut().register(
                    3,
                    SlotId(9),
                    Rc::new(RefCell::new(|_: &Packet| {})),
                );
            })),
        );

        let dispatcher = Dispatcher::new(Rc::clone(&reg));
        dispatcher.dispatch(&Packet::write(2, 0, Vec::<u8>::new()));
        assert!(reg.borrow().is_loaded(3));
    }

    #[test]
    fn packets_keep_arrival_order() {
        let reg = registry();
        let order: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        for core in [1u8, 2] {
            let sink = Rc::clone(&order);
            reg.borrow_mut().register(
                core,
                SlotId(core as usize),
                Rc::new(RefCell::new(move |p: &Packet| {
                    sink.borrow_mut().push(p.register);
                })),
            );
        }

        let dispatcher = Dispatcher::new(reg);
        for (core, register) in [(1u8, 10u8), (2, 11), (1, 12), (2, 13)] {
            dispatcher.dispatch(&Packet::write(core, register, Vec::<u8>::new()));
        }
        assert_eq!(*order.borrow(), vec![10, 11, 12, 13]);
    }
}
