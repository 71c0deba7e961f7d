use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fabricd_link::{LinkError, SerialLink};
use fabricd_proto::validate;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::enumerator::{Enumerator, DEFAULT_GUARD_TIMEOUT};
use crate::error::SendError;
use crate::loader::DriverLoader;
use crate::port::{LinkPort, PortHandle};
use crate::registry::CoreRegistry;
use crate::timer::{TimerHandle, TimerId};

/// Longest single poll sleep; keeps shutdown-flag checks timely.
const POLL_CAP: Duration = Duration::from_millis(250);

/// How often a lost link is retried.
const REOPEN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub device: PathBuf,
    pub baud: u32,
    pub guard_timeout: Duration,
}

impl DaemonConfig {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            baud: 115200,
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
        }
    }
}

/// The single-threaded event loop tying the core together.
///
/// One serial descriptor plus the timer wheel, driven by `poll(2)`:
/// readable bytes flow decoder → validator → dispatcher, writable events
/// flush the parked send tail, due timers fire after I/O. Everything runs
/// to completion on this thread; no driver callback may block it.
pub struct Daemon {
    config: DaemonConfig,
    port: PortHandle<SerialLink>,
    timers: TimerHandle,
    dispatcher: Dispatcher,
    enumerator: Rc<RefCell<Enumerator>>,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        loader: Rc<RefCell<dyn DriverLoader>>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, LinkError> {
        let link = SerialLink::open(&config.device, config.baud)?;
        let port = PortHandle::attached(LinkPort::new(link));
        let timers = TimerHandle::new();
        let registry = Rc::new(RefCell::new(CoreRegistry::new()));
        let dispatcher = Dispatcher::new(Rc::clone(&registry));
        let enumerator = Enumerator::with_guard_timeout(
            Rc::new(port.clone()),
            timers.clone(),
            registry,
            loader,
            config.guard_timeout,
        );
        Ok(Self {
            config,
            port,
            timers,
            dispatcher,
            enumerator,
            shutdown,
        })
    }

    /// Seams handed to drivers: packet send and timers.
    pub fn port(&self) -> &PortHandle<SerialLink> {
        &self.port
    }

    pub fn timers(&self) -> &TimerHandle {
        &self.timers
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn enumerator(&self) -> &Rc<RefCell<Enumerator>> {
        &self.enumerator
    }

    /// Run until the shutdown flag is set.
    pub fn run(&mut self) {
        Enumerator::start(&self.enumerator);
        info!(device = ?self.config.device, baud = self.config.baud, "fabricd running");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.turn();
        }
        info!("shutting down");
    }

    fn turn(&mut self) {
        let timeout = self.poll_timeout();
        match self.port.raw_fd() {
            Some(fd) => self.poll_link(fd, timeout),
            None => std::thread::sleep(timeout),
        }
        self.timers.fire_due(Instant::now());
    }

    fn poll_timeout(&self) -> Duration {
        self.timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(POLL_CAP)
            .min(POLL_CAP)
    }

    fn poll_link(&mut self, fd: RawFd, timeout: Duration) {
        let mut events = libc::POLLIN;
        if self.port.has_pending() {
            events |= libc::POLLOUT;
        }
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the duration of the call and the
        // fd stays open; the port is only detached from this same thread.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as i32) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                warn!(%err, "poll failed");
            }
            return;
        }
        if rc == 0 {
            return;
        }

        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            self.link_lost("device hangup");
            return;
        }
        if pfd.revents & libc::POLLOUT != 0 {
            match self.port.flush_pending() {
                Ok(()) | Err(SendError::Busy) => {}
                Err(err) => {
                    warn!(%err, "flush failed");
                    self.link_lost("write error");
                    return;
                }
            }
        }
        if pfd.revents & libc::POLLIN != 0 {
            match self.port.poll_read() {
                Ok(frames) => {
                    for frame in frames {
                        deliver(&self.dispatcher, &frame);
                    }
                }
                Err(err) => {
                    warn!(%err, "read failed");
                    self.link_lost("read error");
                }
            }
        }
    }

    /// Detach the dead link and retry the device until it comes back
    /// (USB re-enumeration after unplug/replug).
    fn link_lost(&mut self, reason: &str) {
        warn!(reason, "serial link lost, scheduling reopen");
        self.port.detach();

        let port = self.port.clone();
        let device = self.config.device.clone();
        let baud = self.config.baud;
        let timers = self.timers.clone();
        let own_id: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let id_slot = Rc::clone(&own_id);
        let id = self.timers.arm_periodic(
            REOPEN_INTERVAL,
            Rc::new(RefCell::new(move || match SerialLink::open(&device, baud) {
                Ok(link) => {
                    info!(?device, "serial link reattached");
                    port.attach(LinkPort::new(link));
                    if let Some(id) = id_slot.take() {
                        timers.cancel(id);
                    }
                }
                Err(err) => debug!(%err, "reopen attempt failed"),
            })),
        );
        own_id.set(Some(id));
    }

    /// Atomically tear down the current link and attach a fresh one:
    /// the reconfiguration path when a port is reassigned.
    pub fn reconfigure(&mut self, device: impl AsRef<Path>, baud: u32) -> Result<(), LinkError> {
        let link = SerialLink::open(device.as_ref(), baud)?;
        self.config.device = device.as_ref().to_path_buf();
        self.config.baud = baud;
        self.port.attach(LinkPort::new(link));
        info!(device = ?self.config.device, baud, "link reconfigured");
        Ok(())
    }
}

/// Validate one deframed buffer and dispatch it; violations are logged and
/// the frame dropped, never fatal to the link.
pub fn deliver(dispatcher: &Dispatcher, frame: &[u8]) {
    match validate(frame) {
        Ok(packet) => dispatcher.dispatch(&packet),
        Err(violation) => warn!(%violation, "dropping invalid packet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SlotId;
    use fabricd_proto::Packet;

    #[test]
    fn deliver_drops_invalid_frames_before_dispatch() {
        let registry = Rc::new(RefCell::new(CoreRegistry::new()));
        let hits = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&hits);
        registry.borrow_mut().register(
            1,
            SlotId(1),
            Rc::new(RefCell::new(move |_: &Packet| *sink.borrow_mut() += 1)),
        );
        let dispatcher = Dispatcher::new(registry);

        // Read response claiming 8 requested, 2 returned, remainder 3 (!= 6).
        deliver(&dispatcher, &[0xA2, 0xE1, 0x00, 0x08, 0x99, 0x99, 0x03]);
        assert_eq!(*hits.borrow(), 0);

        // The same frame with a consistent remainder reaches the driver.
        deliver(&dispatcher, &[0xA2, 0xE1, 0x00, 0x08, 0x99, 0x99, 0x06]);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn config_defaults() {
        let config = DaemonConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud, 115200);
        assert_eq!(config.guard_timeout, DEFAULT_GUARD_TIMEOUT);
    }
}
