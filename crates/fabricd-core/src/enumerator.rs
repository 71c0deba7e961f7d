use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use fabricd_proto::{Operation, Packet, MAX_PAYLOAD, NUM_CORES};
use tracing::{debug, info, warn};

use crate::loader::DriverLoader;
use crate::registry::{CoreRegistry, RxCallback, SlotId};
use crate::send::PacketTx;
use crate::timer::{TimerHandle, TimerId};

/// Core id of the enumeration ROM, and of the enumerator itself.
pub const ROM_CORE: u8 = 0;

/// Total size of the enumeration ROM image.
pub const ROM_SIZE: usize = 2048;

/// Reading this register streams ROM bytes from the core's internal cursor.
pub const ROM_DATA_REG: u8 = 0;

/// Writing any value here rewinds the internal read cursor to offset 0.
pub const ROM_RESET_REG: u8 = 1;

/// Leading ROM strings before the per-core driver names: copyright,
/// licensee, build date, then five unused slots.
pub const ROM_RESERVED_STRINGS: usize = 8;

/// ROM token meaning "no driver for this core".
pub const NO_DRIVER: &str = "null";

/// Guard window for each outstanding ROM read.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(2);

const ENUMERATOR_SLOT: SlotId = SlotId(0);
const ENUMERATOR_DRIVER: &str = "enumerator";

/// Enumeration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reset and first read issued; nothing received yet.
    AwaitingFirstRead,
    /// Accumulating ROM bytes.
    Reading,
    /// ROM parsed, drivers triggered, guard cancelled. Terminal.
    Done,
}

/// User-visible attributes from the leading ROM strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub copyright: String,
    pub licensee: String,
}

#[derive(Debug, thiserror::Error)]
enum RomError {
    #[error("string {index} runs past the ROM end without a terminator")]
    Unterminated { index: usize },
    #[error("string {index} is not valid UTF-8")]
    NotText { index: usize },
}

/// Discovers which driver belongs to which core by pulling the enumeration
/// ROM out of the hardware, then triggers driver loading.
///
/// One component, two interfaces: the ordinary driver interface (it owns
/// core 0 and receives its packets through the dispatcher like any other
/// driver) and the bootstrap interface ([`Enumerator::start`], which
/// populates the registry for every other core).
///
/// There is no bound on restarts: a board with a permanently corrupt ROM
/// retries at the guard interval forever, because without enumeration data
/// no peripheral can ever be used.
pub struct Enumerator {
    tx: Rc<dyn PacketTx>,
    timers: TimerHandle,
    registry: Rc<RefCell<CoreRegistry>>,
    loader: Rc<RefCell<dyn DriverLoader>>,
    guard_timeout: Duration,
    phase: Phase,
    rom: Vec<u8>,
    guard: Option<TimerId>,
    board: Option<BoardInfo>,
    self_ref: Weak<RefCell<Enumerator>>,
}

impl Enumerator {
    pub fn new(
        tx: Rc<dyn PacketTx>,
        timers: TimerHandle,
        registry: Rc<RefCell<CoreRegistry>>,
        loader: Rc<RefCell<dyn DriverLoader>>,
    ) -> Rc<RefCell<Self>> {
        Self::with_guard_timeout(tx, timers, registry, loader, DEFAULT_GUARD_TIMEOUT)
    }

    pub fn with_guard_timeout(
        tx: Rc<dyn PacketTx>,
        timers: TimerHandle,
        registry: Rc<RefCell<CoreRegistry>>,
        loader: Rc<RefCell<dyn DriverLoader>>,
        guard_timeout: Duration,
    ) -> Rc<RefCell<Self>> {
        let this = Rc::new(RefCell::new(Self {
            tx,
            timers,
            registry,
            loader,
            guard_timeout,
            phase: Phase::AwaitingFirstRead,
            rom: Vec::with_capacity(ROM_SIZE),
            guard: None,
            board: None,
            self_ref: Weak::new(),
        }));
        this.borrow_mut().self_ref = Rc::downgrade(&this);
        this
    }

    /// Bootstrap interface: register the core-0 callback and begin the ROM
    /// read sequence.
    pub fn start(this: &Rc<RefCell<Self>>) {
        let callback: RxCallback = {
            let enumerator = Rc::clone(this);
            Rc::new(RefCell::new(move |packet: &Packet| {
                enumerator.borrow_mut().on_packet(packet);
            }))
        };
        let mut en = this.borrow_mut();
        {
            let mut registry = en.registry.borrow_mut();
            registry.set_driver(ROM_CORE, ENUMERATOR_DRIVER);
            registry.register(ROM_CORE, ENUMERATOR_SLOT, callback);
        }
        en.begin_read();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Offset into the ROM image already retrieved.
    pub fn cursor(&self) -> usize {
        self.rom.len()
    }

    pub fn board(&self) -> Option<&BoardInfo> {
        self.board.as_ref()
    }

    /// Driver interface: every validated packet addressed to core 0.
    pub fn on_packet(&mut self, packet: &Packet) {
        if self.phase == Phase::Done {
            debug!("ignoring ROM core packet after enumeration");
            return;
        }
        if packet.op != Operation::Read {
            return;
        }
        let returned = packet.returned();
        if returned == 0 {
            return;
        }
        if self.rom.len() + returned > ROM_SIZE {
            // Desync between our cursor and the hardware's; drop the
            // response and let the guard timer force a clean restart.
            warn!(
                cursor = self.rom.len(),
                returned, "ROM response overruns table, waiting for guard restart"
            );
            return;
        }

        self.phase = Phase::Reading;
        self.rom.extend_from_slice(&packet.payload);

        if self.rom.len() < ROM_SIZE {
            self.request_next_chunk();
            self.rearm_guard();
            return;
        }

        if let Err(err) = self.finish() {
            // Malformed ROM is indistinguishable from a corrupted read;
            // retrying is always the right answer.
            warn!(%err, "ROM parse failed, waiting for guard restart");
            self.phase = Phase::AwaitingFirstRead;
            self.rom.clear();
        }
    }

    /// Reset the hardware's ROM cursor and request the first chunk.
    /// Idempotent; also the restart path for every guard expiry.
    fn begin_read(&mut self) {
        self.phase = Phase::AwaitingFirstRead;
        self.rom.clear();
        if let Err(err) = self.tx.send_write(ROM_CORE, ROM_RESET_REG, &[0]) {
            debug!(%err, "ROM reset write failed, guard timer will retry");
        }
        self.request_next_chunk();
        self.rearm_guard();
    }

    fn request_next_chunk(&mut self) {
        let want = (ROM_SIZE - self.rom.len()).min(MAX_PAYLOAD) as u8;
        if let Err(err) = self.tx.send_read(ROM_CORE, ROM_DATA_REG, want) {
            debug!(%err, "ROM read request failed, guard timer will retry");
        }
    }

    fn rearm_guard(&mut self) {
        if let Some(id) = self.guard.take() {
            self.timers.cancel(id);
        }
        let weak = self.self_ref.clone();
        let id = self.timers.arm_oneshot(
            self.guard_timeout,
            Rc::new(RefCell::new(move || {
                if let Some(enumerator) = weak.upgrade() {
                    enumerator.borrow_mut().on_guard_timeout();
                }
            })),
        );
        self.guard = Some(id);
    }

    fn on_guard_timeout(&mut self) {
        if self.phase == Phase::Done {
            return;
        }
        warn!(
            cursor = self.rom.len(),
            "no ROM response within guard window, restarting enumeration"
        );
        self.guard = None;
        self.begin_read();
    }

    /// Parse the completed ROM and trigger driver loading for every named
    /// core. Cancels the guard timer exactly once, on success.
    fn finish(&mut self) -> Result<(), RomError> {
        let strings = parse_rom_strings(&self.rom)?;
        self.board = Some(BoardInfo {
            copyright: strings[0].clone(),
            licensee: strings[1].clone(),
        });

        for core in 1..NUM_CORES as u8 {
            let name = &strings[ROM_RESERVED_STRINGS + core as usize];
            if name.is_empty() || name.as_str() == NO_DRIVER {
                debug!(core, "no driver for core");
                continue;
            }
            match self.loader.borrow_mut().load(core, name) {
                Ok(slot) => {
                    self.registry.borrow_mut().set_driver(core, name);
                    info!(core, driver = %name, slot = slot.0, "driver load triggered");
                }
                Err(err) => {
                    warn!(core, driver = %name, %err, "driver load failed");
                }
            }
        }

        if let Some(id) = self.guard.take() {
            self.timers.cancel(id);
        }
        self.phase = Phase::Done;
        info!("core enumeration complete");
        Ok(())
    }
}

/// Split the ROM image into its fixed string table: the reserved strings
/// followed by one driver name per core id.
fn parse_rom_strings(rom: &[u8]) -> Result<Vec<String>, RomError> {
    let needed = ROM_RESERVED_STRINGS + NUM_CORES;
    let mut strings = Vec::with_capacity(needed);
    let mut start = 0usize;
    for index in 0..needed {
        let end = rom[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .ok_or(RomError::Unterminated { index })?;
        let text =
            std::str::from_utf8(&rom[start..end]).map_err(|_| RomError::NotText { index })?;
        strings.push(text.to_string());
        start = end + 1;
    }
    Ok(strings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_image(reserved: &[&str], drivers: &[&str]) -> Vec<u8> {
        let mut rom = Vec::new();
        for s in reserved.iter().chain(drivers) {
            rom.extend_from_slice(s.as_bytes());
            rom.push(0);
        }
        rom.resize(ROM_SIZE, 0);
        rom
    }

    #[test]
    fn parses_reserved_and_driver_strings() {
        let rom = rom_image(
            &["(c) 2026", "Acme Corp", "2026-08-28", "", "", "", "", ""],
            &["enumerator", "bb4io", "gpio4", ""],
        );
        let strings = parse_rom_strings(&rom).unwrap();
        assert_eq!(strings[0], "(c) 2026");
        assert_eq!(strings[1], "Acme Corp");
        assert_eq!(strings[ROM_RESERVED_STRINGS], "enumerator");
        assert_eq!(strings[ROM_RESERVED_STRINGS + 1], "bb4io");
        assert_eq!(strings[ROM_RESERVED_STRINGS + 2], "gpio4");
        assert_eq!(strings[ROM_RESERVED_STRINGS + 3], "");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let rom = vec![b'x'; ROM_SIZE];
        assert!(matches!(
            parse_rom_strings(&rom),
            Err(RomError::Unterminated { index: 0 })
        ));
    }

    #[test]
    fn non_utf8_string_is_an_error() {
        let mut rom = vec![0xFFu8, 0xFE, 0x00];
        rom.resize(ROM_SIZE, 0);
        assert!(matches!(
            parse_rom_strings(&rom),
            Err(RomError::NotText { index: 0 })
        ));
    }
}
