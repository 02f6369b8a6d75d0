//! Soft-switch dispatch for the machine's single I/O page.
//!
//! A flat 256-slot table of read/write handlers keyed by the low byte of the
//! I/O page (conventionally `$C000-$C0FF`). A soft switch is a byte address
//! whose read or write has observable side effects on machine configuration;
//! some offsets carry different read and write semantics on the same slot.
//!
//! Unhandled reads float (`0xFF`); unhandled writes are dropped. Handlers
//! receive the originating [`BusAccess`] and must early-out of their side
//! effects when `NO_SIDE_EFFECTS` is set (debugger sweeps).

use std::cell::RefCell;
use std::rc::Rc;

use memory::{BusAccess, Target, TargetCaps};

pub const SOFT_SWITCH_SLOTS: usize = 256;

/// Expansion-slot handler blocks are 16 slots wide, starting at `$80`:
/// slot `n` decodes offsets `$80 + n*$10 .. $90 + n*$10`.
pub const SLOT_BLOCK_BASE: u8 = 0x80;
pub const SLOT_BLOCK_LEN: u8 = 0x10;

pub type ReadHandler = Box<dyn FnMut(u8, &BusAccess) -> u8>;
pub type WriteHandler = Box<dyn FnMut(u8, u8, &BusAccess)>;

/// Handler pair produced per offset when installing a slot block.
#[derive(Default)]
pub struct SlotHandlers {
    pub read: Option<ReadHandler>,
    pub write: Option<WriteHandler>,
}

/// The 256-slot dispatch table.
pub struct SoftSwitchBus {
    reads: [Option<ReadHandler>; SOFT_SWITCH_SLOTS],
    writes: [Option<WriteHandler>; SOFT_SWITCH_SLOTS],
}

impl Default for SoftSwitchBus {
    fn default() -> Self {
        SoftSwitchBus {
            reads: std::array::from_fn(|_| None),
            writes: std::array::from_fn(|_| None),
        }
    }
}

impl SoftSwitchBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (replacing) a read handler for one offset.
    pub fn register_read(&mut self, offset: u8, handler: ReadHandler) {
        self.reads[offset as usize] = Some(handler);
    }

    /// Install (replacing) a write handler for one offset.
    pub fn register_write(&mut self, offset: u8, handler: WriteHandler) {
        self.writes[offset as usize] = Some(handler);
    }

    /// Install both directions at once.
    pub fn register(&mut self, offset: u8, read: ReadHandler, write: WriteHandler) {
        self.register_read(offset, read);
        self.register_write(offset, write);
    }

    /// Install a contiguous 16-slot block for expansion slot `slot` (0..=7).
    /// `make` is called once per offset within the block.
    pub fn install_slot_handlers(
        &mut self,
        slot: u8,
        mut make: impl FnMut(u8) -> SlotHandlers,
    ) {
        assert!(slot < 8, "expansion slot out of range: {slot}");
        let base = SLOT_BLOCK_BASE + slot * SLOT_BLOCK_LEN;
        for offset in base..base + SLOT_BLOCK_LEN {
            let handlers = make(offset - base);
            self.reads[offset as usize] = handlers.read;
            self.writes[offset as usize] = handlers.write;
        }
    }

    pub fn remove_slot_handlers(&mut self, slot: u8) {
        assert!(slot < 8, "expansion slot out of range: {slot}");
        let base = SLOT_BLOCK_BASE + slot * SLOT_BLOCK_LEN;
        for offset in base..base + SLOT_BLOCK_LEN {
            self.reads[offset as usize] = None;
            self.writes[offset as usize] = None;
        }
    }

    pub fn has_read_handler(&self, offset: u8) -> bool {
        self.reads[offset as usize].is_some()
    }

    pub fn has_write_handler(&self, offset: u8) -> bool {
        self.writes[offset as usize].is_some()
    }

    pub fn read(&mut self, offset: u8, access: &BusAccess) -> u8 {
        match &mut self.reads[offset as usize] {
            Some(handler) => handler(offset, access),
            None => {
                tracing::debug!(offset = %format_args!("${offset:02X}"), "unhandled soft-switch read");
                0xFF
            }
        }
    }

    pub fn write(&mut self, offset: u8, value: u8, access: &BusAccess) {
        match &mut self.writes[offset as usize] {
            Some(handler) => handler(offset, value, access),
            None => {
                tracing::debug!(
                    offset = %format_args!("${offset:02X}"),
                    value,
                    "unhandled soft-switch write dropped"
                );
            }
        }
    }
}

/// Adapts a [`SoftSwitchBus`] into a bus [`Target`], the only way the I/O
/// page enters the device address space. Refuses wide calls (no
/// [`TargetCaps::WIDE`]): every access arrives byte-decomposed.
pub struct SoftSwitchTarget {
    bus: Rc<RefCell<SoftSwitchBus>>,
}

impl SoftSwitchTarget {
    pub fn new(bus: Rc<RefCell<SoftSwitchBus>>) -> Self {
        SoftSwitchTarget { bus }
    }
}

impl Target for SoftSwitchTarget {
    fn caps(&self) -> TargetCaps {
        TargetCaps::SIDE_EFFECTS | TargetCaps::TIMING_SENSITIVE
    }

    fn read8(&mut self, phys: u32, access: &BusAccess) -> u8 {
        self.bus.borrow_mut().read((phys & 0xFF) as u8, access)
    }

    fn write8(&mut self, phys: u32, value: u8, access: &BusAccess) {
        self.bus.borrow_mut().write((phys & 0xFF) as u8, value, access);
    }
}
