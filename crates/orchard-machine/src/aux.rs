//! Auxiliary-memory select state and the page-0 composite it drives.
//!
//! The low page of the address space splits into zero page, stack, the text
//! page and general RAM, each switchable between main and auxiliary memory by
//! soft switches. The switches flip shared [`AuxState`]; the composite reads
//! that state at resolve time, so no page-table mutation happens on a toggle.

use std::cell::RefCell;
use std::rc::Rc;

use memory::{AccessIntent, BusAccess, RegionTag, Target, TargetCaps, TargetHandle};

/// Soft-switch-controlled memory select lines.
#[derive(Default)]
pub struct AuxState {
    /// `ALTZP`: zero page and stack come from auxiliary memory.
    pub altzp: bool,
    /// `80STORE`: `PAGE2` selects the text page's memory bank.
    pub store80: bool,
    /// `PAGE2`: with `80STORE`, text page accesses go to auxiliary memory.
    pub page2: bool,
    /// `RAMRD`: general reads select auxiliary memory.
    pub aux_read: bool,
    /// `RAMWRT`: general writes select auxiliary memory.
    pub aux_write: bool,
}

impl AuxState {
    pub fn is_aux_zp_enabled(&self) -> bool {
        self.altzp
    }

    pub fn is_aux_text_enabled(&self) -> bool {
        self.store80 && self.page2
    }

    pub fn is_aux_read_enabled(&self) -> bool {
        self.aux_read
    }

    pub fn is_aux_write_enabled(&self) -> bool {
        self.aux_write
    }

    pub fn power_on(&mut self) {
        *self = AuxState::default();
    }
}

const ZP_END: u32 = 0x100;
const STACK_END: u32 = 0x200;
const TEXT_BASE: u32 = 0x400;
const TEXT_END: u32 = 0x800;

/// Composite for page 0: dispatches each byte to main or auxiliary memory
/// according to the current [`AuxState`].
pub struct ZeroPageComposite {
    state: Rc<RefCell<AuxState>>,
    main: TargetHandle,
    aux: TargetHandle,
}

impl ZeroPageComposite {
    /// `main` and `aux` are page-sized views; offsets pass through unchanged.
    pub fn new(state: Rc<RefCell<AuxState>>, main: TargetHandle, aux: TargetHandle) -> Self {
        ZeroPageComposite { state, main, aux }
    }

    fn select(&self, offset: u32) -> TargetHandle {
        let state = self.state.borrow();
        let aux = if offset < STACK_END {
            state.is_aux_zp_enabled()
        } else if (TEXT_BASE..TEXT_END).contains(&offset) {
            state.is_aux_text_enabled()
        } else {
            // General RAM is nominally steered by RAMRD/RAMWRT. The source
            // machine never routes these windows to auxiliary memory; the
            // flags are carried (see `is_aux_read_enabled`/
            // `is_aux_write_enabled`) but this branch stays on main.
            false
        };
        if aux {
            self.aux.clone()
        } else {
            self.main.clone()
        }
    }
}

impl Target for ZeroPageComposite {
    fn caps(&self) -> TargetCaps {
        TargetCaps::PEEK | TargetCaps::POKE
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn resolve(&self, offset: u32, _intent: AccessIntent) -> Option<(TargetHandle, u32)> {
        Some((self.select(offset), offset))
    }

    fn sub_region_tag(&self, offset: u32) -> Option<RegionTag> {
        Some(if offset < ZP_END {
            RegionTag::ZeroPage
        } else if offset < STACK_END {
            RegionTag::Stack
        } else if (TEXT_BASE..TEXT_END).contains(&offset) {
            RegionTag::Video
        } else {
            RegionTag::Ram
        })
    }

    fn read8(&mut self, phys: u32, access: &BusAccess) -> u8 {
        self.select(phys).borrow_mut().read8(phys, access)
    }

    fn write8(&mut self, phys: u32, value: u8, access: &BusAccess) {
        self.select(phys).borrow_mut().write8(phys, value, access);
    }

    fn clear(&mut self) {
        self.main.borrow_mut().clear();
        self.aux.borrow_mut().clear();
    }
}
