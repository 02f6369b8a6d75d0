//! The machine's soft switches: keyboard latch, speaker, memory selects and
//! the language card.
//!
//! Handlers only flip shared controller state; the machine applies any
//! page-table consequences (language-card overlay/bank) immediately after the
//! access returns, before the next bus operation. Every handler with a side
//! effect early-outs on `NO_SIDE_EFFECTS` so debugger sweeps of the I/O page
//! observe without disturbing.

use std::cell::RefCell;
use std::rc::Rc;

use memory::BusAccess;
use orchard_machine_constants::softswitch as sw;
use orchard_platform::io::SoftSwitchBus;

use crate::aux::AuxState;

/// Keyboard data latch. Bit 7 of `KBD` is the strobe; `KBDSTRB` clears it.
#[derive(Default)]
pub struct KeyboardLatch {
    data: u8,
    strobe: bool,
}

impl KeyboardLatch {
    pub fn inject(&mut self, key: u8) {
        self.data = key & 0x7F;
        self.strobe = true;
    }

    pub fn read(&self) -> u8 {
        self.data | if self.strobe { 0x80 } else { 0x00 }
    }

    pub fn clear_strobe(&mut self) {
        self.strobe = false;
    }

    pub fn strobe(&self) -> bool {
        self.strobe
    }

    pub fn power_on(&mut self) {
        *self = KeyboardLatch::default();
    }
}

/// One-bit speaker. Each access to `SPKR` flips the cone.
#[derive(Default)]
pub struct Speaker {
    toggles: u64,
}

impl Speaker {
    pub fn toggle(&mut self) {
        self.toggles += 1;
    }

    pub fn toggles(&self) -> u64 {
        self.toggles
    }

    pub fn level(&self) -> bool {
        self.toggles % 2 == 1
    }

    pub fn power_on(&mut self) {
        *self = Speaker::default();
    }
}

/// Language-card select state, decoded from `$C080-$C08F`.
///
/// Low two bits of the offset: 0 = read RAM write-protected, 1 = read ROM
/// write RAM, 2 = read ROM write-protected, 3 = read/write RAM. Bit 3 picks
/// bank 1 over bank 2. A page entry has a single target, so "read ROM, write
/// RAM" keeps ROM visible and the RAM write side is dropped; the prewrite
/// double-access latch of the original card is not modelled.
pub struct LanguageCard {
    pub read_ram: bool,
    pub write_ram: bool,
    pub bank1: bool,
    dirty: bool,
}

impl Default for LanguageCard {
    fn default() -> Self {
        // Power-on: ROM visible, RAM write-enabled, bank 2.
        LanguageCard { read_ram: false, write_ram: true, bank1: false, dirty: true }
    }
}

impl LanguageCard {
    pub fn select(&mut self, offset: u8) {
        let low = offset & 0x03;
        self.read_ram = low == 0 || low == 3;
        self.write_ram = low == 1 || low == 3;
        self.bank1 = offset & 0x08 != 0;
        self.dirty = true;
    }

    /// Take the dirty flag; the machine re-syncs the overlay when set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn power_on(&mut self) {
        *self = LanguageCard::default();
    }
}

/// Shared controller state behind the soft-switch handlers.
#[derive(Default)]
pub struct SwitchState {
    pub aux: Rc<RefCell<AuxState>>,
    pub keyboard: Rc<RefCell<KeyboardLatch>>,
    pub speaker: Rc<RefCell<Speaker>>,
    pub lc: Rc<RefCell<LanguageCard>>,
}

impl SwitchState {
    pub fn power_on(&self) {
        self.aux.borrow_mut().power_on();
        self.keyboard.borrow_mut().power_on();
        self.speaker.borrow_mut().power_on();
        self.lc.borrow_mut().power_on();
    }
}

fn status(bit: bool) -> u8 {
    if bit {
        0x80
    } else {
        0x00
    }
}

/// Wire the machine switches into the dispatch table.
pub fn install(table: &mut SoftSwitchBus, state: &SwitchState) {
    // $C000 read: keyboard data. $C000/$C001 write: 80STORE off/on.
    let keyboard = state.keyboard.clone();
    table.register_read(sw::KBD, Box::new(move |_, _| keyboard.borrow().read()));
    for (offset, on) in [(sw::STORE80_OFF, false), (sw::STORE80_ON, true)] {
        let aux = state.aux.clone();
        table.register_write(
            offset,
            Box::new(move |_, _, access: &BusAccess| {
                if !access.is_side_effect_free() {
                    aux.borrow_mut().store80 = on;
                }
            }),
        );
    }

    // Memory select writes: RAMRD, RAMWRT, ALTZP.
    for (offset, set) in [
        (sw::RAMRD_OFF, false),
        (sw::RAMRD_ON, true),
    ] {
        let aux = state.aux.clone();
        table.register_write(
            offset,
            Box::new(move |_, _, access| {
                if !access.is_side_effect_free() {
                    aux.borrow_mut().aux_read = set;
                }
            }),
        );
    }
    for (offset, set) in [
        (sw::RAMWRT_OFF, false),
        (sw::RAMWRT_ON, true),
    ] {
        let aux = state.aux.clone();
        table.register_write(
            offset,
            Box::new(move |_, _, access| {
                if !access.is_side_effect_free() {
                    aux.borrow_mut().aux_write = set;
                }
            }),
        );
    }
    for (offset, set) in [(sw::ALTZP_OFF, false), (sw::ALTZP_ON, true)] {
        let aux = state.aux.clone();
        table.register_write(
            offset,
            Box::new(move |_, _, access| {
                if !access.is_side_effect_free() {
                    aux.borrow_mut().altzp = set;
                }
            }),
        );
    }

    // $C010: keyboard strobe clear on read or write.
    let keyboard = state.keyboard.clone();
    let keyboard_w = state.keyboard.clone();
    table.register(
        sw::KBDSTRB,
        Box::new(move |_, access| {
            let data = keyboard.borrow().read() & 0x7F;
            if !access.is_side_effect_free() {
                keyboard.borrow_mut().clear_strobe();
            }
            data
        }),
        Box::new(move |_, _, access| {
            if !access.is_side_effect_free() {
                keyboard_w.borrow_mut().clear_strobe();
            }
        }),
    );

    // Status reads, bit 7 reports the switch. Pure observations.
    let lc = state.lc.clone();
    table.register_read(sw::RDLCBNK2, Box::new(move |_, _| status(!lc.borrow().bank1)));
    let lc = state.lc.clone();
    table.register_read(sw::RDLCRAM, Box::new(move |_, _| status(lc.borrow().read_ram)));
    let aux = state.aux.clone();
    table.register_read(sw::RDRAMRD, Box::new(move |_, _| status(aux.borrow().aux_read)));
    let aux = state.aux.clone();
    table.register_read(sw::RDRAMWRT, Box::new(move |_, _| status(aux.borrow().aux_write)));
    let aux = state.aux.clone();
    table.register_read(sw::RDALTZP, Box::new(move |_, _| status(aux.borrow().altzp)));
    let aux = state.aux.clone();
    table.register_read(sw::RD80STORE, Box::new(move |_, _| status(aux.borrow().store80)));
    let aux = state.aux.clone();
    table.register_read(sw::RDPAGE2, Box::new(move |_, _| status(aux.borrow().page2)));

    // $C030: speaker toggles on read and on write.
    let speaker = state.speaker.clone();
    let speaker_w = state.speaker.clone();
    table.register(
        sw::SPKR,
        Box::new(move |_, access| {
            if !access.is_side_effect_free() {
                speaker.borrow_mut().toggle();
            }
            0xFF
        }),
        Box::new(move |_, _, access| {
            if !access.is_side_effect_free() {
                speaker_w.borrow_mut().toggle();
            }
        }),
    );

    // $C054/$C055: PAGE2 select, toggled by reads and writes alike.
    for (offset, on) in [(sw::PAGE2_OFF, false), (sw::PAGE2_ON, true)] {
        let aux_r = state.aux.clone();
        let aux_w = state.aux.clone();
        table.register(
            offset,
            Box::new(move |_, access| {
                if !access.is_side_effect_free() {
                    aux_r.borrow_mut().page2 = on;
                }
                0xFF
            }),
            Box::new(move |_, _, access| {
                if !access.is_side_effect_free() {
                    aux_w.borrow_mut().page2 = on;
                }
            }),
        );
    }

    // $C080-$C08F: language card, decoded on read and write.
    for offset in sw::LC_BASE..=sw::LC_BASE + 0x0F {
        let lc_r = state.lc.clone();
        let lc_w = state.lc.clone();
        table.register(
            offset,
            Box::new(move |off, access| {
                if !access.is_side_effect_free() {
                    lc_r.borrow_mut().select(off - sw::LC_BASE);
                }
                0xFF
            }),
            Box::new(move |off, _, access| {
                if !access.is_side_effect_free() {
                    lc_w.borrow_mut().select(off - sw::LC_BASE);
                }
            }),
        );
    }
}
