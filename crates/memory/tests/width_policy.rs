//! Width policy: when a 16/32-bit access issues one wide call and when it
//! decomposes into byte cycles.

use memory::{
    AccessFlags, AccessMode, BusAccess, FaultKind, MemoryBus, Perms, RegionTag, Target,
    TargetCaps, TargetError, Width,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct Counts {
    r8: usize,
    w8: usize,
    r16: usize,
    w16: usize,
    r32: usize,
    w32: usize,
}

/// RAM-like target that counts every entry point and can refuse unaligned
/// wide operations the way a picky device would.
struct SpyTarget {
    mem: Vec<u8>,
    counts: Rc<RefCell<Counts>>,
    wide: bool,
    refuse_unaligned_wide: bool,
}

impl SpyTarget {
    fn new(len: usize, counts: Rc<RefCell<Counts>>) -> Self {
        SpyTarget { mem: vec![0; len], counts, wide: true, refuse_unaligned_wide: false }
    }
}

impl Target for SpyTarget {
    fn caps(&self) -> TargetCaps {
        let mut caps = TargetCaps::PEEK | TargetCaps::POKE;
        if self.wide {
            caps |= TargetCaps::WIDE;
        }
        caps
    }

    fn read8(&mut self, phys: u32, _access: &BusAccess) -> u8 {
        self.counts.borrow_mut().r8 += 1;
        self.mem[phys as usize]
    }

    fn write8(&mut self, phys: u32, value: u8, _access: &BusAccess) {
        self.counts.borrow_mut().w8 += 1;
        self.mem[phys as usize] = value;
    }

    fn read16(&mut self, phys: u32, _access: &BusAccess) -> u16 {
        self.counts.borrow_mut().r16 += 1;
        u16::from_le_bytes([self.mem[phys as usize], self.mem[phys as usize + 1]])
    }

    fn write16(&mut self, phys: u32, value: u16, _access: &BusAccess) {
        self.counts.borrow_mut().w16 += 1;
        self.mem[phys as usize..phys as usize + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read32(&mut self, phys: u32, _access: &BusAccess) -> u32 {
        self.counts.borrow_mut().r32 += 1;
        let i = phys as usize;
        u32::from_le_bytes([self.mem[i], self.mem[i + 1], self.mem[i + 2], self.mem[i + 3]])
    }

    fn write32(&mut self, phys: u32, value: u32, _access: &BusAccess) {
        self.counts.borrow_mut().w32 += 1;
        self.mem[phys as usize..phys as usize + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn try_write16(&mut self, phys: u32, value: u16, access: &BusAccess) -> Result<(), TargetError> {
        if self.refuse_unaligned_wide && phys % 2 != 0 {
            return Err(TargetError::Misaligned);
        }
        self.write16(phys, value, access);
        Ok(())
    }
}

fn spy_bus(len: u32, spy: SpyTarget) -> MemoryBus {
    let mut bus = MemoryBus::new(16);
    let caps = spy.caps();
    bus.map_region(
        0x0000,
        len,
        1,
        RegionTag::Ram,
        Perms::RWX,
        caps,
        memory::share(spy),
        0,
    )
    .unwrap();
    bus
}

#[test]
fn cross_page_wide_write_decomposes_regardless_of_atomic() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x2000, SpyTarget::new(0x2000, counts.clone()));

    let access = BusAccess::data_write(0x0FFF, 0x1234)
        .with_width(Width::W16)
        .with_flags(AccessFlags::ATOMIC)
        .with_mode(AccessMode::Native);
    bus.write16(&access, 0x1234);

    assert_eq!(counts.borrow().w16, 0);
    assert_eq!(counts.borrow().w8, 2);
    assert_eq!(bus.read8(&BusAccess::data_read(0x0FFF)), 0x34);
    assert_eq!(bus.read8(&BusAccess::data_read(0x1000)), 0x12);
}

#[test]
fn aligned_atomic_native_issues_one_wide_call() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts.clone()));

    let access = BusAccess::data_write(0x0100, 0xBEEF)
        .with_width(Width::W16)
        .with_flags(AccessFlags::ATOMIC)
        .with_mode(AccessMode::Native);
    bus.write16(&access, 0xBEEF);

    assert_eq!(counts.borrow().w16, 1);
    assert_eq!(counts.borrow().w8, 0);
}

#[test]
fn decompose_flag_wins_over_atomic() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts.clone()));

    let access = BusAccess::data_read(0x0100)
        .with_width(Width::W32)
        .with_flags(AccessFlags::ATOMIC | AccessFlags::DECOMPOSE)
        .with_mode(AccessMode::Native);
    bus.read32(&access);

    assert_eq!(counts.borrow().r32, 0);
    assert_eq!(counts.borrow().r8, 4);
}

#[test]
fn compat_mode_always_byte_decomposes() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts.clone()));

    // No ATOMIC flag: Compat exposes byte-visible cycles to peripherals.
    let access = BusAccess::data_read(0x0200)
        .with_width(Width::W16)
        .with_mode(AccessMode::Compat);
    bus.read16(&access);

    assert_eq!(counts.borrow().r16, 0);
    assert_eq!(counts.borrow().r8, 2);
}

#[test]
fn compat_atomic_with_wide_target_still_goes_wide() {
    // ATOMIC is an explicit request and ranks above the Compat default.
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts.clone()));

    let access = BusAccess::data_read(0x0200)
        .with_width(Width::W16)
        .with_flags(AccessFlags::ATOMIC)
        .with_mode(AccessMode::Compat);
    bus.read16(&access);

    assert_eq!(counts.borrow().r16, 1);
    assert_eq!(counts.borrow().r8, 0);
}

#[test]
fn native_wide_target_defaults_to_wide_call() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts.clone()));

    let access = BusAccess::data_read(0x0300)
        .with_width(Width::W32)
        .with_mode(AccessMode::Native);
    bus.read32(&access);

    assert_eq!(counts.borrow().r32, 1);
    assert_eq!(counts.borrow().r8, 0);
}

#[test]
fn non_wide_target_decomposes_even_when_atomic_requested() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let mut spy = SpyTarget::new(0x1000, counts.clone());
    spy.wide = false;
    let bus = spy_bus(0x1000, spy);

    let access = BusAccess::data_write(0x0100, 0xCAFE)
        .with_width(Width::W16)
        .with_flags(AccessFlags::ATOMIC)
        .with_mode(AccessMode::Native);
    bus.write16(&access, 0xCAFE);

    assert_eq!(counts.borrow().w16, 0);
    assert_eq!(counts.borrow().w8, 2);
}

#[test]
fn target_refusing_unaligned_wide_faults_misaligned() {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let mut spy = SpyTarget::new(0x1000, counts);
    spy.refuse_unaligned_wide = true;
    let bus = spy_bus(0x1000, spy);

    let access = BusAccess::data_write(0x0101, 0x1234)
        .with_width(Width::W16)
        .with_flags(AccessFlags::ATOMIC)
        .with_mode(AccessMode::Native);
    let fault = bus.try_write16(&access, 0x1234).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Misaligned);
}

#[test]
fn decomposed_fault_accumulates_completed_cycles() {
    // Map one spy page; the word at $0FFF crosses into unmapped space.
    let counts = Rc::new(RefCell::new(Counts::default()));
    let bus = spy_bus(0x1000, SpyTarget::new(0x1000, counts));

    let access = BusAccess::data_write(0x0FFF, 0xBEEF).with_width(Width::W16);
    let fault = bus.try_write16(&access, 0xBEEF).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Unmapped);
    assert_eq!(fault.cycles_consumed, 1);
    // The completed low byte is not rolled back.
    assert_eq!(bus.read8(&BusAccess::data_read(0x0FFF)), 0xEF);
}
