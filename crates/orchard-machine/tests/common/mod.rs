#![allow(dead_code)]

use orchard_machine::{Machine, ProvisionBundle, RomId};
use orchard_machine_constants::MachineModel;

/// Reset vector the test ROM advertises.
pub const ENTRY: u32 = 0xFA62;

/// Marker byte at $D000 so tests can tell ROM from overlay RAM.
pub const ROM_D000_MARKER: u8 = 0xC3;

pub fn boot_rom() -> Vec<u8> {
    let mut rom = vec![0xEA; 0x3000];
    rom[0x0000] = ROM_D000_MARKER;
    rom[0x2FFC] = (ENTRY & 0xFF) as u8;
    rom[0x2FFD] = (ENTRY >> 8) as u8;
    rom
}

pub fn bundle() -> ProvisionBundle {
    ProvisionBundle::with_boot_rom(MachineModel::M65C02, boot_rom())
}

pub fn machine() -> Machine {
    Machine::new(bundle()).expect("default bundle must provision")
}

pub fn slot_firmware(slot: u8) -> Vec<u8> {
    (0..0x100).map(|i| (i as u8) ^ (slot * 0x11)).collect()
}

pub fn machine_with_slot_rom(slot: u8) -> Machine {
    let mut bundle = bundle();
    bundle.rom_images.insert(RomId::Slot(slot), slot_firmware(slot));
    Machine::new(bundle).expect("bundle with slot firmware must provision")
}
