//! Bring-up: validate a provisioning bundle against the machine constants and
//! produce the storage pools, regions and registry the machine is built from.
//!
//! Every error here is fatal; the machine aborts construction on the first
//! one. Nothing is retried.

use std::collections::BTreeMap;

use orchard_machine_constants::{MachineConstants, MachineModel, PAGE_SIZE};
use orchard_platform::registry::DeviceKind;
use thiserror::Error;

/// Identifies a ROM image in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RomId {
    Boot,
    /// 256-byte firmware for expansion slot 1..=7.
    Slot(u8),
}

/// Declarative device to register during bring-up.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub name: String,
    pub wiring_path: String,
}

/// Optional deviations from the model's canonical layout.
#[derive(Debug, Clone, Default)]
pub struct LayoutOverrides {
    pub boot_rom_base: Option<u32>,
}

/// Everything needed to provision a machine.
pub struct ProvisionBundle {
    pub model: MachineModel,
    /// Zero selects the model default.
    pub requested_ram_size: u32,
    pub rom_images: BTreeMap<RomId, Vec<u8>>,
    pub devices: Vec<DeviceSpec>,
    pub layout_overrides: Option<LayoutOverrides>,
    pub enable_debug: bool,
}

impl ProvisionBundle {
    /// Minimal bootable bundle: model defaults, the given boot ROM, no
    /// extra devices.
    pub fn with_boot_rom(model: MachineModel, boot_rom: Vec<u8>) -> Self {
        let mut rom_images = BTreeMap::new();
        rom_images.insert(RomId::Boot, boot_rom);
        ProvisionBundle {
            model,
            requested_ram_size: 0,
            rom_images,
            devices: Vec::new(),
            layout_overrides: None,
            enable_debug: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("requested RAM size {requested:#X} outside {min:#X}..={max:#X}")]
    RamSizeOutOfRange { requested: u32, min: u32, max: u32 },
    #[error("requested RAM size {requested:#X} is not page aligned")]
    RamSizeUnaligned { requested: u32 },
    #[error("bundle has no boot ROM image")]
    MissingBootRom,
    #[error("boot ROM is {actual:#X} bytes, machine expects {expected:#X}")]
    BootRomSizeMismatch { expected: u32, actual: u32 },
    #[error("boot ROM base {base:#X} is not page aligned")]
    BootRomBaseUnaligned { base: u32 },
    #[error("slot {slot} firmware is {actual:#X} bytes, expected {expected:#X}")]
    SlotRomSizeMismatch { slot: u8, expected: u32, actual: u32 },
    #[error("slot {slot} is not a valid expansion slot (1..=7)")]
    InvalidSlot { slot: u8 },
    #[error(transparent)]
    Map(#[from] memory::MapError),
    #[error(transparent)]
    Registry(#[from] orchard_platform::registry::RegistryError),
}

/// Validated layout derived from a bundle, ready to build a machine from.
pub struct ValidatedLayout {
    pub constants: MachineConstants,
    pub ram_size: u32,
    pub boot_rom_base: u32,
    pub enable_debug: bool,
}

/// Slot firmware images are one page's low quarter: 256 bytes.
pub const SLOT_ROM_SIZE: u32 = 0x100;

pub fn validate(bundle: &ProvisionBundle) -> Result<ValidatedLayout, BringUpError> {
    let constants = MachineConstants::for_model(bundle.model);

    let ram_size = if bundle.requested_ram_size == 0 {
        constants.default_ram_size
    } else {
        bundle.requested_ram_size
    };
    if ram_size < constants.min_ram_size || ram_size > constants.max_ram_size {
        return Err(BringUpError::RamSizeOutOfRange {
            requested: ram_size,
            min: constants.min_ram_size,
            max: constants.max_ram_size,
        });
    }
    if ram_size % PAGE_SIZE != 0 {
        return Err(BringUpError::RamSizeUnaligned { requested: ram_size });
    }

    let boot_rom = bundle
        .rom_images
        .get(&RomId::Boot)
        .ok_or(BringUpError::MissingBootRom)?;
    if boot_rom.len() as u32 != constants.boot_rom_size {
        return Err(BringUpError::BootRomSizeMismatch {
            expected: constants.boot_rom_size,
            actual: boot_rom.len() as u32,
        });
    }

    let boot_rom_base = bundle
        .layout_overrides
        .as_ref()
        .and_then(|o| o.boot_rom_base)
        .unwrap_or(constants.boot_rom_base);
    if boot_rom_base % PAGE_SIZE != 0 {
        return Err(BringUpError::BootRomBaseUnaligned { base: boot_rom_base });
    }

    for (id, image) in &bundle.rom_images {
        if let RomId::Slot(slot) = *id {
            if !(1..=7).contains(&slot) {
                return Err(BringUpError::InvalidSlot { slot });
            }
            if image.len() as u32 != SLOT_ROM_SIZE {
                return Err(BringUpError::SlotRomSizeMismatch {
                    slot,
                    expected: SLOT_ROM_SIZE,
                    actual: image.len() as u32,
                });
            }
        }
    }

    tracing::info!(
        model = ?bundle.model,
        ram_size = %format_args!("{ram_size:#X}"),
        boot_rom_base = %format_args!("{boot_rom_base:#X}"),
        "bundle validated"
    );
    Ok(ValidatedLayout { constants, ram_size, boot_rom_base, enable_debug: bundle.enable_debug })
}
