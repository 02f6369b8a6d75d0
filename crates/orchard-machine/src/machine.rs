//! Machine assembly: wires the bus, scheduler, signal fabric, registry and
//! soft switches into one runnable substrate.

use std::cell::RefCell;
use std::rc::Rc;

use memory::{
    BusAccess, BusResultUnit, MappingEntry, MemoryBus, PageEntry, Perms, RamTarget, Region,
    RegionId, RegionTag, RomTarget, StoragePool, SwapVariant, TargetCaps, Window,
    WindowComposite,
};
use orchard_interrupts::{SignalBus, SignalLine};
use orchard_machine_constants::{MachineConstants, RESET_VECTOR};
use orchard_platform::io::{SoftSwitchBus, SoftSwitchTarget};
use orchard_platform::registry::{DeviceKind, DeviceRegistry};
use orchard_platform::reset::ResetKind;
use orchard_sched::Scheduler;

use crate::aux::ZeroPageComposite;
use crate::bringup::{validate, BringUpError, ProvisionBundle, RomId, SLOT_ROM_SIZE};
use crate::softswitch::{self, SwitchState};

const MAIN_RAM_REGION: RegionId = 1;
const AUX_RAM_REGION: RegionId = 2;
const BOOT_ROM_REGION: RegionId = 3;
const LC_RAM_REGION: RegionId = 4;
const HIGH_RAM_REGION: RegionId = 5;

/// Language-card RAM pool layout: bank 1, then bank 2, then the 8 KiB common
/// area shared by both banks.
const LC_BANK1_BASE: u32 = 0x0000;
const LC_BANK2_BASE: u32 = 0x1000;
const LC_POOL_SIZE: u32 = 0x4000;

/// Swap group over the language card's banked page.
const LC_BANK_GROUP: &str = "lc-d000";

/// Low-64K RAM stops at the I/O page on every model.
const LOW_RAM_LIMIT: u32 = 0xC000;
/// Models with more memory continue above bank 0.
const HIGH_RAM_BASE: u32 = 0x1_0000;

fn ram_caps() -> TargetCaps {
    TargetCaps::PEEK | TargetCaps::POKE | TargetCaps::WIDE
}

#[derive(Debug)]
struct DeviceIds {
    cpu: i32,
    main_ram: i32,
    aux_ram: i32,
    boot_rom: i32,
    io_page: i32,
    lc_ram: i32,
}

/// The assembled machine substrate. CPU and DMA clients drive it through the
/// `bus`, `scheduler` and `signals` fields plus the access helpers below.
pub struct Machine {
    pub constants: MachineConstants,
    pub bus: MemoryBus,
    pub scheduler: Scheduler,
    pub signals: SignalBus,
    pub registry: DeviceRegistry,
    switches: SwitchState,
    ids: DeviceIds,
    boot_rom_base: u32,
    entry_point: u32,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("constants", &self.constants)
            .field("ids", &self.ids)
            .field("boot_rom_base", &self.boot_rom_base)
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub fn new(bundle: ProvisionBundle) -> Result<Machine, BringUpError> {
        let layout = validate(&bundle)?;
        let constants = layout.constants;

        let mut registry = DeviceRegistry::new();
        let ids = DeviceIds {
            cpu: registry.register(DeviceKind::Cpu, "cpu0", "/machine/cpu0"),
            main_ram: registry.register(DeviceKind::Ram, "main-ram", "/machine/ram/main"),
            aux_ram: registry.register(DeviceKind::Ram, "aux-ram", "/machine/ram/aux"),
            boot_rom: registry.register(DeviceKind::Rom, "boot-rom", "/machine/rom/boot"),
            io_page: registry.register(DeviceKind::Io, "io-page", "/machine/io"),
            lc_ram: registry.register(DeviceKind::Ram, "lc-ram", "/machine/ram/language-card"),
        };
        for spec in &bundle.devices {
            registry.register(spec.kind, &spec.name, &spec.wiring_path);
        }

        let mut bus = MemoryBus::new(constants.address_bits);

        // Storage pools live for the whole machine; targets are views.
        let main_pool = StoragePool::new(layout.ram_size as usize);
        let aux_pool = StoragePool::new(memory::PAGE_SIZE as usize);
        let lc_pool = StoragePool::new(LC_POOL_SIZE as usize);

        let low_size = layout.ram_size.min(LOW_RAM_LIMIT);
        bus.add_region(Region {
            id: MAIN_RAM_REGION,
            name: "main-ram".into(),
            preferred_base: 0x0000,
            size: low_size,
            target: memory::share(RamTarget::new(main_pool.clone(), 0, low_size)),
            default_perms: Perms::RWX,
            caps: ram_caps(),
            tag: RegionTag::Ram,
            device_id: ids.main_ram,
            is_relocatable: false,
            supports_overlay: false,
            priority: 0,
        })?;
        bus.map_region_at(MAIN_RAM_REGION, 0x0000)?;

        let high_size = layout.ram_size - low_size;
        if high_size > 0 {
            bus.add_region(Region {
                id: HIGH_RAM_REGION,
                name: "high-ram".into(),
                preferred_base: HIGH_RAM_BASE,
                size: high_size,
                target: memory::share(RamTarget::new(main_pool.clone(), low_size, high_size)),
                default_perms: Perms::RWX,
                caps: ram_caps(),
                tag: RegionTag::Ram,
                device_id: ids.main_ram,
                is_relocatable: true,
                supports_overlay: false,
                priority: 0,
            })?;
            bus.map_region_at(HIGH_RAM_REGION, HIGH_RAM_BASE)?;
        }

        // Page 0 is a composite: zero page / stack / text page switch between
        // main and auxiliary memory, everything else stays on main.
        bus.add_region(Region {
            id: AUX_RAM_REGION,
            name: "aux-ram".into(),
            preferred_base: 0x0000,
            size: memory::PAGE_SIZE,
            target: memory::share(RamTarget::new(aux_pool.clone(), 0, memory::PAGE_SIZE)),
            default_perms: Perms::RWX,
            caps: ram_caps(),
            tag: RegionTag::Ram,
            device_id: ids.aux_ram,
            is_relocatable: true,
            supports_overlay: false,
            priority: 0,
        })?;
        let switches = SwitchState::default();
        let page0 = ZeroPageComposite::new(
            switches.aux.clone(),
            memory::share(RamTarget::new(main_pool.clone(), 0, memory::PAGE_SIZE)),
            memory::share(RamTarget::new(aux_pool.clone(), 0, memory::PAGE_SIZE)),
        );
        bus.map_page_at(
            0x0000,
            PageEntry {
                device_id: ids.main_ram,
                tag: RegionTag::ZeroPage,
                perms: Perms::RWX,
                caps: TargetCaps::PEEK | TargetCaps::POKE,
                target: Some(memory::share(page0)),
                phys_base: 0,
            },
        )?;

        // I/O page: soft switches in the low 256 bytes, slot firmware above,
        // nothing else. The only way this page enters the address space.
        let softswitch_bus = Rc::new(RefCell::new(SoftSwitchBus::new()));
        softswitch::install(&mut softswitch_bus.borrow_mut(), &switches);
        let mut io_composite = WindowComposite::new();
        io_composite.push_window(Window {
            start: 0x000,
            len: 0x100,
            child: Some(memory::share(SoftSwitchTarget::new(softswitch_bus.clone()))),
            child_base: 0,
            tag: RegionTag::Io,
        });
        for slot in 1u8..=7 {
            let child = bundle
                .rom_images
                .get(&RomId::Slot(slot))
                .map(|image| memory::share(RomTarget::new(image)));
            io_composite.push_window(Window {
                start: SLOT_ROM_SIZE * slot as u32,
                len: SLOT_ROM_SIZE,
                child,
                child_base: 0,
                tag: RegionTag::Slot,
            });
        }
        // $C800-$CFFF expansion ROM window floats until a card claims it.
        io_composite.push_window(Window {
            start: 0x800,
            len: 0x800,
            child: None,
            child_base: 0,
            tag: RegionTag::Slot,
        });
        bus.map_page_at(
            constants.io_page_base,
            PageEntry {
                device_id: ids.io_page,
                tag: RegionTag::Io,
                perms: Perms::RW,
                caps: TargetCaps::SIDE_EFFECTS | TargetCaps::TIMING_SENSITIVE,
                target: Some(memory::share(io_composite)),
                phys_base: 0,
            },
        )?;

        // Boot ROM behind a mapping stack so the language card can overlay it.
        let boot_image = &bundle.rom_images[&RomId::Boot];
        let rom_target = if layout.enable_debug {
            memory::share(RomTarget::with_writable_backing(boot_image))
        } else {
            memory::share(RomTarget::new(boot_image))
        };
        bus.add_region(Region {
            id: BOOT_ROM_REGION,
            name: "boot-rom".into(),
            preferred_base: layout.boot_rom_base,
            size: constants.boot_rom_size,
            target: rom_target.clone(),
            default_perms: Perms::RX,
            caps: TargetCaps::PEEK | TargetCaps::WIDE,
            tag: RegionTag::Rom,
            device_id: ids.boot_rom,
            is_relocatable: false,
            supports_overlay: true,
            priority: 0,
        })?;
        let lc_target = memory::share(RamTarget::new(lc_pool.clone(), 0, LC_POOL_SIZE));
        bus.add_region(Region {
            id: LC_RAM_REGION,
            name: "lc-ram".into(),
            preferred_base: layout.boot_rom_base,
            size: constants.boot_rom_size,
            target: lc_target.clone(),
            default_perms: Perms::RWX,
            caps: ram_caps(),
            tag: RegionTag::Ram,
            device_id: ids.lc_ram,
            is_relocatable: true,
            supports_overlay: true,
            priority: 1,
        })?;

        bus.create_mapping_stack(layout.boot_rom_base, constants.boot_rom_size)?;
        bus.push_overlay(
            layout.boot_rom_base,
            MappingEntry {
                region: BOOT_ROM_REGION,
                is_active: true,
                perm_override: None,
                physical_offset: 0,
                priority: 0,
                tag_override: None,
            },
        )?;
        // The language-card entry stays on top of the stack; the machine
        // pops and re-pushes it whenever the card state changes.
        bus.push_overlay(
            layout.boot_rom_base,
            MappingEntry {
                region: LC_RAM_REGION,
                is_active: false,
                perm_override: Some(Perms::RX),
                physical_offset: LC_BANK2_BASE,
                priority: 1,
                tag_override: None,
            },
        )?;

        // Bank variants for the first ROM page.
        bus.add_swap_group(LC_BANK_GROUP, layout.boot_rom_base, memory::PAGE_SIZE)?;
        bus.add_swap_variant(
            LC_BANK_GROUP,
            SwapVariant { name: "rom".into(), target: rom_target, phys_base: 0 },
        )?;
        bus.add_swap_variant(
            LC_BANK_GROUP,
            SwapVariant { name: "bank2".into(), target: lc_target.clone(), phys_base: LC_BANK2_BASE },
        )?;
        bus.add_swap_variant(
            LC_BANK_GROUP,
            SwapVariant { name: "bank1".into(), target: lc_target, phys_base: LC_BANK1_BASE },
        )?;

        let mut machine = Machine {
            constants,
            bus,
            scheduler: Scheduler::new(),
            signals: SignalBus::new(),
            registry,
            switches,
            ids,
            boot_rom_base: layout.boot_rom_base,
            entry_point: 0,
        };
        machine.apply_switch_effects();
        machine.entry_point = machine.read_reset_vector();
        tracing::info!(
            entry_point = %format_args!("${:04X}", machine.entry_point),
            "machine assembled"
        );
        Ok(machine)
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn cpu_id(&self) -> i32 {
        self.ids.cpu
    }

    pub fn switches(&self) -> &SwitchState {
        &self.switches
    }

    /// CPU-visible read: data intent, current cycle, machine soft-switch
    /// consequences applied before the next access.
    pub fn read8(&mut self, addr: u32) -> u8 {
        let access = self.cpu_access(addr).with_cycle(self.scheduler.now());
        let value = self.bus.read8(&access);
        self.apply_switch_effects();
        value
    }

    /// CPU-visible write through the fallible path; permission faults leave
    /// memory untouched and are dropped here (the CPU client raises them).
    pub fn write8(&mut self, addr: u32, value: u8) {
        let _ = self.try_write8(addr, value);
    }

    pub fn try_write8(&mut self, addr: u32, value: u8) -> BusResultUnit {
        let access = BusAccess::data_write(addr, value as u32)
            .with_source(self.ids.cpu)
            .with_cycle(self.scheduler.now());
        let result = self.bus.try_write8(&access, value);
        self.apply_switch_effects();
        result
    }

    /// Debugger peek: no side effects anywhere, no switch application.
    pub fn debug_peek(&self, addr: u32) -> u8 {
        self.bus.read8(&BusAccess::debug_read(addr).with_source(self.ids.cpu))
    }

    pub fn inject_key(&mut self, key: u8) {
        self.switches.keyboard.borrow_mut().inject(key);
    }

    pub fn speaker_toggles(&self) -> u64 {
        self.switches.speaker.borrow().toggles()
    }

    /// Advance machine time, dispatching due events.
    pub fn tick(&mut self, cycles: u64) {
        self.scheduler.advance(cycles, &mut self.signals, &mut self.bus);
        self.apply_switch_effects();
    }

    pub fn reset(&mut self, kind: ResetKind) {
        match kind {
            ResetKind::Cold => {
                self.scheduler.reset();
                self.signals.reset();
                // Wipe mutable storage; ROM images and mappings survive.
                self.bus.clear();
                self.switches.power_on();
            }
            ResetKind::Warm => {
                let now = self.scheduler.now();
                self.signals.assert(SignalLine::Reset, self.ids.cpu, now);
                self.signals.deassert(SignalLine::Reset, self.ids.cpu, now);
                // The reset line returns the language card to ROM.
                self.switches.lc.borrow_mut().power_on();
            }
        }
        self.apply_switch_effects();
        self.entry_point = self.read_reset_vector();
        tracing::info!(?kind, "machine reset");
    }

    /// Sync the language-card overlay and bank with the controller state.
    /// Called after every access helper, so a soft-switch write is visible to
    /// the very next bus operation.
    fn apply_switch_effects(&mut self) {
        let (read_ram, write_ram, bank1, dirty) = {
            let mut lc = self.switches.lc.borrow_mut();
            (lc.read_ram, lc.write_ram, lc.bank1, lc.take_dirty())
        };
        if !dirty {
            return;
        }
        self.bus
            .pop_overlay(self.boot_rom_base)
            .expect("language-card overlay stack missing");
        self.bus
            .push_overlay(
                self.boot_rom_base,
                MappingEntry {
                    region: LC_RAM_REGION,
                    is_active: read_ram,
                    perm_override: Some(if write_ram { Perms::RWX } else { Perms::RX }),
                    physical_offset: LC_BANK2_BASE,
                    priority: 1,
                    tag_override: None,
                },
            )
            .expect("language-card overlay re-push failed");
        let variant = match (read_ram, bank1) {
            (false, _) => "rom",
            (true, false) => "bank2",
            (true, true) => "bank1",
        };
        self.bus
            .select_swap_variant(LC_BANK_GROUP, variant)
            .expect("language-card bank group missing");
    }

    fn cpu_access(&self, addr: u32) -> BusAccess {
        BusAccess::data_read(addr).with_source(self.ids.cpu)
    }

    fn read_reset_vector(&self) -> u32 {
        let lo = self.debug_peek(RESET_VECTOR) as u32;
        let hi = self.debug_peek(RESET_VECTOR + 1) as u32;
        lo | (hi << 8)
    }
}
