//! Mapping stacks and layers: overlay semantics and table coherence.

use memory::{
    BusAccess, LayeredMapping, MappingEntry, MemoryBus, Perms, RamTarget, Region, RegionTag,
    RomTarget, StoragePool, TargetCaps, TargetHandle,
};
use std::rc::Rc;

const ROM_REGION: u32 = 1;
const LC_REGION: u32 = 2;

fn ram_caps() -> TargetCaps {
    TargetCaps::PEEK | TargetCaps::POKE | TargetCaps::WIDE
}

fn ram_handle(pool: &Rc<StoragePool>, base: u32, len: u32) -> TargetHandle {
    memory::share(RamTarget::new(pool.clone(), base, len))
}

/// Bus with a ROM region and a RAM overlay region registered over $D000-$FFFF,
/// stack created, ROM entry pushed active.
fn overlay_bus() -> (MemoryBus, Rc<StoragePool>) {
    let mut bus = MemoryBus::new(16);
    let pool = StoragePool::new(0x3000);
    pool.fill(0xAA);

    let rom_image = vec![0xEA; 0x3000];
    bus.add_region(Region {
        id: ROM_REGION,
        name: "boot-rom".into(),
        preferred_base: 0xD000,
        size: 0x3000,
        target: memory::share(RomTarget::new(&rom_image)),
        default_perms: Perms::RX,
        caps: TargetCaps::PEEK | TargetCaps::WIDE,
        tag: RegionTag::Rom,
        device_id: 3,
        is_relocatable: false,
        supports_overlay: true,
        priority: 0,
    })
    .unwrap();
    bus.add_region(Region {
        id: LC_REGION,
        name: "overlay-ram".into(),
        preferred_base: 0xD000,
        size: 0x3000,
        target: ram_handle(&pool, 0, 0x3000),
        default_perms: Perms::RWX,
        caps: ram_caps(),
        tag: RegionTag::Ram,
        device_id: 4,
        is_relocatable: true,
        supports_overlay: true,
        priority: 1,
    })
    .unwrap();

    bus.create_mapping_stack(0xD000, 0x3000).unwrap();
    bus.push_overlay(
        0xD000,
        MappingEntry {
            region: ROM_REGION,
            is_active: true,
            perm_override: None,
            physical_offset: 0,
            priority: 0,
            tag_override: None,
        },
    )
    .unwrap();

    (bus, pool)
}

#[test]
fn topmost_active_overlay_wins() {
    let (mut bus, _pool) = overlay_bus();
    assert_eq!(bus.read8(&BusAccess::data_read(0xD000)), 0xEA);

    // Push the RAM overlay inactive: ROM still visible.
    bus.push_overlay(
        0xD000,
        MappingEntry {
            region: LC_REGION,
            is_active: false,
            perm_override: None,
            physical_offset: 0,
            priority: 1,
            tag_override: None,
        },
    )
    .unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0xD000)), 0xEA);

    // Activate it: RAM shadows ROM.
    bus.set_overlay_active(0xD000, LC_REGION, true).unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0xD000)), 0xAA);
    assert_eq!(bus.page_entry(0xD000).unwrap().tag, RegionTag::Ram);

    // Deactivate: back to ROM.
    bus.set_overlay_active(0xD000, LC_REGION, false).unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0xD000)), 0xEA);
}

#[test]
fn push_then_pop_is_identity() {
    let (mut bus, _pool) = overlay_bus();
    let before: Vec<_> = bus.page_entries().to_vec();

    bus.push_overlay(
        0xD000,
        MappingEntry {
            region: LC_REGION,
            is_active: true,
            perm_override: Some(Perms::R),
            physical_offset: 0x1000,
            priority: 1,
            tag_override: Some(RegionTag::Shadow),
        },
    )
    .unwrap();
    assert_ne!(bus.page_entries(), &before[..]);

    bus.pop_overlay(0xD000).unwrap();
    assert_eq!(bus.page_entries(), &before[..]);
}

#[test]
fn overlay_perm_and_tag_overrides_materialise() {
    let (mut bus, _pool) = overlay_bus();
    bus.push_overlay(
        0xD000,
        MappingEntry {
            region: LC_REGION,
            is_active: true,
            perm_override: Some(Perms::R),
            physical_offset: 0,
            priority: 1,
            tag_override: Some(RegionTag::Shadow),
        },
    )
    .unwrap();

    let entry = bus.page_entry(0xD000).unwrap();
    assert_eq!(entry.perms, Perms::R);
    assert_eq!(entry.tag, RegionTag::Shadow);

    // The override made the range read-only.
    let fault = bus
        .try_write8(&BusAccess::data_write(0xD000, 1), 1)
        .unwrap_err();
    assert_eq!(fault.kind, memory::FaultKind::Permission);
}

#[test]
fn empty_stack_unmaps_its_range() {
    let (mut bus, _pool) = overlay_bus();
    bus.pop_overlay(0xD000).unwrap();
    assert!(!bus.page_entry(0xD000).unwrap().is_mapped());
    assert!(bus.try_read8(&BusAccess::data_read(0xE123)).is_err());
}

#[test]
fn unrelocatable_region_must_map_at_preferred_base() {
    let (mut bus, _pool) = overlay_bus();
    let err = bus.map_region_at(ROM_REGION, 0xE000).unwrap_err();
    assert!(matches!(err, memory::MapError::NotRelocatable { .. }));
    bus.map_region_at(ROM_REGION, 0xD000).unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0xD000)), 0xEA);
}

#[test]
fn layer_activation_shadows_and_deactivation_restores() {
    let mut bus = MemoryBus::new(16);
    let base_pool = StoragePool::new(0x10000);
    bus.map_region(
        0x0000,
        0x10000,
        1,
        RegionTag::Ram,
        Perms::RWX,
        ram_caps(),
        ram_handle(&base_pool, 0, 0x10000),
        0,
    )
    .unwrap();

    let shadow_pool = StoragePool::new(0x1000);
    shadow_pool.fill(0x42);
    bus.add_layer("video-shadow", 10).unwrap();
    bus.add_layer_mapping(
        "video-shadow",
        LayeredMapping {
            virt_base: 0x2000,
            size: 0x1000,
            device_id: 8,
            tag: RegionTag::Shadow,
            perms: Perms::RW,
            caps: ram_caps(),
            target: ram_handle(&shadow_pool, 0, 0x1000),
            phys_base: 0,
        },
    )
    .unwrap();

    let before: Vec<_> = bus.page_entries().to_vec();
    assert!(!bus.is_layer_active("video-shadow").unwrap());

    bus.activate_layer("video-shadow").unwrap();
    assert!(bus.is_layer_active("video-shadow").unwrap());
    assert_eq!(bus.read8(&BusAccess::data_read(0x2000)), 0x42);
    assert_eq!(bus.page_entry(0x2000).unwrap().device_id, 8);
    // Pages outside the layer are untouched.
    assert_eq!(bus.page_entry(0x1000).unwrap().device_id, 1);

    bus.deactivate_layer("video-shadow").unwrap();
    // Identity: the table is byte-for-byte what it was before activation.
    assert_eq!(bus.page_entries(), &before[..]);
    assert_eq!(bus.read8(&BusAccess::data_read(0x2000)), 0x00);
}

#[test]
fn higher_priority_layer_wins_overlap() {
    let mut bus = MemoryBus::new(16);
    let low_pool = StoragePool::new(0x1000);
    low_pool.fill(0x11);
    let high_pool = StoragePool::new(0x1000);
    high_pool.fill(0x22);

    for (name, priority, pool, dev) in
        [("low", 1, &low_pool, 5), ("high", 7, &high_pool, 6)]
    {
        bus.add_layer(name, priority).unwrap();
        bus.add_layer_mapping(
            name,
            LayeredMapping {
                virt_base: 0x4000,
                size: 0x1000,
                device_id: dev,
                tag: RegionTag::Ram,
                perms: Perms::RW,
                caps: ram_caps(),
                target: ram_handle(pool, 0, 0x1000),
                phys_base: 0,
            },
        )
        .unwrap();
    }

    bus.activate_layer("low").unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0x4000)), 0x11);

    bus.activate_layer("high").unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0x4000)), 0x22);

    // Dropping the high layer falls back to the low one, not to unmapped.
    bus.deactivate_layer("high").unwrap();
    assert_eq!(bus.read8(&BusAccess::data_read(0x4000)), 0x11);
}

#[test]
fn set_layer_permissions_applies_to_live_mappings() {
    let mut bus = MemoryBus::new(16);
    let pool = StoragePool::new(0x1000);
    bus.add_layer("lc", 2).unwrap();
    bus.add_layer_mapping(
        "lc",
        LayeredMapping {
            virt_base: 0xD000,
            size: 0x1000,
            device_id: 4,
            tag: RegionTag::Ram,
            perms: Perms::R,
            caps: ram_caps(),
            target: ram_handle(&pool, 0, 0x1000),
            phys_base: 0,
        },
    )
    .unwrap();
    bus.activate_layer("lc").unwrap();

    assert!(bus.try_write8(&BusAccess::data_write(0xD000, 1), 1).is_err());

    bus.set_layer_permissions("lc", Perms::RW).unwrap();
    assert!(bus.try_write8(&BusAccess::data_write(0xD000, 1), 1).is_ok());
    assert_eq!(bus.page_entry(0xD000).unwrap().perms, Perms::RW);
}

#[test]
fn unknown_names_are_immediate_errors() {
    let mut bus = MemoryBus::new(16);
    assert!(matches!(
        bus.activate_layer("nope").unwrap_err(),
        memory::MapError::UnknownLayer { .. }
    ));
    assert!(matches!(
        bus.push_overlay(
            0x0000,
            MappingEntry {
                region: 99,
                is_active: true,
                perm_override: None,
                physical_offset: 0,
                priority: 0,
                tag_override: None,
            }
        )
        .unwrap_err(),
        memory::MapError::UnknownRegion { id: 99 }
    ));
    bus.add_layer("dup", 0).unwrap();
    assert!(matches!(
        bus.add_layer("dup", 1).unwrap_err(),
        memory::MapError::DuplicateLayer { .. }
    ));
}
