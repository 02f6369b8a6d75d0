//! Page-routed memory bus.
//!
//! An address-indexed page table dispatches every read and write to a typed
//! target in O(1). The hot path is the `read*`/`write*`/`try_*` family; the
//! control plane (`map_*`, regions, layers, swap groups) mutates the table and
//! is never on the hot path.
//!
//! The bus is not thread-safe: control-plane operations must not race the hot
//! path. The whole substrate runs single-threaded cooperative.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use thiserror::Error;

use crate::access::{AccessIntent, AccessMode, Addr, BusAccess};
use crate::fault::{BusFault, BusResult, BusResultUnit, Completion, FaultKind};
use crate::layer::LayerRecord;
use crate::region::{MappingStack, Region, RegionId, RegionTag};
use crate::swap::SwapGroup;
use crate::target::{Target, TargetCaps, TargetError, TargetHandle};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Sentinel device id for unmapped pages.
pub const UNMAPPED_DEVICE: i32 = -1;

bitflags! {
    /// Page permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perms: u8 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
        const RW = Self::R.bits() | Self::W.bits();
        const RX = Self::R.bits() | Self::X.bits();
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

/// One page table slot.
#[derive(Clone)]
pub struct PageEntry {
    pub device_id: i32,
    pub tag: RegionTag,
    pub perms: Perms,
    /// Target capabilities latched at map time.
    pub caps: TargetCaps,
    /// `None` means unmapped: every access faults `Unmapped`.
    pub target: Option<TargetHandle>,
    /// Offset of this page within the target's private address space.
    pub phys_base: u32,
}

impl PageEntry {
    pub fn unmapped() -> Self {
        PageEntry {
            device_id: UNMAPPED_DEVICE,
            tag: RegionTag::Unmapped,
            perms: Perms::empty(),
            caps: TargetCaps::empty(),
            target: None,
            phys_base: 0,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.target.is_some()
    }
}

impl PartialEq for PageEntry {
    /// Structural equality; targets compare by identity (`Rc::ptr_eq`).
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
            && self.tag == other.tag
            && self.perms == other.perms
            && self.caps == other.caps
            && self.phys_base == other.phys_base
            && match (&self.target, &other.target) {
                (None, None) => true,
                (Some(a), Some(b)) => std::rc::Rc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl std::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageEntry")
            .field("device_id", &self.device_id)
            .field("tag", &self.tag)
            .field("perms", &self.perms)
            .field("caps", &self.caps)
            .field("mapped", &self.target.is_some())
            .field("phys_base", &self.phys_base)
            .finish()
    }
}

/// Control-plane errors. These are programmer/bring-up errors, surfaced
/// immediately at the call site; the machine aborts bring-up on any of them.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("page index {index} out of range (table has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
    #[error("range ${base:08X}+${size:X} is not page aligned")]
    Unaligned { base: u32, size: u32 },
    #[error("range ${base:08X}+${size:X} exceeds the {bits}-bit address space")]
    OutOfAddressSpace { base: u32, size: u32, bits: u32 },
    #[error("duplicate region id {id}")]
    DuplicateRegion { id: RegionId },
    #[error("unknown region id {id}")]
    UnknownRegion { id: RegionId },
    #[error("region `{name}` is not relocatable (preferred ${preferred:06X}, requested ${requested:06X})")]
    NotRelocatable { name: String, preferred: u32, requested: u32 },
    #[error("no mapping stack at ${base:06X}")]
    UnknownStack { base: u32 },
    #[error("duplicate layer `{name}`")]
    DuplicateLayer { name: String },
    #[error("unknown layer `{name}`")]
    UnknownLayer { name: String },
    #[error("duplicate swap group `{name}`")]
    DuplicateSwapGroup { name: String },
    #[error("unknown swap group `{name}`")]
    UnknownSwapGroup { name: String },
    #[error("unknown variant `{variant}` in swap group `{group}`")]
    UnknownSwapVariant { group: String, variant: String },
}

enum WideRoute {
    Wide,
    Decompose,
}

/// The bus: page table plus its control plane.
pub struct MemoryBus {
    address_bits: u32,
    /// Live routing table, O(1) per access.
    pub(crate) pages: Vec<PageEntry>,
    /// Base image built by direct `map_*` calls, stacks, and swap groups;
    /// layers shadow it in `pages` without destroying it.
    pub(crate) base_pages: Vec<PageEntry>,
    pub(crate) regions: BTreeMap<RegionId, Region>,
    pub(crate) stacks: BTreeMap<u32, MappingStack>,
    pub(crate) layers: Vec<LayerRecord>,
    pub(crate) swap_groups: Vec<SwapGroup>,
}

impl MemoryBus {
    /// `address_bits` selects the 16-, 24- or 32-bit address space.
    pub fn new(address_bits: u32) -> Self {
        assert!(
            matches!(address_bits, 16 | 24 | 32),
            "unsupported address space: {address_bits} bits"
        );
        let count = 1usize << (address_bits - PAGE_SHIFT);
        MemoryBus {
            address_bits,
            pages: vec![PageEntry::unmapped(); count],
            base_pages: vec![PageEntry::unmapped(); count],
            regions: BTreeMap::new(),
            stacks: BTreeMap::new(),
            layers: Vec::new(),
            swap_groups: Vec::new(),
        }
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_entry(&self, addr: Addr) -> Option<&PageEntry> {
        self.pages.get((addr >> PAGE_SHIFT) as usize)
    }

    pub fn page_entry_by_index(&self, index: usize) -> Option<&PageEntry> {
        self.pages.get(index)
    }

    /// Live table view, for inspection and coherence tests.
    pub fn page_entries(&self) -> &[PageEntry] {
        &self.pages
    }

    // ------------------------------------------------------------------
    // Fallible path
    // ------------------------------------------------------------------

    pub fn try_read8(&self, access: &BusAccess) -> BusResult<u8> {
        let (entry, target, phys) = self.validate(access, false)?;
        match Self::resolve_composite(target, phys, access.intent) {
            Resolved::Leaf => {
                let value = target
                    .borrow_mut()
                    .try_read8(phys, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value, cycles: 1 })
            }
            Resolved::Child(child, sub) => {
                let value = child
                    .borrow_mut()
                    .try_read8(sub, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value, cycles: 1 })
            }
            // Floating bus inside a composite.
            Resolved::Floating => Ok(Completion { value: 0xFF, cycles: 1 }),
        }
    }

    pub fn try_write8(&self, access: &BusAccess, value: u8) -> BusResultUnit {
        let (entry, target, phys) = self.validate(access, true)?;
        match Self::resolve_composite(target, phys, access.intent) {
            Resolved::Leaf => target
                .borrow_mut()
                .try_write8(phys, value, access)
                .map_err(|e| self.target_fault(e, access, entry))?,
            Resolved::Child(child, sub) => child
                .borrow_mut()
                .try_write8(sub, value, access)
                .map_err(|e| self.target_fault(e, access, entry))?,
            Resolved::Floating => {}
        }
        Ok(Completion { value: (), cycles: 1 })
    }

    pub fn try_read16(&self, access: &BusAccess) -> BusResult<u16> {
        match self.wide_route(access, 2) {
            WideRoute::Wide => {
                let (entry, target, phys) = self.validate(access, false)?;
                let value = target
                    .borrow_mut()
                    .try_read16(phys, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value, cycles: 1 })
            }
            WideRoute::Decompose => {
                let v = self.read_decomposed(access, 2)?;
                Ok(Completion { value: v.value as u16, cycles: v.cycles })
            }
        }
    }

    pub fn try_write16(&self, access: &BusAccess, value: u16) -> BusResultUnit {
        match self.wide_route(access, 2) {
            WideRoute::Wide => {
                let (entry, target, phys) = self.validate(access, true)?;
                target
                    .borrow_mut()
                    .try_write16(phys, value, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value: (), cycles: 1 })
            }
            WideRoute::Decompose => self.write_decomposed(access, value as u32, 2),
        }
    }

    pub fn try_read32(&self, access: &BusAccess) -> BusResult<u32> {
        match self.wide_route(access, 4) {
            WideRoute::Wide => {
                let (entry, target, phys) = self.validate(access, false)?;
                let value = target
                    .borrow_mut()
                    .try_read32(phys, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value, cycles: 1 })
            }
            WideRoute::Decompose => self.read_decomposed(access, 4),
        }
    }

    pub fn try_write32(&self, access: &BusAccess, value: u32) -> BusResultUnit {
        match self.wide_route(access, 4) {
            WideRoute::Wide => {
                let (entry, target, phys) = self.validate(access, true)?;
                target
                    .borrow_mut()
                    .try_write32(phys, value, access)
                    .map_err(|e| self.target_fault(e, access, entry))?;
                Ok(Completion { value: (), cycles: 1 })
            }
            WideRoute::Decompose => self.write_decomposed(access, value, 4),
        }
    }

    // ------------------------------------------------------------------
    // Infallible fast path
    // ------------------------------------------------------------------
    //
    // The caller guarantees the page is mapped and permitted (e.g. it holds a
    // fresh `page_entry` probe). Broken guarantees degrade to floating-bus
    // behaviour rather than faulting: reads deliver 0xFF, writes are dropped.

    pub fn read8(&self, access: &BusAccess) -> u8 {
        let Some(entry) = self.pages.get((access.addr >> PAGE_SHIFT) as usize) else {
            return 0xFF;
        };
        let Some(target) = entry.target.as_ref() else {
            return 0xFF;
        };
        let phys = entry.phys_base + (access.addr & PAGE_MASK);
        match Self::resolve_composite(target, phys, access.intent) {
            Resolved::Leaf => target.borrow_mut().read8(phys, access),
            Resolved::Child(child, sub) => child.borrow_mut().read8(sub, access),
            Resolved::Floating => 0xFF,
        }
    }

    pub fn write8(&self, access: &BusAccess, value: u8) {
        let Some(entry) = self.pages.get((access.addr >> PAGE_SHIFT) as usize) else {
            return;
        };
        let Some(target) = entry.target.as_ref() else {
            return;
        };
        let phys = entry.phys_base + (access.addr & PAGE_MASK);
        match Self::resolve_composite(target, phys, access.intent) {
            Resolved::Leaf => target.borrow_mut().write8(phys, value, access),
            Resolved::Child(child, sub) => child.borrow_mut().write8(sub, value, access),
            Resolved::Floating => {}
        }
    }

    pub fn read16(&self, access: &BusAccess) -> u16 {
        match self.wide_route(access, 2) {
            WideRoute::Wide => self.with_leaf(access, |t, phys| t.read16(phys, access)).unwrap_or(0xFFFF),
            WideRoute::Decompose => {
                let lo = self.read8(&access.byte_lane(0)) as u16;
                let hi = self.read8(&access.byte_lane(1)) as u16;
                lo | (hi << 8)
            }
        }
    }

    pub fn write16(&self, access: &BusAccess, value: u16) {
        match self.wide_route(access, 2) {
            WideRoute::Wide => {
                let _ = self.with_leaf(access, |t, phys| t.write16(phys, value, access));
            }
            WideRoute::Decompose => {
                self.write8(&access.byte_lane(0), value as u8);
                self.write8(&access.byte_lane(1), (value >> 8) as u8);
            }
        }
    }

    pub fn read32(&self, access: &BusAccess) -> u32 {
        match self.wide_route(access, 4) {
            WideRoute::Wide => self
                .with_leaf(access, |t, phys| t.read32(phys, access))
                .unwrap_or(0xFFFF_FFFF),
            WideRoute::Decompose => {
                let mut value = 0u32;
                for i in 0..4 {
                    value |= (self.read8(&access.byte_lane(i)) as u32) << (8 * i);
                }
                value
            }
        }
    }

    pub fn write32(&self, access: &BusAccess, value: u32) {
        match self.wide_route(access, 4) {
            WideRoute::Wide => {
                let _ = self.with_leaf(access, |t, phys| t.write32(phys, value, access));
            }
            WideRoute::Decompose => {
                for i in 0..4 {
                    self.write8(&access.byte_lane(i), (value >> (8 * i)) as u8);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------

    pub fn map_page(&mut self, index: usize, entry: PageEntry) -> Result<(), MapError> {
        if index >= self.base_pages.len() {
            return Err(MapError::PageOutOfRange { index, count: self.base_pages.len() });
        }
        self.base_pages[index] = entry;
        self.recompute_page(index);
        Ok(())
    }

    /// Map the single page containing `addr`.
    pub fn map_page_at(&mut self, addr: Addr, entry: PageEntry) -> Result<(), MapError> {
        self.map_page((addr >> PAGE_SHIFT) as usize, entry)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn map_page_range(
        &mut self,
        start_page: usize,
        count: usize,
        device_id: i32,
        tag: RegionTag,
        perms: Perms,
        caps: TargetCaps,
        target: TargetHandle,
        phys_base: u32,
    ) -> Result<(), MapError> {
        let end = start_page
            .checked_add(count)
            .filter(|&e| e <= self.base_pages.len())
            .ok_or(MapError::PageOutOfRange {
                index: start_page.saturating_add(count.saturating_sub(1)),
                count: self.base_pages.len(),
            })?;
        for (i, page) in (start_page..end).enumerate() {
            self.base_pages[page] = PageEntry {
                device_id,
                tag,
                perms,
                caps,
                target: Some(target.clone()),
                phys_base: phys_base + (i as u32) * PAGE_SIZE,
            };
            self.recompute_page(page);
        }
        tracing::debug!(start_page, count, device_id, ?tag, "pages mapped");
        Ok(())
    }

    /// Map `size` bytes of `target` at virtual `base`. Rejects unaligned
    /// bases and sizes.
    #[allow(clippy::too_many_arguments)]
    pub fn map_region(
        &mut self,
        base: Addr,
        size: u32,
        device_id: i32,
        tag: RegionTag,
        perms: Perms,
        caps: TargetCaps,
        target: TargetHandle,
        phys_base: u32,
    ) -> Result<(), MapError> {
        if base & PAGE_MASK != 0 || size & PAGE_MASK != 0 || size == 0 {
            return Err(MapError::Unaligned { base, size });
        }
        self.check_span(base, size)?;
        self.map_page_range(
            (base >> PAGE_SHIFT) as usize,
            (size >> PAGE_SHIFT) as usize,
            device_id,
            tag,
            perms,
            caps,
            target,
            phys_base,
        )
    }

    /// Swap the target behind a page, preserving device/tag/perms/caps.
    pub fn remap_page(
        &mut self,
        index: usize,
        target: TargetHandle,
        phys_base: u32,
    ) -> Result<(), MapError> {
        if index >= self.base_pages.len() {
            return Err(MapError::PageOutOfRange { index, count: self.base_pages.len() });
        }
        let entry = &mut self.base_pages[index];
        entry.target = Some(target);
        entry.phys_base = phys_base;
        self.recompute_page(index);
        Ok(())
    }

    pub fn remap_page_range(
        &mut self,
        start_page: usize,
        count: usize,
        target: TargetHandle,
        phys_base: u32,
    ) -> Result<(), MapError> {
        let end = start_page
            .checked_add(count)
            .filter(|&e| e <= self.base_pages.len())
            .ok_or(MapError::PageOutOfRange {
                index: start_page.saturating_add(count.saturating_sub(1)),
                count: self.base_pages.len(),
            })?;
        for (i, page) in (start_page..end).enumerate() {
            let entry = &mut self.base_pages[page];
            entry.target = Some(target.clone());
            entry.phys_base = phys_base + (i as u32) * PAGE_SIZE;
            self.recompute_page(page);
        }
        Ok(())
    }

    /// Clear each unique mapped target exactly once (identity-keyed across
    /// the live table, the base image, regions, layers and swap variants).
    /// Mappings survive; only mutable target contents are wiped.
    pub fn clear(&mut self) {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<TargetHandle> = Vec::new();
        let mut note = |target: &TargetHandle, seen: &mut BTreeSet<usize>, pending: &mut Vec<TargetHandle>| {
            let key = std::rc::Rc::as_ptr(target) as *const () as usize;
            if seen.insert(key) {
                pending.push(target.clone());
            }
        };
        for entry in self.pages.iter().chain(self.base_pages.iter()) {
            if let Some(t) = &entry.target {
                note(t, &mut seen, &mut pending);
            }
        }
        for region in self.regions.values() {
            note(&region.target, &mut seen, &mut pending);
        }
        for record in &self.layers {
            for m in &record.mappings {
                note(&m.target, &mut seen, &mut pending);
            }
        }
        for group in &self.swap_groups {
            for v in group.variants() {
                note(&v.target, &mut seen, &mut pending);
            }
        }
        for target in pending {
            target.borrow_mut().clear();
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn check_span(&self, base: u32, size: u32) -> Result<(), MapError> {
        let limit = 1u64 << self.address_bits;
        if (base as u64) + (size as u64) > limit {
            return Err(MapError::OutOfAddressSpace { base, size, bits: self.address_bits });
        }
        Ok(())
    }

    /// Rebuild the live entry for page `i` from the highest-priority active
    /// layer covering it, falling back to the base image.
    pub(crate) fn recompute_page(&mut self, i: usize) {
        let page_addr = (i as u32) << PAGE_SHIFT;
        self.pages[i] = self
            .layer_contribution(page_addr)
            .unwrap_or_else(|| self.base_pages[i].clone());
    }

    fn validate<'a>(
        &'a self,
        access: &BusAccess,
        write: bool,
    ) -> Result<(&'a PageEntry, &'a TargetHandle, u32), BusFault> {
        let index = (access.addr >> PAGE_SHIFT) as usize;
        let Some(entry) = self.pages.get(index) else {
            return Err(self.faulted(BusFault::unmapped(access)));
        };
        let Some(target) = entry.target.as_ref() else {
            return Err(self.faulted(BusFault::from_access(
                FaultKind::Unmapped,
                access,
                entry.device_id,
                entry.tag,
            )));
        };
        let perm = if write { Perms::W } else { Perms::R };
        if !entry.perms.contains(perm) {
            return Err(self.faulted(BusFault::from_access(
                FaultKind::Permission,
                access,
                entry.device_id,
                entry.tag,
            )));
        }
        // NX applies to Native-mode fetches only; Compat ignores it entirely.
        if !write
            && access.intent == AccessIntent::InstructionFetch
            && access.mode == AccessMode::Native
            && !entry.perms.contains(Perms::X)
        {
            return Err(self.faulted(BusFault::from_access(
                FaultKind::Nx,
                access,
                entry.device_id,
                entry.tag,
            )));
        }
        Ok((entry, target, entry.phys_base + (access.addr & PAGE_MASK)))
    }

    fn faulted(&self, fault: BusFault) -> BusFault {
        tracing::trace!(%fault, "bus fault");
        fault
    }

    fn target_fault(&self, err: TargetError, access: &BusAccess, entry: &PageEntry) -> BusFault {
        let kind = match err {
            TargetError::Device => FaultKind::DeviceFault,
            TargetError::Misaligned => FaultKind::Misaligned,
        };
        self.faulted(BusFault::from_access(kind, access, entry.device_id, entry.tag))
    }

    fn resolve_composite(target: &TargetHandle, phys: u32, intent: AccessIntent) -> Resolved {
        let t = target.borrow();
        if !t.is_composite() {
            return Resolved::Leaf;
        }
        match t.resolve(phys, intent) {
            Some((child, sub)) => Resolved::Child(child, sub),
            None => Resolved::Floating,
        }
    }

    fn with_leaf<R>(
        &self,
        access: &BusAccess,
        op: impl FnOnce(&mut dyn Target, u32) -> R,
    ) -> Option<R> {
        let entry = self.pages.get((access.addr >> PAGE_SHIFT) as usize)?;
        let target = entry.target.as_ref()?;
        let phys = entry.phys_base + (access.addr & PAGE_MASK);
        Some(op(&mut *target.borrow_mut(), phys))
    }

    /// Width policy, identical for 16- and 32-bit transfers.
    fn wide_route(&self, access: &BusAccess, bytes: u32) -> WideRoute {
        // Crossing a page boundary always decomposes: the two halves may
        // route to different targets.
        let in_page = access.addr & PAGE_MASK;
        if in_page + bytes - 1 > PAGE_MASK {
            return WideRoute::Decompose;
        }
        if access.wants_decompose() {
            return WideRoute::Decompose;
        }
        let wide_cap = self
            .pages
            .get((access.addr >> PAGE_SHIFT) as usize)
            .map(|e| e.caps.contains(TargetCaps::WIDE))
            .unwrap_or(false);
        if access.flags.contains(crate::access::AccessFlags::ATOMIC) && wide_cap {
            return WideRoute::Wide;
        }
        // Compat mode exposes byte-visible cycles to peripherals.
        if access.mode == AccessMode::Compat {
            return WideRoute::Decompose;
        }
        if wide_cap {
            WideRoute::Wide
        } else {
            WideRoute::Decompose
        }
    }

    /// Sequential little-endian byte reads, low to high. The first fault
    /// short-circuits with the cycles of the completed bytes on it.
    fn read_decomposed(&self, access: &BusAccess, bytes: u32) -> BusResult<u32> {
        let mut value = 0u32;
        let mut cycles = 0u64;
        for i in 0..bytes {
            if access.addr.checked_add(i).is_none() {
                let mut fault = BusFault::unmapped(access);
                fault.cycles_consumed = cycles;
                return Err(fault);
            }
            match self.try_read8(&access.byte_lane(i)) {
                Ok(c) => {
                    cycles += c.cycles;
                    value |= (c.value as u32) << (8 * i);
                }
                Err(mut fault) => {
                    fault.cycles_consumed += cycles;
                    return Err(fault);
                }
            }
        }
        Ok(Completion { value, cycles })
    }

    fn write_decomposed(&self, access: &BusAccess, value: u32, bytes: u32) -> BusResultUnit {
        let mut cycles = 0u64;
        for i in 0..bytes {
            if access.addr.checked_add(i).is_none() {
                let mut fault = BusFault::unmapped(access);
                fault.cycles_consumed = cycles;
                return Err(fault);
            }
            match self.try_write8(&access.byte_lane(i), (value >> (8 * i)) as u8) {
                Ok(c) => cycles += c.cycles,
                Err(mut fault) => {
                    fault.cycles_consumed += cycles;
                    return Err(fault);
                }
            }
        }
        Ok(Completion { value: (), cycles })
    }
}

enum Resolved {
    Leaf,
    Child(TargetHandle, u32),
    Floating,
}
