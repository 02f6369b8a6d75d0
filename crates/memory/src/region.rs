//! Regions and per-range mapping stacks.
//!
//! A region is a named, sized, semantically classified block of memory with a
//! preferred base and a target. Regions are created once at bring-up; their
//! targets may outlive them. Mapping stacks layer region mappings over a
//! contiguous virtual range with classic ROM/RAM overlay semantics: the
//! topmost active entry is the one the page table materialises.

use crate::bus::{MapError, MemoryBus, PageEntry, Perms, PAGE_MASK, PAGE_SHIFT};
use crate::target::{TargetCaps, TargetHandle};

/// Semantic classification of a page or region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionTag {
    Ram,
    Rom,
    Io,
    Slot,
    Shadow,
    #[default]
    Unmapped,
    Video,
    ZeroPage,
    Stack,
    Unknown,
}

pub type RegionId = u32;

/// Named, sized block of semantic memory.
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub preferred_base: u32,
    pub size: u32,
    pub target: TargetHandle,
    pub default_perms: Perms,
    pub caps: TargetCaps,
    pub tag: RegionTag,
    /// Structural id of the owning device, stamped into page entries.
    pub device_id: i32,
    pub is_relocatable: bool,
    pub supports_overlay: bool,
    pub priority: i32,
}

/// One entry in a mapping stack.
pub struct MappingEntry {
    pub region: RegionId,
    pub is_active: bool,
    pub perm_override: Option<Perms>,
    /// Offset into the region's target where this mapping starts.
    pub physical_offset: u32,
    pub priority: i32,
    pub tag_override: Option<RegionTag>,
}

/// LIFO of mapping entries for one contiguous virtual range. The topmost
/// entry whose `is_active` is set wins.
pub struct MappingStack {
    pub base: u32,
    pub size: u32,
    pub(crate) entries: Vec<MappingEntry>,
}

impl MappingStack {
    /// Topmost active entry, if any.
    pub fn active(&self) -> Option<&MappingEntry> {
        self.entries.iter().rev().find(|e| e.is_active)
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }
}

impl MemoryBus {
    /// Register a region. Duplicate ids are a bring-up bug and rejected.
    pub fn add_region(&mut self, region: Region) -> Result<(), MapError> {
        if self.regions.contains_key(&region.id) {
            return Err(MapError::DuplicateRegion { id: region.id });
        }
        tracing::debug!(id = region.id, name = %region.name, size = region.size, "region added");
        self.regions.insert(region.id, region);
        Ok(())
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Map a registered region's pages at `base` with its default attributes.
    /// Unrelocatable regions must land on their preferred base.
    pub fn map_region_at(&mut self, id: RegionId, base: u32) -> Result<(), MapError> {
        let region = self.regions.get(&id).ok_or(MapError::UnknownRegion { id })?;
        if !region.is_relocatable && base != region.preferred_base {
            return Err(MapError::NotRelocatable {
                name: region.name.clone(),
                preferred: region.preferred_base,
                requested: base,
            });
        }
        let (device_id, tag, perms, caps, target, size) = (
            region.device_id,
            region.tag,
            region.default_perms,
            region.caps,
            region.target.clone(),
            region.size,
        );
        self.map_region(base, size, device_id, tag, perms, caps, target, 0)
    }

    /// Create an empty mapping stack covering `base..base+size`.
    pub fn create_mapping_stack(&mut self, base: u32, size: u32) -> Result<(), MapError> {
        if base & PAGE_MASK != 0 || size & PAGE_MASK != 0 || size == 0 {
            return Err(MapError::Unaligned { base, size });
        }
        self.check_span(base, size)?;
        self.stacks.insert(base, MappingStack { base, size, entries: Vec::new() });
        Ok(())
    }

    /// Push an overlay entry onto the stack at `base` and rematerialise.
    pub fn push_overlay(&mut self, base: u32, entry: MappingEntry) -> Result<(), MapError> {
        if !self.regions.contains_key(&entry.region) {
            return Err(MapError::UnknownRegion { id: entry.region });
        }
        let stack = self.stacks.get_mut(&base).ok_or(MapError::UnknownStack { base })?;
        stack.entries.push(entry);
        self.materialize_stack(base)
    }

    /// Pop the top overlay entry (active or not) and rematerialise.
    pub fn pop_overlay(&mut self, base: u32) -> Result<Option<MappingEntry>, MapError> {
        let stack = self.stacks.get_mut(&base).ok_or(MapError::UnknownStack { base })?;
        let popped = stack.entries.pop();
        self.materialize_stack(base)?;
        Ok(popped)
    }

    /// Toggle the topmost entry for `region` on the stack at `base`.
    pub fn set_overlay_active(
        &mut self,
        base: u32,
        region: RegionId,
        active: bool,
    ) -> Result<(), MapError> {
        let stack = self.stacks.get_mut(&base).ok_or(MapError::UnknownStack { base })?;
        let entry = stack
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.region == region)
            .ok_or(MapError::UnknownRegion { id: region })?;
        entry.is_active = active;
        self.materialize_stack(base)
    }

    pub fn mapping_stack(&self, base: u32) -> Option<&MappingStack> {
        self.stacks.get(&base)
    }

    /// Rewrite the base image for the stack's range from its topmost active
    /// entry (or unmap the range if none), then recompute layer shadowing.
    fn materialize_stack(&mut self, base: u32) -> Result<(), MapError> {
        let stack = self.stacks.get(&base).ok_or(MapError::UnknownStack { base })?;
        let (range_base, size) = (stack.base, stack.size);
        let first_page = (range_base >> PAGE_SHIFT) as usize;
        let page_count = (size >> PAGE_SHIFT) as usize;
        let active = stack
            .active()
            .map(|e| (e.region, e.perm_override, e.tag_override, e.physical_offset));

        match active {
            Some((region_id, perm_override, tag_override, phys)) => {
                let region = self
                    .regions
                    .get(&region_id)
                    .ok_or(MapError::UnknownRegion { id: region_id })?;
                let perms = perm_override.unwrap_or(region.default_perms);
                let tag = tag_override.unwrap_or(region.tag);
                let (device_id, caps, target) =
                    (region.device_id, region.caps, region.target.clone());
                for i in 0..page_count {
                    self.base_pages[first_page + i] = PageEntry {
                        device_id,
                        tag,
                        perms,
                        caps,
                        target: Some(target.clone()),
                        phys_base: phys + (i as u32) * crate::bus::PAGE_SIZE,
                    };
                }
            }
            None => {
                for i in 0..page_count {
                    self.base_pages[first_page + i] = PageEntry::unmapped();
                }
            }
        }

        for i in 0..page_count {
            self.recompute_page(first_page + i);
        }
        tracing::debug!(base = %format_args!("${range_base:06X}"), "mapping stack rematerialised");
        Ok(())
    }
}
