//! Swap groups: named alternative variants for a page range.
//!
//! The classic use is a bank-switched window (ROM / RAM bank A / RAM bank B
//! over the same addresses). Exactly one variant is active; selection remaps
//! the whole range atomically, preserving device/tag/perms/caps the way
//! `remap_page_range` does.

use crate::bus::{MapError, MemoryBus, PAGE_MASK, PAGE_SHIFT};
use crate::target::TargetHandle;

pub struct SwapVariant {
    pub name: String,
    pub target: TargetHandle,
    pub phys_base: u32,
}

pub struct SwapGroup {
    pub id: u32,
    pub name: String,
    pub base: u32,
    pub size: u32,
    pub(crate) variants: Vec<SwapVariant>,
    pub(crate) active: usize,
}

impl SwapGroup {
    pub fn variants(&self) -> &[SwapVariant] {
        &self.variants
    }
}

impl MemoryBus {
    /// Create a swap group over `base..base+size`. The range's initial page
    /// mapping (device, tag, perms, caps) must already be in place; variants
    /// only swap the target and physical base. The first variant added is
    /// considered active and is expected to match that initial mapping.
    pub fn add_swap_group(&mut self, name: &str, base: u32, size: u32) -> Result<u32, MapError> {
        if self.swap_groups.iter().any(|g| g.name == name) {
            return Err(MapError::DuplicateSwapGroup { name: name.into() });
        }
        if base & PAGE_MASK != 0 || size & PAGE_MASK != 0 || size == 0 {
            return Err(MapError::Unaligned { base, size });
        }
        self.check_span(base, size)?;
        let id = self.swap_groups.len() as u32;
        self.swap_groups.push(SwapGroup {
            id,
            name: name.into(),
            base,
            size,
            variants: Vec::new(),
            active: 0,
        });
        Ok(id)
    }

    pub fn add_swap_variant(&mut self, group: &str, variant: SwapVariant) -> Result<(), MapError> {
        let idx = self.swap_index(group)?;
        self.swap_groups[idx].variants.push(variant);
        Ok(())
    }

    /// Atomically remap the group's range to `variant`. No partial view is
    /// observable: the substrate is single-threaded and nothing runs between
    /// the page rewrites.
    pub fn select_swap_variant(&mut self, group: &str, variant: &str) -> Result<(), MapError> {
        let idx = self.swap_index(group)?;
        let vidx = self.swap_groups[idx]
            .variants
            .iter()
            .position(|v| v.name == variant)
            .ok_or_else(|| MapError::UnknownSwapVariant {
                group: group.into(),
                variant: variant.into(),
            })?;
        let (base, size) = (self.swap_groups[idx].base, self.swap_groups[idx].size);
        let (target, phys_base) = {
            let v = &self.swap_groups[idx].variants[vidx];
            (v.target.clone(), v.phys_base)
        };
        self.remap_page_range(
            (base >> PAGE_SHIFT) as usize,
            (size >> PAGE_SHIFT) as usize,
            target,
            phys_base,
        )?;
        self.swap_groups[idx].active = vidx;
        tracing::debug!(group, variant, "swap variant selected");
        Ok(())
    }

    pub fn active_swap_variant(&self, group: &str) -> Result<&str, MapError> {
        let g = &self.swap_groups[self.swap_index(group)?];
        g.variants
            .get(g.active)
            .map(|v| v.name.as_str())
            .ok_or_else(|| MapError::UnknownSwapVariant {
                group: group.into(),
                variant: "<none>".into(),
            })
    }

    pub fn get_swap_group_id(&self, name: &str) -> Option<u32> {
        self.swap_groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    fn swap_index(&self, name: &str) -> Result<usize, MapError> {
        self.swap_groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| MapError::UnknownSwapGroup { name: name.into() })
    }
}
