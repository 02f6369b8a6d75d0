//! The target contract: anything that can satisfy byte reads and writes at a
//! physical base offset.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::access::{AccessIntent, BusAccess};
use crate::region::RegionTag;

bitflags! {
    /// Capabilities a target advertises. Latched into the page entry at map
    /// time so the hot path never asks the target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TargetCaps: u8 {
        /// Side-effect-free observation is possible.
        const PEEK = 1 << 0;
        /// Side-effect-free mutation is possible.
        const POKE = 1 << 1;
        /// The target accepts single 16/32-bit calls.
        const WIDE = 1 << 2;
        /// Reads or writes may change device state.
        const SIDE_EFFECTS = 1 << 3;
        /// Access timing is observable by the emulated machine.
        const TIMING_SENSITIVE = 1 << 4;
    }
}

/// Implementation-defined target failure, surfaced by the fallible bus path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// Maps to [`crate::FaultKind::DeviceFault`].
    Device,
    /// Maps to [`crate::FaultKind::Misaligned`]: the target supports wide
    /// calls but not at this boundary.
    Misaligned,
}

/// Non-owning, shareable handle to a target. The page table holds these; the
/// region store (or the machine) keeps the owning side alive.
pub type TargetHandle = Rc<RefCell<dyn Target>>;

/// Leaf (or composite) storage behind one or more pages.
///
/// `phys` is always an offset into the target's private address space; the
/// bus translates `page.phys_base + (addr & PAGE_MASK)` before calling in.
pub trait Target {
    fn caps(&self) -> TargetCaps;

    fn read8(&mut self, phys: u32, access: &BusAccess) -> u8;

    fn write8(&mut self, phys: u32, value: u8, access: &BusAccess);

    /// Wide reads default to little-endian byte decomposition; targets with
    /// [`TargetCaps::WIDE`] override with a single native operation.
    fn read16(&mut self, phys: u32, access: &BusAccess) -> u16 {
        let lo = self.read8(phys, access) as u16;
        let hi = self.read8(phys + 1, access) as u16;
        lo | (hi << 8)
    }

    fn write16(&mut self, phys: u32, value: u16, access: &BusAccess) {
        self.write8(phys, value as u8, access);
        self.write8(phys + 1, (value >> 8) as u8, access);
    }

    fn read32(&mut self, phys: u32, access: &BusAccess) -> u32 {
        let lo = self.read16(phys, access) as u32;
        let hi = self.read16(phys + 2, access) as u32;
        lo | (hi << 16)
    }

    fn write32(&mut self, phys: u32, value: u32, access: &BusAccess) {
        self.write16(phys, value as u16, access);
        self.write16(phys + 2, (value >> 16) as u16, access);
    }

    /// Fallible variants used by the `try_*` bus path. The defaults never
    /// fail; device targets override to report [`TargetError`].
    fn try_read8(&mut self, phys: u32, access: &BusAccess) -> Result<u8, TargetError> {
        Ok(self.read8(phys, access))
    }

    fn try_write8(&mut self, phys: u32, value: u8, access: &BusAccess) -> Result<(), TargetError> {
        self.write8(phys, value, access);
        Ok(())
    }

    fn try_read16(&mut self, phys: u32, access: &BusAccess) -> Result<u16, TargetError> {
        Ok(self.read16(phys, access))
    }

    fn try_write16(&mut self, phys: u32, value: u16, access: &BusAccess) -> Result<(), TargetError> {
        self.write16(phys, value, access);
        Ok(())
    }

    fn try_read32(&mut self, phys: u32, access: &BusAccess) -> Result<u32, TargetError> {
        Ok(self.read32(phys, access))
    }

    fn try_write32(&mut self, phys: u32, value: u32, access: &BusAccess) -> Result<(), TargetError> {
        self.write32(phys, value, access);
        Ok(())
    }

    /// Wipe mutable contents. Called at most once per unique target by
    /// [`crate::MemoryBus::clear`].
    fn clear(&mut self) {}

    /// Composites resolve a sub-target for `(offset, intent)`. `None` from a
    /// composite means floating bus at that offset.
    fn resolve(&self, _offset: u32, _intent: AccessIntent) -> Option<(TargetHandle, u32)> {
        None
    }

    /// Semantic tag of the sub-range covering `offset` (composites only).
    fn sub_region_tag(&self, _offset: u32) -> Option<RegionTag> {
        None
    }

    fn is_composite(&self) -> bool {
        false
    }
}

/// Convenience for wrapping a concrete target into a [`TargetHandle`].
pub fn share<T: Target + 'static>(target: T) -> TargetHandle {
    Rc::new(RefCell::new(target))
}
