//! Offset-dispatched composite targets.
//!
//! A composite splits one page (or a few) into fixed sub-windows, each backed
//! by its own child target. Controllers mutate the child slots instead of
//! shredding the page table on every soft-switch toggle; the bus resolves the
//! child per byte access.

use crate::access::{AccessIntent, BusAccess};
use crate::region::RegionTag;
use crate::target::{Target, TargetCaps, TargetHandle};

/// One sub-window of a composite. A window with no child is floating bus:
/// reads deliver `0xFF`, writes are dropped, both succeed.
pub struct Window {
    pub start: u32,
    pub len: u32,
    pub child: Option<TargetHandle>,
    /// Offset added to `(offset - start)` when dispatching into the child.
    pub child_base: u32,
    pub tag: RegionTag,
}

impl Window {
    fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset - self.start < self.len
    }
}

/// Composite with a fixed window table. Children may be swapped at run time
/// through [`WindowComposite::set_child`].
#[derive(Default)]
pub struct WindowComposite {
    windows: Vec<Window>,
}

impl WindowComposite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Windows are matched in insertion order; the first hit wins.
    pub fn push_window(&mut self, window: Window) -> usize {
        self.windows.push(window);
        self.windows.len() - 1
    }

    pub fn set_child(&mut self, index: usize, child: Option<TargetHandle>) {
        self.windows[index].child = child;
    }

    fn window_at(&self, offset: u32) -> Option<&Window> {
        self.windows.iter().find(|w| w.contains(offset))
    }
}

impl Target for WindowComposite {
    fn caps(&self) -> TargetCaps {
        // No WIDE: wide accesses through a composite always decompose so each
        // byte can land in a different sub-window.
        TargetCaps::PEEK | TargetCaps::POKE
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn resolve(&self, offset: u32, _intent: AccessIntent) -> Option<(TargetHandle, u32)> {
        let window = self.window_at(offset)?;
        let child = window.child.as_ref()?;
        Some((child.clone(), window.child_base + (offset - window.start)))
    }

    fn sub_region_tag(&self, offset: u32) -> Option<RegionTag> {
        self.window_at(offset).map(|w| w.tag)
    }

    // Direct byte entry points so a composite also works outside the bus
    // (e.g. a debugger walking a target graph).
    fn read8(&mut self, phys: u32, access: &BusAccess) -> u8 {
        match self.resolve(phys, access.intent) {
            Some((child, sub)) => child.borrow_mut().read8(sub, access),
            None => 0xFF,
        }
    }

    fn write8(&mut self, phys: u32, value: u8, access: &BusAccess) {
        if let Some((child, sub)) = self.resolve(phys, access.intent) {
            child.borrow_mut().write8(sub, value, access);
        }
    }

    fn clear(&mut self) {
        for window in &self.windows {
            if let Some(child) = &window.child {
                child.borrow_mut().clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::{RamTarget, StoragePool};
    use crate::target::share;

    #[test]
    fn resolve_translates_into_child_space() {
        let pool = StoragePool::new(0x200);
        let child = share(RamTarget::new(pool.clone(), 0, 0x200));

        let mut composite = WindowComposite::new();
        composite.push_window(Window {
            start: 0x100,
            len: 0x100,
            child: Some(child),
            child_base: 0x80,
            tag: RegionTag::Stack,
        });

        let (_, sub) = composite.resolve(0x110, AccessIntent::DataRead).unwrap();
        assert_eq!(sub, 0x90);
        assert_eq!(composite.sub_region_tag(0x1FF), Some(RegionTag::Stack));
        assert_eq!(composite.sub_region_tag(0x00), None);
    }

    #[test]
    fn empty_window_floats() {
        let mut composite = WindowComposite::new();
        composite.push_window(Window {
            start: 0,
            len: 0x100,
            child: None,
            child_base: 0,
            tag: RegionTag::Io,
        });

        let access = BusAccess::data_read(0x20);
        assert_eq!(composite.read8(0x20, &access), 0xFF);
        composite.write8(0x20, 0x55, &BusAccess::data_write(0x20, 0x55));
        assert_eq!(composite.read8(0x20, &access), 0xFF);
    }
}
