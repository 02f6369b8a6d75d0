//! ROM: read-only targets over their own backing image.

use std::cell::RefCell;

use crate::access::{AccessIntent, BusAccess};
use crate::target::{Target, TargetCaps};

/// Read-only view over an owned image.
///
/// Normal writes are silently ignored (real mask ROM behaviour). A target
/// constructed with [`RomTarget::with_writable_backing`] lets `DebugWrite`
/// accesses patch the backing bytes, which is how ROM patching tools work.
pub struct RomTarget {
    bytes: RefCell<Box<[u8]>>,
    debug_writable: bool,
}

impl RomTarget {
    pub fn new(image: &[u8]) -> Self {
        RomTarget {
            bytes: RefCell::new(image.to_vec().into_boxed_slice()),
            debug_writable: false,
        }
    }

    pub fn with_writable_backing(image: &[u8]) -> Self {
        RomTarget {
            bytes: RefCell::new(image.to_vec().into_boxed_slice()),
            debug_writable: true,
        }
    }

    pub fn len(&self) -> u32 {
        self.bytes.borrow().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

impl Target for RomTarget {
    fn caps(&self) -> TargetCaps {
        TargetCaps::PEEK | TargetCaps::WIDE
    }

    fn read8(&mut self, phys: u32, _access: &BusAccess) -> u8 {
        self.bytes.borrow()[phys as usize]
    }

    fn write8(&mut self, phys: u32, value: u8, access: &BusAccess) {
        if self.debug_writable && access.intent == AccessIntent::DebugWrite {
            self.bytes.borrow_mut()[phys as usize] = value;
        }
    }

    fn read16(&mut self, phys: u32, _access: &BusAccess) -> u16 {
        let i = phys as usize;
        let bytes = self.bytes.borrow();
        u16::from_le_bytes([bytes[i], bytes[i + 1]])
    }

    fn read32(&mut self, phys: u32, _access: &BusAccess) -> u32 {
        let i = phys as usize;
        let bytes = self.bytes.borrow();
        u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
    }

    // ROM contents survive clear(): only bring-up replaces images.
}
