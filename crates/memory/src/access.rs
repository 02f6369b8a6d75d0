//! Per-transaction access context.
//!
//! Every bus transaction carries a [`BusAccess`] describing who is on the bus,
//! why, and under which CPU mode. The descriptor is immutable for the duration
//! of the transaction; decomposed wide accesses derive per-byte copies from it.

use bitflags::bitflags;

/// Flat virtual address as seen by the CPU client. 16-, 24- and 32-bit address
/// spaces all fit; the bus masks against its configured space width.
pub type Addr = u32;

/// Legal transfer widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
}

impl Width {
    pub const fn bits(self) -> u8 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
        }
    }

    pub const fn bytes(self) -> u32 {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
        }
    }
}

/// CPU execution mode the access was issued under.
///
/// Compat mode keeps every peripheral cycle byte-visible and ignores NX;
/// Native mode permits atomic wide transfers and enforces NX on fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    Native,
    #[default]
    Compat,
}

/// What the initiator is doing on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessIntent {
    DataRead,
    DataWrite,
    InstructionFetch,
    DebugRead,
    DebugWrite,
    DmaRead,
    DmaWrite,
}

impl AccessIntent {
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            AccessIntent::DataRead
                | AccessIntent::InstructionFetch
                | AccessIntent::DebugRead
                | AccessIntent::DmaRead
        )
    }

    pub const fn is_write(self) -> bool {
        !self.is_read()
    }

    pub const fn is_debug(self) -> bool {
        matches!(self, AccessIntent::DebugRead | AccessIntent::DebugWrite)
    }
}

/// Privilege ring of the initiator. Bring-up decides whether rings are
/// enforced at all; the default machine profiles run everything in Ring0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Privilege {
    #[default]
    Ring0,
    Ring1,
    Ring2,
    Ring3,
}

bitflags! {
    /// Modifiers on a single transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        /// The access must not trigger any observable side effect outside the
        /// addressed storage byte. Soft-switch handlers early-out on it.
        const NO_SIDE_EFFECTS = 1 << 0;
        /// Byte order for wide transfers. Always set by the constructors; the
        /// 65xx lineage has no big-endian mode, the flag exists so traces can
        /// state the order explicitly.
        const LITTLE_ENDIAN = 1 << 1;
        /// Request a single wide call to the target instead of a byte
        /// sequence, if the target supports it.
        const ATOMIC = 1 << 2;
        /// Force byte decomposition. Wins over `ATOMIC` when both are set.
        const DECOMPOSE = 1 << 3;
    }
}

/// Immutable descriptor carried on every bus transaction.
#[derive(Debug, Clone)]
pub struct BusAccess {
    pub addr: Addr,
    /// Value for writes; ignored on reads.
    pub value: u32,
    pub width: Width,
    pub mode: AccessMode,
    /// Only meaningful in [`AccessMode::Compat`].
    pub emulation_flag: bool,
    pub intent: AccessIntent,
    /// Structural id of the initiator (CPU core, DMA channel, debugger).
    pub source_id: i32,
    /// Cycle the access was issued at, for timing correlation in traces and
    /// fault payloads.
    pub cycle: u64,
    pub flags: AccessFlags,
    pub privilege: Privilege,
}

impl BusAccess {
    fn base(addr: Addr, intent: AccessIntent) -> Self {
        BusAccess {
            addr,
            value: 0,
            width: Width::W8,
            mode: AccessMode::Native,
            emulation_flag: false,
            intent,
            source_id: 0,
            cycle: 0,
            flags: AccessFlags::LITTLE_ENDIAN,
            privilege: Privilege::Ring0,
        }
    }

    pub fn data_read(addr: Addr) -> Self {
        Self::base(addr, AccessIntent::DataRead)
    }

    pub fn data_write(addr: Addr, value: u32) -> Self {
        let mut a = Self::base(addr, AccessIntent::DataWrite);
        a.value = value;
        a
    }

    pub fn fetch(addr: Addr) -> Self {
        Self::base(addr, AccessIntent::InstructionFetch)
    }

    /// Debugger peek: never toggles side effects.
    pub fn debug_read(addr: Addr) -> Self {
        let mut a = Self::base(addr, AccessIntent::DebugRead);
        a.flags |= AccessFlags::NO_SIDE_EFFECTS;
        a
    }

    /// Debugger poke: side-effect free, but may reach ROM backing storage.
    pub fn debug_write(addr: Addr, value: u32) -> Self {
        let mut a = Self::base(addr, AccessIntent::DebugWrite);
        a.value = value;
        a.flags |= AccessFlags::NO_SIDE_EFFECTS;
        a
    }

    pub fn dma_read(addr: Addr) -> Self {
        Self::base(addr, AccessIntent::DmaRead)
    }

    pub fn dma_write(addr: Addr, value: u32) -> Self {
        let mut a = Self::base(addr, AccessIntent::DmaWrite);
        a.value = value;
        a
    }

    pub fn with_width(mut self, width: Width) -> Self {
        self.width = width;
        self
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_flags(mut self, flags: AccessFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_source(mut self, source_id: i32) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    /// True when the decomposition policy must win even if `ATOMIC` is set.
    pub fn wants_decompose(&self) -> bool {
        self.flags.contains(AccessFlags::DECOMPOSE)
    }

    pub fn is_side_effect_free(&self) -> bool {
        self.flags.contains(AccessFlags::NO_SIDE_EFFECTS)
    }

    /// Derive the `i`-th byte access of a decomposed wide transfer.
    ///
    /// Bytes are issued in ascending address order, little-endian: byte `i`
    /// carries bits `8*i..8*i+8` of the wide value.
    pub fn byte_lane(&self, i: u32) -> BusAccess {
        let mut byte = self.clone();
        byte.addr = self.addr.wrapping_add(i);
        byte.width = Width::W8;
        byte.value = (self.value >> (8 * i)) & 0xFF;
        byte.flags -= AccessFlags::ATOMIC;
        byte
    }
}
