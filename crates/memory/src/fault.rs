//! First-class fault values.
//!
//! Bus faults are data, not panics or unwinds: a permission miss costs two
//! branches and a struct construction. The CPU client translates
//! [`FaultKind`] into its architectural exception model; the bus never
//! guesses.

use std::fmt;

use crate::access::{AccessIntent, AccessMode, Addr, BusAccess, Width};
use crate::region::RegionTag;

/// Why a transaction did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No page entry (or the page index is past the table).
    Unmapped,
    /// Read or write permission denied.
    Permission,
    /// Execute permission denied on an instruction fetch (Native mode only).
    Nx,
    /// Atomic wide access at a boundary the target refuses (Native mode only).
    Misaligned,
    /// The target reported an implementation-defined failure.
    DeviceFault,
}

/// Fault payload. Carries enough context for tooling to render a line like
/// `unmapped instruction fetch at $FE12, src=2, cycle=12345, device=-1`.
#[derive(Debug, Clone)]
pub struct BusFault {
    pub kind: FaultKind,
    pub addr: Addr,
    pub width: Width,
    pub intent: AccessIntent,
    pub mode: AccessMode,
    pub source_id: i32,
    pub device_id: i32,
    pub region_tag: RegionTag,
    pub cycle: u64,
    /// Cycles spent before the failure; non-zero when a decomposed wide
    /// transaction faulted after completing earlier bytes.
    pub cycles_consumed: u64,
}

impl BusFault {
    pub(crate) fn from_access(
        kind: FaultKind,
        access: &BusAccess,
        device_id: i32,
        region_tag: RegionTag,
    ) -> Self {
        BusFault {
            kind,
            addr: access.addr,
            width: access.width,
            intent: access.intent,
            mode: access.mode,
            source_id: access.source_id,
            device_id,
            region_tag,
            cycle: access.cycle,
            cycles_consumed: 0,
        }
    }

    pub(crate) fn unmapped(access: &BusAccess) -> Self {
        Self::from_access(FaultKind::Unmapped, access, crate::bus::UNMAPPED_DEVICE, RegionTag::Unmapped)
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FaultKind::Unmapped => "unmapped",
            FaultKind::Permission => "permission-denied",
            FaultKind::Nx => "non-executable",
            FaultKind::Misaligned => "misaligned",
            FaultKind::DeviceFault => "device-faulted",
        };
        let intent = match self.intent {
            AccessIntent::DataRead => "data read",
            AccessIntent::DataWrite => "data write",
            AccessIntent::InstructionFetch => "instruction fetch",
            AccessIntent::DebugRead => "debug read",
            AccessIntent::DebugWrite => "debug write",
            AccessIntent::DmaRead => "dma read",
            AccessIntent::DmaWrite => "dma write",
        };
        write!(
            f,
            "{kind} {intent} at ${:04X}, src={}, cycle={}, device={}",
            self.addr, self.source_id, self.cycle, self.device_id
        )
    }
}

/// Successful completion of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion<T> {
    pub value: T,
    /// Cycles the bus charged for the transaction (one per target operation).
    pub cycles: u64,
}

/// Outcome of a fallible bus transaction. Success and failure share the same
/// branch-light shape: both arms carry the cycles consumed so far.
pub type BusResult<T> = Result<Completion<T>, BusFault>;

/// Outcome of a write, which produces no value.
pub type BusResultUnit = BusResult<()>;
