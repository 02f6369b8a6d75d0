//! Page-routed memory substrate for the orchard 65xx machine family.
//!
//! Three planes:
//!
//! - Data plane: [`MemoryBus`], an address-indexed page table dispatching
//!   byte/word/dword accesses to typed [`Target`]s with permission, NX and
//!   width policy enforcement. Faults are first-class values, never panics.
//! - Control plane: [`Region`]s, [`MappingStack`]s, [`MappingLayer`]s and
//!   [`SwapGroup`]s describe what is mapped where; mutating them recomputes
//!   the affected page entries atomically.
//! - Targets: [`RamTarget`]/[`RomTarget`] leaf storage plus
//!   [`WindowComposite`] sub-page dispatch for soft-switch-controlled
//!   bank/aux selection.

mod access;
mod bus;
mod composite;
mod fault;
mod layer;
mod ram;
mod region;
mod rom;
mod swap;
mod target;

pub use access::{AccessFlags, AccessIntent, AccessMode, Addr, BusAccess, Privilege, Width};
pub use bus::{MapError, MemoryBus, PageEntry, Perms, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, UNMAPPED_DEVICE};
pub use composite::{Window, WindowComposite};
pub use fault::{BusFault, BusResult, BusResultUnit, Completion, FaultKind};
pub use layer::{LayeredMapping, MappingLayer};
pub use ram::{RamTarget, StoragePool};
pub use region::{MappingEntry, MappingStack, Region, RegionId, RegionTag};
pub use rom::RomTarget;
pub use swap::{SwapGroup, SwapVariant};
pub use target::{share, Target, TargetCaps, TargetError, TargetHandle};
