//! Reset classification shared by the machine and its devices.

/// How deep a reset goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Power cycle: storage cleared, scheduler and signal fabric wiped, the
    /// event context replaced.
    Cold,
    /// Reset line pulse: device state re-latches, memory contents survive.
    Warm,
}
