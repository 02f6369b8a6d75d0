//! Machine bring-up and assembly for the orchard 65xx family.
//!
//! A [`ProvisionBundle`] (RAM size, ROM images, device list) is validated
//! against the model's [`MachineConstants`] and turned into a running
//! [`Machine`]: page-routed bus with the canonical low-64K layout, soft
//! switches behind the I/O page, discrete-event scheduler and signal fabric.

mod aux;
mod bringup;
mod machine;
mod softswitch;

pub use aux::{AuxState, ZeroPageComposite};
pub use bringup::{
    validate, BringUpError, DeviceSpec, LayoutOverrides, ProvisionBundle, RomId, ValidatedLayout,
    SLOT_ROM_SIZE,
};
pub use machine::Machine;
pub use softswitch::{KeyboardLatch, LanguageCard, Speaker, SwitchState};
