//! Device registry: structural id ↔ human-readable identity.
//!
//! The hot path stores only an `i32`; tooling (trace viewers, debuggers)
//! decorates output through the registry. Write-once, read-many: everything
//! is registered during bring-up, before the machine starts running.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Ram,
    Rom,
    Io,
    Slot,
    Video,
    Dma,
    Debugger,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: i32,
    pub kind: DeviceKind,
    pub name: String,
    /// Structural location, e.g. `/machine/slots/6/disk`.
    pub wiring_path: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device id {id} already registered as `{existing}`")]
    DuplicateDevice { id: i32, existing: String },
}

#[derive(Default)]
pub struct DeviceRegistry {
    next_id: i32,
    devices: BTreeMap<i32, DeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next structural id and register under it.
    pub fn register(&mut self, kind: DeviceKind, name: &str, wiring_path: &str) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        self.devices.insert(
            id,
            DeviceInfo { id, kind, name: name.into(), wiring_path: wiring_path.into() },
        );
        tracing::debug!(id, name, wiring_path, "device registered");
        id
    }

    /// Register under a caller-chosen id. Duplicate ids are a wiring bug.
    pub fn register_with_id(
        &mut self,
        id: i32,
        kind: DeviceKind,
        name: &str,
        wiring_path: &str,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.devices.get(&id) {
            return Err(RegistryError::DuplicateDevice { id, existing: existing.name.clone() });
        }
        self.devices.insert(
            id,
            DeviceInfo { id, kind, name: name.into(), wiring_path: wiring_path.into() },
        );
        self.next_id = self.next_id.max(id + 1);
        Ok(())
    }

    pub fn get(&self, id: i32) -> Option<&DeviceInfo> {
        self.devices.get(&id)
    }

    /// Infallible rendering for trace output; unknown ids (including the
    /// bus's `-1` unmapped sentinel) still produce something printable.
    pub fn describe(&self, id: i32) -> String {
        match self.devices.get(&id) {
            Some(info) => format!("{} ({:?}) at {}", info.name, info.kind, info.wiring_path),
            None => format!("device {id} (unregistered)"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
