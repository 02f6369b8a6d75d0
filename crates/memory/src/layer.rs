//! Named, prioritised mapping layers.
//!
//! A layer contributes page mappings while active; a higher-priority active
//! layer shadows lower ones for overlapping pages. Activation and
//! deactivation recompute only the affected pages; the base image built by
//! direct maps, stacks and swap groups is untouched, so
//! activate-then-deactivate is an identity on the page table.

use crate::bus::{MapError, MemoryBus, PageEntry, Perms, PAGE_MASK, PAGE_SHIFT};
use crate::region::RegionTag;
use crate::target::{TargetCaps, TargetHandle};

/// Layer identity and activation state.
pub struct MappingLayer {
    pub name: String,
    pub priority: i32,
    pub is_active: bool,
}

/// One contribution of a layer: a contiguous page-aligned range.
pub struct LayeredMapping {
    pub virt_base: u32,
    pub size: u32,
    pub device_id: i32,
    pub tag: RegionTag,
    pub perms: Perms,
    pub caps: TargetCaps,
    pub target: TargetHandle,
    pub phys_base: u32,
}

impl LayeredMapping {
    fn covers(&self, page_addr: u32) -> bool {
        page_addr >= self.virt_base && page_addr - self.virt_base < self.size
    }
}

pub(crate) struct LayerRecord {
    pub(crate) layer: MappingLayer,
    pub(crate) mappings: Vec<LayeredMapping>,
}

impl MemoryBus {
    /// Register a layer, initially inactive.
    pub fn add_layer(&mut self, name: &str, priority: i32) -> Result<(), MapError> {
        if self.layers.iter().any(|r| r.layer.name == name) {
            return Err(MapError::DuplicateLayer { name: name.into() });
        }
        self.layers.push(LayerRecord {
            layer: MappingLayer { name: name.into(), priority, is_active: false },
            mappings: Vec::new(),
        });
        Ok(())
    }

    pub fn add_layer_mapping(
        &mut self,
        layer: &str,
        mapping: LayeredMapping,
    ) -> Result<(), MapError> {
        if mapping.virt_base & PAGE_MASK != 0 || mapping.size & PAGE_MASK != 0 || mapping.size == 0
        {
            return Err(MapError::Unaligned { base: mapping.virt_base, size: mapping.size });
        }
        self.check_span(mapping.virt_base, mapping.size)?;
        let idx = self.layer_index(layer)?;
        let span = (mapping.virt_base, mapping.size);
        self.layers[idx].mappings.push(mapping);
        if self.layers[idx].layer.is_active {
            self.recompute_span(span.0, span.1);
        }
        Ok(())
    }

    pub fn activate_layer(&mut self, name: &str) -> Result<(), MapError> {
        self.set_layer_active(name, true)
    }

    pub fn deactivate_layer(&mut self, name: &str) -> Result<(), MapError> {
        self.set_layer_active(name, false)
    }

    pub fn is_layer_active(&self, name: &str) -> Result<bool, MapError> {
        Ok(self.layers[self.layer_index(name)?].layer.is_active)
    }

    /// Rewrite the permissions of every mapping in the layer (e.g. flipping a
    /// RAM overlay between read-only and read-write).
    pub fn set_layer_permissions(&mut self, name: &str, perms: Perms) -> Result<(), MapError> {
        let idx = self.layer_index(name)?;
        for m in &mut self.layers[idx].mappings {
            m.perms = perms;
        }
        if self.layers[idx].layer.is_active {
            self.recompute_layer_spans(idx);
        }
        Ok(())
    }

    fn set_layer_active(&mut self, name: &str, active: bool) -> Result<(), MapError> {
        let idx = self.layer_index(name)?;
        if self.layers[idx].layer.is_active == active {
            return Ok(());
        }
        self.layers[idx].layer.is_active = active;
        tracing::debug!(layer = name, active, "layer toggled");
        self.recompute_layer_spans(idx);
        Ok(())
    }

    fn layer_index(&self, name: &str) -> Result<usize, MapError> {
        self.layers
            .iter()
            .position(|r| r.layer.name == name)
            .ok_or_else(|| MapError::UnknownLayer { name: name.into() })
    }

    fn recompute_layer_spans(&mut self, idx: usize) {
        let spans: Vec<(u32, u32)> = self.layers[idx]
            .mappings
            .iter()
            .map(|m| (m.virt_base, m.size))
            .collect();
        for (base, size) in spans {
            self.recompute_span(base, size);
        }
    }

    pub(crate) fn recompute_span(&mut self, base: u32, size: u32) {
        let first = (base >> PAGE_SHIFT) as usize;
        let count = (size >> PAGE_SHIFT) as usize;
        for page in first..first + count {
            self.recompute_page(page);
        }
    }

    /// Entry contributed by the highest-priority active layer covering
    /// `page_addr`. Equal priorities resolve to the earliest-registered
    /// layer; within a layer the first covering mapping wins. Both rules are
    /// insertion-ordered, keeping recomputation deterministic.
    pub(crate) fn layer_contribution(&self, page_addr: u32) -> Option<PageEntry> {
        let mut best: Option<(i32, PageEntry)> = None;
        for record in &self.layers {
            if !record.layer.is_active {
                continue;
            }
            if let Some(m) = record.mappings.iter().find(|m| m.covers(page_addr)) {
                let replace = match &best {
                    None => true,
                    Some((priority, _)) => record.layer.priority > *priority,
                };
                if replace {
                    best = Some((
                        record.layer.priority,
                        PageEntry {
                            device_id: m.device_id,
                            tag: m.tag,
                            perms: m.perms,
                            caps: m.caps,
                            target: Some(m.target.clone()),
                            phys_base: m.phys_base + (page_addr - m.virt_base),
                        },
                    ));
                }
            }
        }
        best.map(|(_, entry)| entry)
    }
}
