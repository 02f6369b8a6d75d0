//! Signal fabric: the machine's interrupt and control lines.
//!
//! Each line aggregates an open set of asserters; the line is asserted while
//! the set is non-empty, so many devices can hold IRQ simultaneously and the
//! line releases only when the last one clears it. NMI additionally latches
//! an edge on the deasserted→asserted transition of the aggregate: the CPU
//! sees exactly one edge per asserting transition regardless of how long the
//! line is held.

use std::collections::BTreeSet;

/// Wired lines of the 65xx family (plus the DMA handshake pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalLine {
    Irq,
    Nmi,
    Reset,
    Rdy,
    DmaReq,
    BusEnable,
}

impl SignalLine {
    pub const ALL: [SignalLine; 6] = [
        SignalLine::Irq,
        SignalLine::Nmi,
        SignalLine::Reset,
        SignalLine::Rdy,
        SignalLine::DmaReq,
        SignalLine::BusEnable,
    ];

    const fn index(self) -> usize {
        match self {
            SignalLine::Irq => 0,
            SignalLine::Nmi => 1,
            SignalLine::Reset => 2,
            SignalLine::Rdy => 3,
            SignalLine::DmaReq => 4,
            SignalLine::BusEnable => 5,
        }
    }
}

/// Invoked on aggregate level changes: `(line, new_level, device_id, cycle)`.
pub type LevelListener = Box<dyn FnMut(SignalLine, bool, i32, u64)>;

/// Multi-asserter signal lines with NMI edge detection.
#[derive(Default)]
pub struct SignalBus {
    // Ordered sets keep trace output and listener firing deterministic.
    asserters: [BTreeSet<i32>; 6],
    nmi_edge_pending: bool,
    listeners: Vec<LevelListener>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device_id` to the asserter set. Re-asserting is idempotent.
    pub fn assert(&mut self, line: SignalLine, device_id: i32, cycle: u64) {
        let set = &mut self.asserters[line.index()];
        let inserted = set.insert(device_id);
        if inserted && set.len() == 1 {
            // Aggregate rose.
            if line == SignalLine::Nmi {
                self.nmi_edge_pending = true;
            }
            tracing::trace!(?line, device_id, cycle, "line asserted");
            self.notify(line, true, device_id, cycle);
        }
    }

    /// Remove `device_id` from the asserter set. Unknown ids are ignored.
    pub fn deassert(&mut self, line: SignalLine, device_id: i32, cycle: u64) {
        let set = &mut self.asserters[line.index()];
        let removed = set.remove(&device_id);
        if removed && set.is_empty() {
            tracing::trace!(?line, device_id, cycle, "line released");
            self.notify(line, false, device_id, cycle);
        }
    }

    /// Current aggregate level.
    pub fn sample(&self, line: SignalLine) -> bool {
        !self.asserters[line.index()].is_empty()
    }

    pub fn asserter_count(&self, line: SignalLine) -> usize {
        self.asserters[line.index()].len()
    }

    /// Return and clear the pending NMI edge.
    pub fn consume_nmi_edge(&mut self) -> bool {
        std::mem::take(&mut self.nmi_edge_pending)
    }

    /// Subscribe to aggregate level changes. Listeners survive [`reset`].
    ///
    /// [`reset`]: SignalBus::reset
    pub fn on_level_change(&mut self, listener: LevelListener) {
        self.listeners.push(listener);
    }

    /// Drop all asserters and the pending NMI edge. Wiring (listeners) stays.
    pub fn reset(&mut self) {
        for set in &mut self.asserters {
            set.clear();
        }
        self.nmi_edge_pending = false;
    }

    fn notify(&mut self, line: SignalLine, level: bool, device_id: i32, cycle: u64) {
        for listener in &mut self.listeners {
            listener(line, level, device_id, cycle);
        }
    }
}
