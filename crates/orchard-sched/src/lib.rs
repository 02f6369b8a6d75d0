//! Discrete-event scheduler over the machine's single monotonic cycle
//! counter.
//!
//! Events are ordered by `(cycle, priority, sequence)`; `sequence` is a
//! monotone insertion counter, so two runs that issue the same calls in the
//! same order dispatch bit-for-bit identically. Cancellation tombstones the
//! handle instead of rebuilding the heap; tombstones are compacted when they
//! pile up or the queue drains.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use memory::MemoryBus;
use orchard_interrupts::SignalBus;

/// The machine cycle counter. Monotonic, 64-bit, never wraps in practice.
pub type Cycle = u64;

/// Coarse classification for traces and queue inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Timer,
    Device,
    Video,
    Audio,
    Debug,
}

/// Opaque id for a scheduled event, used only for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

/// Everything a callback may touch. Rebuilt for every dispatch and replaced
/// wholesale on machine reset; callbacks must not cache it.
pub struct EventContext<'a> {
    /// The event's own scheduled cycle.
    pub now: Cycle,
    pub scheduler: &'a mut Scheduler,
    pub signals: &'a mut SignalBus,
    pub bus: &'a mut MemoryBus,
}

pub type EventCallback = Box<dyn FnOnce(&mut EventContext<'_>)>;

struct QueuedEvent {
    cycle: Cycle,
    priority: i32,
    sequence: u64,
    handle: EventHandle,
    kind: EventKind,
    tag: Option<&'static str>,
    callback: EventCallback,
}

impl QueuedEvent {
    fn key(&self) -> (Cycle, i32, u64) {
        (self.cycle, self.priority, self.sequence)
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Tombstone count that triggers a heap compaction.
const COMPACT_THRESHOLD: usize = 64;

#[derive(Default)]
pub struct Scheduler {
    now: Cycle,
    next_sequence: u64,
    next_handle: u64,
    queue: BinaryHeap<Reverse<QueuedEvent>>,
    /// Live (scheduled, not yet dispatched or cancelled) handles.
    pending: HashSet<u64>,
    /// Cancelled handles still sitting in the heap.
    tombstones: HashSet<u64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cycle. Strictly non-decreasing across any sequence of calls.
    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Schedule `callback` at an absolute cycle. Scheduling in the past
    /// clamps to `now` (the event fires on the next dispatch).
    pub fn schedule_at(
        &mut self,
        cycle: Cycle,
        kind: EventKind,
        priority: i32,
        callback: EventCallback,
        tag: Option<&'static str>,
    ) -> EventHandle {
        let cycle = cycle.max(self.now);
        let handle = EventHandle(self.next_handle);
        self.next_handle += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(handle.0);
        self.queue.push(Reverse(QueuedEvent {
            cycle,
            priority,
            sequence,
            handle,
            kind,
            tag,
            callback,
        }));
        tracing::trace!(cycle, ?kind, priority, sequence, tag, "event scheduled");
        handle
    }

    pub fn schedule_after(
        &mut self,
        delta: u64,
        kind: EventKind,
        priority: i32,
        callback: EventCallback,
        tag: Option<&'static str>,
    ) -> EventHandle {
        self.schedule_at(self.now + delta, kind, priority, callback, tag)
    }

    /// Tombstone a handle. Returns whether a live event was cancelled;
    /// cancelling an unknown or already-fired handle is not an error.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if !self.pending.remove(&handle.0) {
            return false;
        }
        self.tombstones.insert(handle.0);
        if self.tombstones.len() > COMPACT_THRESHOLD {
            self.compact();
        }
        true
    }

    /// Cycle of the next live event, if any.
    pub fn peek_next_due(&mut self) -> Option<Cycle> {
        self.drop_dead_head();
        self.queue.peek().map(|Reverse(ev)| ev.cycle)
    }

    /// Advance the counter by `delta`, dispatching every live event scheduled
    /// at or before the target. `now` jumps to each event's cycle before its
    /// callback runs, then lands on the target.
    pub fn advance(&mut self, delta: u64, signals: &mut SignalBus, bus: &mut MemoryBus) {
        let target = self.now + delta;
        self.run_due(target, signals, bus);
        self.now = target;
    }

    /// Dispatch everything due at the current cycle without advancing.
    pub fn dispatch_due(&mut self, signals: &mut SignalBus, bus: &mut MemoryBus) {
        self.run_due(self.now, signals, bus);
    }

    /// Skip idle time: jump to the next live event and dispatch it (plus
    /// anything else scheduled at that cycle). Returns false on an empty
    /// queue.
    pub fn jump_to_next_event_and_dispatch(
        &mut self,
        signals: &mut SignalBus,
        bus: &mut MemoryBus,
    ) -> bool {
        match self.peek_next_due() {
            Some(cycle) => {
                let delta = cycle - self.now;
                self.advance(delta, signals, bus);
                true
            }
            None => false,
        }
    }

    /// Wipe the queue and counters. The cycle counter restarts at zero; this
    /// only happens on machine teardown/cold reset, which also replaces every
    /// event context.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.tombstones.clear();
        self.now = 0;
        self.next_sequence = 0;
        self.next_handle = 0;
    }

    fn run_due(&mut self, target: Cycle, signals: &mut SignalBus, bus: &mut MemoryBus) {
        loop {
            self.drop_dead_head();
            let due = matches!(self.queue.peek(), Some(Reverse(ev)) if ev.cycle <= target);
            if !due {
                break;
            }
            let Reverse(event) = self.queue.pop().unwrap();
            self.pending.remove(&event.handle.0);
            // The callback observes its own scheduled cycle.
            self.now = event.cycle;
            tracing::trace!(
                cycle = event.cycle,
                kind = ?event.kind,
                tag = event.tag,
                "event dispatched"
            );
            let mut ctx = EventContext {
                now: event.cycle,
                scheduler: &mut *self,
                signals: &mut *signals,
                bus: &mut *bus,
            };
            (event.callback)(&mut ctx);
        }
        if self.queue.is_empty() {
            self.tombstones.clear();
        }
    }

    /// Discard tombstoned events sitting at the head of the heap.
    fn drop_dead_head(&mut self) {
        while let Some(Reverse(ev)) = self.queue.peek() {
            if self.tombstones.contains(&ev.handle.0) {
                let Reverse(ev) = self.queue.pop().unwrap();
                self.tombstones.remove(&ev.handle.0);
            } else {
                break;
            }
        }
    }

    /// Rebuild the heap without tombstoned events.
    fn compact(&mut self) {
        let drained = std::mem::take(&mut self.queue);
        let tombstones = std::mem::take(&mut self.tombstones);
        self.queue = drained
            .into_iter()
            .filter(|Reverse(ev)| !tombstones.contains(&ev.handle.0))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (SignalBus, MemoryBus) {
        (SignalBus::new(), MemoryBus::new(16))
    }

    #[test]
    fn schedule_in_the_past_clamps_to_now() {
        let (mut signals, mut bus) = fixtures();
        let mut sched = Scheduler::new();
        sched.advance(100, &mut signals, &mut bus);

        sched.schedule_at(50, EventKind::Timer, 0, Box::new(|_| {}), None);
        assert_eq!(sched.peek_next_due(), Some(100));
    }

    #[test]
    fn compaction_drops_tombstones() {
        let (mut signals, mut bus) = fixtures();
        let mut sched = Scheduler::new();
        let handles: Vec<_> = (0..100)
            .map(|i| sched.schedule_at(1000 + i, EventKind::Device, 0, Box::new(|_| {}), None))
            .collect();
        for h in &handles[..80] {
            assert!(sched.cancel(*h));
        }
        // Threshold crossed: the heap only holds live events now.
        assert_eq!(sched.pending_events(), 20);
        sched.advance(2000, &mut signals, &mut bus);
        assert_eq!(sched.pending_events(), 0);
    }
}
