//! Event types and priority queue for the discrete event simulation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use hwmp_protocol::Frame;
use hwmp_routing::{TimerEvent, TimerHandle};

/// Unique sequence number for deterministic ordering of same-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Events in the simulation. Nodes are identified by index.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame arrives at a node over a link.
    FrameDelivery { to: usize, from: usize, frame: Frame },
    /// A protocol timer of a node fires.
    Timer {
        node: usize,
        handle: TimerHandle,
        event: TimerEvent,
    },
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Duration,
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Duration, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Reverse ordering: BinaryHeap is a max-heap, the earliest event must win.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Min-heap of events plus the bookkeeping of live timer handles.
///
/// Cancelled timers stay in the heap and are skipped when popped.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    next_timer: u64,
    live_timers: HashSet<TimerHandle>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: Duration, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.heap.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_timer(&mut self, time: Duration, node: usize, event: TimerEvent) -> TimerHandle {
        self.next_timer += 1;
        let handle = TimerHandle::new(self.next_timer);
        self.live_timers.insert(handle);
        self.push(time, Event::Timer { node, handle, event });
        handle
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.live_timers.remove(&handle);
    }

    pub fn is_timer_live(&self, handle: TimerHandle) -> bool {
        self.live_timers.contains(&handle)
    }

    /// Pop the earliest live event due at or before `deadline`
    pub fn pop_due(&mut self, deadline: Duration) -> Option<ScheduledEvent> {
        while self.heap.peek()?.time <= deadline {
            let scheduled = self.heap.pop()?;
            if let Event::Timer { handle, .. } = scheduled.event {
                if !self.live_timers.remove(&handle) {
                    continue;
                }
            }
            return Some(scheduled);
        }
        None
    }

    /// Number of queued entries, including cancelled timers not yet skipped
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn live_timer_count(&self) -> usize {
        self.live_timers.len()
    }
}
