//! Deterministic collaborators for exercising the protocol without a network.
//!
//! Available in this crate's tests and with the `test-support` feature.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use hwmp_protocol::{Frame, MeshAddress, Metric, MAX_PERR_DESTINATIONS, MAX_PREQ_TARGETS};

use crate::scheduler::{Scheduler, TimerEvent, TimerHandle};
use crate::transport::MeshTransport;

/// Scheduler driven by hand: time only moves on `advance`/`pop_due`
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<TimerHandle, (Duration, TimerEvent)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Pending events in firing order
    pub fn pending_events(&self) -> Vec<TimerEvent> {
        let mut pending: Vec<_> = self
            .timers
            .iter()
            .map(|(handle, (due, event))| (*due, *handle, *event))
            .collect();
        pending.sort_by_key(|(due, handle, _)| (*due, *handle));
        pending.into_iter().map(|(_, _, event)| event).collect()
    }

    /// Remove and return the earliest timer due at or before `deadline`,
    /// moving the clock to its due time
    pub fn pop_due(&mut self, deadline: Duration) -> Option<TimerEvent> {
        let (handle, due) = self
            .timers
            .iter()
            .filter(|(_, (due, _))| *due <= deadline)
            .min_by_key(|(handle, (due, _))| (*due, **handle))
            .map(|(handle, (due, _))| (*handle, *due))?;

        let (_, event) = self.timers.remove(&handle)?;
        self.now = self.now.max(due);
        Some(event)
    }

    /// Fire every timer due within `delay` and move the clock past it.
    ///
    /// Timers scheduled by the caller while handling the returned events are
    /// not included; use `pop_due` in a loop for that.
    pub fn advance(&mut self, delay: Duration) -> Vec<TimerEvent> {
        let deadline = self.now + delay;
        let mut fired = Vec::new();
        while let Some(event) = self.pop_due(deadline) {
            fired.push(event);
        }
        self.now = deadline;
        fired
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle::new(self.next_id);
        self.timers.insert(handle, (self.now + delay, event));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.remove(&handle);
    }

    fn is_pending(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }
}

/// Transport that records every transmitted frame
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    address: MeshAddress,
    peers: Vec<MeshAddress>,
    metrics: HashMap<MeshAddress, Metric>,
    default_metric: Metric,
    channel: u16,
    preq_capacity: usize,
    perr_capacity: usize,
    sent: Vec<Frame>,
}

impl RecordingTransport {
    pub fn new(address: MeshAddress) -> Self {
        RecordingTransport {
            address,
            peers: Vec::new(),
            metrics: HashMap::new(),
            default_metric: 1,
            channel: 1,
            preq_capacity: MAX_PREQ_TARGETS,
            perr_capacity: MAX_PERR_DESTINATIONS,
            sent: Vec::new(),
        }
    }

    pub fn with_peers(mut self, peers: Vec<MeshAddress>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_metric(mut self, peer: MeshAddress, metric: Metric) -> Self {
        self.metrics.insert(peer, metric);
        self
    }

    pub fn with_capacities(mut self, preq: usize, perr: usize) -> Self {
        self.preq_capacity = preq;
        self.perr_capacity = perr;
        self
    }

    pub fn with_channel(mut self, channel: u16) -> Self {
        self.channel = channel;
        self
    }

    pub fn sent(&self) -> &[Frame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.sent)
    }
}

impl MeshTransport for RecordingTransport {
    fn address(&self) -> MeshAddress {
        self.address
    }

    fn link_metric(&self, peer: MeshAddress) -> Metric {
        self.metrics
            .get(&peer)
            .copied()
            .unwrap_or(self.default_metric)
    }

    fn peers(&self) -> Vec<MeshAddress> {
        self.peers.clone()
    }

    fn transmit(&mut self, frame: Frame) {
        self.sent.push(frame);
    }

    fn channel_id(&self) -> u16 {
        self.channel
    }

    fn preq_capacity(&self) -> usize {
        self.preq_capacity
    }

    fn perr_capacity(&self) -> usize {
        self.perr_capacity
    }
}
