//! Outgoing PREQ and PERR coalescing queues
//!
//! Each queue owns the work accumulated since its last flush plus a
//! single-slot flush timer. Enqueueing arms the timer only when the slot is
//! empty, so bursts within one minimum interval leave in one transmission.

use std::time::Duration;

use hwmp_protocol::{FailedDestination, MeshAddress, Preq, PreqTarget, SeqNo, MAX_PREQ_TARGETS};

use crate::scheduler::{Scheduler, TimerEvent, TimerSlot};

/// Pending PREQs of one interface
#[derive(Debug)]
pub struct PreqQueue {
    pending: Vec<Preq>,
    capacity: usize,
    timer: TimerSlot,
}

impl PreqQueue {
    /// `capacity` is the number of targets one PREQ element may carry
    pub fn new(capacity: usize) -> Self {
        PreqQueue {
            pending: Vec::new(),
            capacity: capacity.clamp(1, MAX_PREQ_TARGETS),
            timer: TimerSlot::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a locally requested target to a pending PREQ of `originator`
    /// that still has room. Returns false when a new PREQ is needed.
    pub fn append_target(
        &mut self,
        originator: MeshAddress,
        originator_seqno: SeqNo,
        target: PreqTarget,
    ) -> bool {
        let capacity = self.capacity;
        match self
            .pending
            .iter_mut()
            .find(|preq| preq.originator == originator && !preq.is_full(capacity))
        {
            Some(preq) => {
                preq.originator_seqno = preq.originator_seqno.freshest(originator_seqno);
                preq.add_target(target, capacity)
            }
            None => false,
        }
    }

    /// Queue a complete PREQ, split into several if it exceeds the capacity
    pub fn push(&mut self, mut preq: Preq) {
        if preq.targets.len() <= self.capacity {
            self.pending.push(preq);
            return;
        }

        let targets = std::mem::take(&mut preq.targets);
        for chunk in targets.chunks(self.capacity) {
            let mut part = preq.clone();
            part.targets = chunk.to_vec();
            self.pending.push(part);
        }
    }

    pub fn pending(&self) -> &[Preq] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Arm the flush timer if none is in flight
    pub fn schedule_flush(
        &mut self,
        scheduler: &mut dyn Scheduler,
        interval: Duration,
        interface: u32,
    ) -> bool {
        self.timer
            .arm(scheduler, interval, TimerEvent::FlushPreq { interface })
    }

    /// Timer expiry: clear the slot, take everything pending and rearm.
    ///
    /// The PREQ queue keeps ticking; a flush with nothing pending sends nothing.
    pub fn flush(
        &mut self,
        scheduler: &mut dyn Scheduler,
        interval: Duration,
        interface: u32,
    ) -> Vec<Preq> {
        self.timer.clear();
        let preqs = std::mem::take(&mut self.pending);
        self.schedule_flush(scheduler, interval, interface);
        preqs
    }

    /// Drop pending work and cancel the timer
    pub fn shutdown(&mut self, scheduler: &mut dyn Scheduler) {
        self.timer.cancel(scheduler);
        self.pending.clear();
    }
}

/// PERR content taken from a queue at flush time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPerr {
    pub destinations: Vec<FailedDestination>,
    pub receivers: Vec<MeshAddress>,
}

impl PendingPerr {
    /// Resolve receivers: at or above `threshold` distinct receivers the
    /// batch goes out once as a broadcast.
    pub fn into_receivers(self, threshold: usize) -> (Vec<FailedDestination>, Vec<MeshAddress>) {
        let receivers = if self.receivers.len() >= threshold {
            vec![MeshAddress::BROADCAST]
        } else {
            self.receivers
        };
        (self.destinations, receivers)
    }
}

/// Pending PERR content of one interface
#[derive(Debug, Default)]
pub struct PerrQueue {
    destinations: Vec<FailedDestination>,
    receivers: Vec<MeshAddress>,
    timer: TimerSlot,
}

impl PerrQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge failed destinations and receivers into the pending set.
    ///
    /// Receivers are kept as a set. Each destination keeps one entry holding
    /// the freshest sequence number seen since the last flush.
    pub fn enqueue(&mut self, destinations: &[FailedDestination], receivers: &[MeshAddress]) {
        for receiver in receivers {
            if !self.receivers.contains(receiver) {
                self.receivers.push(*receiver);
            }
        }

        for failed in destinations {
            match self
                .destinations
                .iter_mut()
                .find(|pending| pending.destination == failed.destination)
            {
                Some(pending) if pending.seqno.is_fresher_than(failed.seqno) => {}
                Some(pending) => pending.seqno = failed.seqno,
                None => self.destinations.push(*failed),
            }
        }
    }

    pub fn destinations(&self) -> &[FailedDestination] {
        &self.destinations
    }

    pub fn receivers(&self) -> &[MeshAddress] {
        &self.receivers
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn schedule_flush(
        &mut self,
        scheduler: &mut dyn Scheduler,
        interval: Duration,
        interface: u32,
    ) -> bool {
        self.timer
            .arm(scheduler, interval, TimerEvent::FlushPerr { interface })
    }

    /// Timer expiry: clear the slot and take the whole pending set.
    ///
    /// The queue goes idle afterwards. The next `schedule_flush` after an
    /// enqueue arms the timer again.
    pub fn flush(&mut self) -> Option<PendingPerr> {
        self.timer.clear();
        let destinations = std::mem::take(&mut self.destinations);
        let receivers = std::mem::take(&mut self.receivers);

        if destinations.is_empty() {
            return None;
        }
        Some(PendingPerr {
            destinations,
            receivers,
        })
    }

    pub fn shutdown(&mut self, scheduler: &mut dyn Scheduler) {
        self.timer.cancel(scheduler);
        self.destinations.clear();
        self.receivers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualScheduler;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn addr(index: u32) -> MeshAddress {
        MeshAddress::from_index(index)
    }

    fn target(index: u32) -> PreqTarget {
        PreqTarget::new(addr(index), SeqNo::ZERO, false, true)
    }

    fn failed(index: u32, seqno: u32) -> FailedDestination {
        FailedDestination::new(addr(index), SeqNo::new(seqno))
    }

    #[test]
    fn test_append_fills_local_preq_then_needs_new() {
        let mut queue = PreqQueue::new(2);
        assert!(!queue.append_target(addr(1), SeqNo::new(1), target(10)));

        let mut preq = Preq::new(addr(1), SeqNo::new(1), 1, 32, 5000);
        preq.add_target(target(10), 2);
        queue.push(preq);

        assert!(queue.append_target(addr(1), SeqNo::new(1), target(11)));
        assert!(!queue.append_target(addr(1), SeqNo::new(1), target(12)));
        assert_eq!(queue.pending().len(), 1);
        assert_eq!(queue.pending()[0].targets.len(), 2);
    }

    #[test]
    fn test_append_skips_forwarded_preqs() {
        let mut queue = PreqQueue::new(20);
        queue.push(Preq::new(addr(9), SeqNo::new(1), 1, 31, 5000));
        assert!(!queue.append_target(addr(1), SeqNo::new(1), target(10)));
    }

    #[test]
    fn test_same_destination_may_repeat() {
        let mut queue = PreqQueue::new(20);
        let mut preq = Preq::new(addr(1), SeqNo::new(1), 1, 32, 5000);
        preq.add_target(target(10), 20);
        queue.push(preq);

        assert!(queue.append_target(addr(1), SeqNo::new(1), target(10)));
        assert_eq!(queue.pending()[0].targets.len(), 2);
    }

    #[test]
    fn test_append_refreshes_originator_seqno() {
        let mut queue = PreqQueue::new(20);
        queue.push(Preq::new(addr(1), SeqNo::new(1), 1, 32, 5000));
        assert!(queue.append_target(addr(1), SeqNo::new(4), target(10)));
        assert_eq!(queue.pending()[0].originator_seqno, SeqNo::new(4));
    }

    #[test]
    fn test_push_splits_to_capacity() {
        let mut queue = PreqQueue::new(2);
        let mut preq = Preq::new(addr(9), SeqNo::new(1), 7, 31, 5000);
        for i in 0..5 {
            preq.add_target(target(10 + i), 20);
        }
        queue.push(preq);

        let sizes: Vec<usize> = queue.pending().iter().map(|p| p.targets.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(queue.pending().iter().all(|p| p.preq_id == 7));
    }

    #[test]
    fn test_preq_flush_rearms_even_when_empty() {
        let mut scheduler = ManualScheduler::new();
        let mut queue = PreqQueue::new(20);

        queue.push(Preq::new(addr(1), SeqNo::new(1), 1, 32, 5000));
        assert!(queue.schedule_flush(&mut scheduler, INTERVAL, 0));
        assert!(!queue.schedule_flush(&mut scheduler, INTERVAL, 0));

        let fired = scheduler.advance(INTERVAL);
        assert_eq!(fired, vec![TimerEvent::FlushPreq { interface: 0 }]);
        let sent = queue.flush(&mut scheduler, INTERVAL, 0);
        assert_eq!(sent.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.advance(INTERVAL);
        assert!(queue.flush(&mut scheduler, INTERVAL, 0).is_empty());
    }

    #[test]
    fn test_perr_merge_keeps_freshest() {
        let mut queue = PerrQueue::new();
        queue.enqueue(&[failed(5, 3)], &[addr(1)]);
        queue.enqueue(&[failed(5, 7)], &[addr(1)]);
        assert_eq!(queue.destinations(), &[failed(5, 7)]);

        // Staler report for the same destination is ignored
        queue.enqueue(&[failed(5, 4)], &[]);
        assert_eq!(queue.destinations(), &[failed(5, 7)]);
    }

    #[test]
    fn test_perr_merge_is_per_destination() {
        let mut queue = PerrQueue::new();
        queue.enqueue(&[failed(5, 9)], &[]);
        queue.enqueue(&[failed(6, 1)], &[]);
        assert_eq!(queue.destinations().len(), 2);
    }

    #[test]
    fn test_perr_merge_wraparound() {
        let mut queue = PerrQueue::new();
        queue.enqueue(&[failed(5, u32::MAX)], &[]);
        queue.enqueue(&[failed(5, 1)], &[]);
        assert_eq!(queue.destinations(), &[failed(5, 1)]);
    }

    #[test]
    fn test_perr_receivers_are_a_set() {
        let mut queue = PerrQueue::new();
        queue.enqueue(&[failed(5, 1)], &[addr(1), addr(2)]);
        queue.enqueue(&[failed(6, 1)], &[addr(2), addr(3)]);
        assert_eq!(queue.receivers(), &[addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_perr_flush_goes_idle() {
        let mut scheduler = ManualScheduler::new();
        let mut queue = PerrQueue::new();

        queue.enqueue(&[failed(5, 1)], &[addr(1)]);
        queue.schedule_flush(&mut scheduler, INTERVAL, 0);
        scheduler.advance(INTERVAL);

        let pending = queue.flush().unwrap();
        assert_eq!(pending.destinations, vec![failed(5, 1)]);
        assert_eq!(pending.receivers, vec![addr(1)]);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(queue.flush().is_none());
    }

    #[test]
    fn test_perr_rearms_on_next_enqueue() {
        let mut scheduler = ManualScheduler::new();
        let mut queue = PerrQueue::new();

        queue.enqueue(&[failed(5, 1)], &[addr(1)]);
        assert!(queue.schedule_flush(&mut scheduler, INTERVAL, 0));
        scheduler.advance(INTERVAL);
        queue.flush().unwrap();
        assert_eq!(scheduler.pending_count(), 0);

        queue.enqueue(&[failed(6, 1)], &[addr(1)]);
        assert!(queue.schedule_flush(&mut scheduler, INTERVAL, 0));
        assert_eq!(scheduler.pending_count(), 1);
        scheduler.advance(INTERVAL);
        assert_eq!(queue.flush().unwrap().destinations, vec![failed(6, 1)]);
    }

    #[test]
    fn test_perr_fan_out_threshold() {
        let pending = PendingPerr {
            destinations: vec![failed(5, 1)],
            receivers: vec![addr(1), addr(2)],
        };
        let (_, receivers) = pending.clone().into_receivers(3);
        assert_eq!(receivers, vec![addr(1), addr(2)]);

        let (_, receivers) = pending.into_receivers(2);
        assert_eq!(receivers, vec![MeshAddress::BROADCAST]);
    }

    #[test]
    fn test_shutdown_cancels_timers() {
        let mut scheduler = ManualScheduler::new();
        let mut preqs = PreqQueue::new(20);
        let mut perrs = PerrQueue::new();

        preqs.schedule_flush(&mut scheduler, INTERVAL, 0);
        perrs.enqueue(&[failed(5, 1)], &[addr(1)]);
        perrs.schedule_flush(&mut scheduler, INTERVAL, 0);

        preqs.shutdown(&mut scheduler);
        perrs.shutdown(&mut scheduler);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(perrs.is_empty());
    }
}
