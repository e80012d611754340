//! Path Selection Engine
//!
//! Owns the route/freshness table, duplicate filters and the per-interface
//! batching queues of one mesh node. It never touches a transport: control
//! traffic is left in an outbox of [`Outgoing`] values that the node drains
//! into the matching interface adapter after every entry point.
//!
//! PREQ target handling:
//! - target is this node: answer with a PREP, stop forwarding the target
//! - DO clear, fresher Active route known: answer with a PREP, and keep
//!   forwarding the target only when RF is set
//! - otherwise the target is forwarded unchanged

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, trace};

use hwmp_protocol::{
    FailedDestination, Frame, HwmpTag, MeshAddress, Metric, Prep, Preq, PreqTarget, SeqNo,
};

use crate::batch::{PerrQueue, PreqQueue};
use crate::config::HwmpConfig;
use crate::dedup::SequenceFilter;
use crate::error::{HwmpError, Result};
use crate::scheduler::{Scheduler, TimerEvent};
use crate::stats::ProtocolStats;
use crate::table::{Invalidated, NextHop, RouteCandidate, RouteEntry, RouteTable};

/// Arrival context of a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveContext {
    /// Neighbor that transmitted the frame
    pub from: MeshAddress,
    /// Local interface the frame arrived on
    pub interface: u32,
    /// Mesh address of the transmitting node
    pub source: MeshAddress,
    /// Link metric towards `from`
    pub metric: Metric,
}

/// Control traffic ready for an interface adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Every PREQ pending on the interface at flush time
    Preqs { interface: u32, preqs: Vec<Preq> },
    /// A reply, sent immediately as unicast
    Prep {
        interface: u32,
        receiver: MeshAddress,
        prep: Prep,
    },
    /// Failed destinations for the resolved receiver list
    Perr {
        interface: u32,
        destinations: Vec<FailedDestination>,
        receivers: Vec<MeshAddress>,
    },
}

impl Outgoing {
    pub fn interface(&self) -> u32 {
        match self {
            Outgoing::Preqs { interface, .. }
            | Outgoing::Prep { interface, .. }
            | Outgoing::Perr { interface, .. } => *interface,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TtlExpired,
    NoRoute,
}

/// Forwarding decision for a data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRoute {
    /// Addressed to this node
    Local,
    /// Tagged and ready for transmission on these interfaces
    Forward { interfaces: Vec<u32> },
    /// Broadcast: deliver here and re-flood
    LocalAndFlood { interfaces: Vec<u32> },
    /// No path yet; discovery started
    NoRoute,
    Drop(DropReason),
}

#[derive(Debug)]
struct InterfaceQueues {
    preq: PreqQueue,
    perr: PerrQueue,
}

/// HWMP path selection engine of one mesh node
#[derive(Debug)]
pub struct HwmpProtocol {
    address: MeshAddress,
    config: HwmpConfig,
    seqno: SeqNo,
    preq_id: u32,
    data_seqno: u32,
    table: RouteTable,
    preq_filter: SequenceFilter,
    broadcast_filter: SequenceFilter,
    interfaces: BTreeMap<u32, InterfaceQueues>,
    outbox: Vec<Outgoing>,
    stats: ProtocolStats,
}

impl HwmpProtocol {
    pub fn new(address: MeshAddress, config: HwmpConfig) -> Result<Self> {
        config.validate()?;

        Ok(HwmpProtocol {
            address,
            seqno: SeqNo::ZERO,
            preq_id: 0,
            data_seqno: 0,
            table: RouteTable::new(),
            preq_filter: SequenceFilter::new(config.dedup_capacity),
            broadcast_filter: SequenceFilter::new(config.dedup_capacity),
            interfaces: BTreeMap::new(),
            outbox: Vec::new(),
            stats: ProtocolStats::default(),
            config,
        })
    }

    /// Register an interface whose PREQ elements hold `preq_capacity` targets
    pub fn add_interface(&mut self, interface: u32, preq_capacity: usize) {
        self.interfaces.insert(
            interface,
            InterfaceQueues {
                preq: PreqQueue::new(preq_capacity),
                perr: PerrQueue::new(),
            },
        );
    }

    pub fn address(&self) -> MeshAddress {
        self.address
    }

    pub fn config(&self) -> &HwmpConfig {
        &self.config
    }

    /// Current own sequence number
    pub fn seqno(&self) -> SeqNo {
        self.seqno
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn route(&self, destination: &MeshAddress) -> Option<&RouteEntry> {
        self.table.get(destination)
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn interface_ids(&self) -> Vec<u32> {
        self.interfaces.keys().copied().collect()
    }

    /// PREQs waiting for the next flush on `interface`
    pub fn pending_preqs(&self, interface: u32) -> &[Preq] {
        self.interfaces
            .get(&interface)
            .map(|queues| queues.preq.pending())
            .unwrap_or(&[])
    }

    /// Failed destinations waiting for the next flush on `interface`
    pub fn pending_perrs(&self, interface: u32) -> &[FailedDestination] {
        self.interfaces
            .get(&interface)
            .map(|queues| queues.perr.destinations())
            .unwrap_or(&[])
    }

    /// Take the control traffic produced since the last call
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Start discovery of `destination` with the given sequence numbers.
    ///
    /// The target is appended to a pending PREQ of this node when one has
    /// room, otherwise a new PREQ with the next request id is queued.
    pub fn request_route(
        &mut self,
        destination: MeshAddress,
        originator_seqno: SeqNo,
        destination_seqno: SeqNo,
        scheduler: &mut dyn Scheduler,
    ) {
        if destination == self.address || destination.is_broadcast() {
            return;
        }

        self.seqno = self.seqno.freshest(originator_seqno);
        self.table.request(destination, destination_seqno);

        let target = PreqTarget::new(
            destination,
            destination_seqno,
            self.config.destination_only,
            self.config.reply_and_forward,
        );
        let interval = self.config.preq_min_interval();
        let ttl = self.config.max_ttl;
        let lifetime = self.config.lifetime_field_ms();

        let mut new_id = None;
        for (&interface, queues) in self.interfaces.iter_mut() {
            if !queues
                .preq
                .append_target(self.address, originator_seqno, target)
            {
                let preq_id = match new_id {
                    Some(id) => id,
                    None => {
                        self.preq_id = self.preq_id.wrapping_add(1);
                        new_id = Some(self.preq_id);
                        self.preq_id
                    }
                };
                let mut preq = Preq::new(self.address, originator_seqno, preq_id, ttl, lifetime);
                preq.add_target(target, queues.preq.capacity());
                queues.preq.push(preq);
            }
            queues.preq.schedule_flush(scheduler, interval, interface);
        }

        self.stats.preq_initiated += 1;
        debug!(
            destination = %destination,
            originator_seqno = %originator_seqno,
            destination_seqno = %destination_seqno,
            "Requesting route"
        );
    }

    /// Start discovery using the next own sequence number and the last known
    /// sequence number of `destination`
    pub fn discover(&mut self, destination: MeshAddress, scheduler: &mut dyn Scheduler) {
        let known = self
            .table
            .get(&destination)
            .map_or(SeqNo::ZERO, |entry| entry.seqno);
        let seqno = self.seqno.next();
        self.request_route(destination, seqno, known, scheduler);
    }

    /// Process a PREQ whose TTL the adapter already checked and decremented
    pub fn receive_preq(
        &mut self,
        mut preq: Preq,
        ctx: &ReceiveContext,
        scheduler: &mut dyn Scheduler,
    ) {
        if !self.preq_filter.observe(preq.originator, preq.preq_id) {
            self.stats.duplicate_preq += 1;
            trace!(
                originator = %preq.originator,
                preq_id = preq.preq_id,
                "Duplicate PREQ dropped"
            );
            return;
        }

        preq.hop_count = preq.hop_count.saturating_add(1);
        preq.metric = preq.metric.saturating_add(ctx.metric);

        let reverse = RouteCandidate {
            destination: preq.originator,
            seqno: preq.originator_seqno,
            next_hop: NextHop {
                address: ctx.from,
                interface: ctx.interface,
            },
            metric: preq.metric,
            hop_count: preq.hop_count,
            lifetime: Duration::from_millis(preq.lifetime_ms as u64),
        };
        if !self.update_route(reverse, scheduler) {
            self.stats.stale += 1;
        }

        let max_ttl = self.config.max_ttl;
        let lifetime = self.config.lifetime_field_ms();
        let mut forward = Vec::with_capacity(preq.targets.len());

        for target in std::mem::take(&mut preq.targets) {
            if target.address == self.address {
                self.seqno = self.seqno.freshest(target.seqno).next();
                let prep = Prep {
                    hop_count: 0,
                    ttl: max_ttl,
                    destination: self.address,
                    destination_seqno: self.seqno,
                    lifetime_ms: preq.lifetime_ms,
                    metric: 0,
                    originator: preq.originator,
                    originator_seqno: preq.originator_seqno,
                };
                self.send_prep(ctx, prep);
                continue;
            }

            if !target.destination_only() {
                let reply = self
                    .table
                    .active(&target.address)
                    .filter(|route| route.seqno.is_fresher_than(target.seqno))
                    .map(|route| Prep {
                        hop_count: route.hop_count,
                        ttl: max_ttl,
                        destination: target.address,
                        destination_seqno: route.seqno,
                        lifetime_ms: lifetime,
                        metric: route.metric,
                        originator: preq.originator,
                        originator_seqno: preq.originator_seqno,
                    });

                if let Some(prep) = reply {
                    self.table
                        .add_precursor(&target.address, ctx.interface, ctx.from);
                    self.send_prep(ctx, prep);
                    if !target.reply_and_forward() {
                        continue;
                    }
                }
            }

            forward.push(target);
        }

        if forward.is_empty() {
            return;
        }
        if preq.ttl == 0 {
            self.stats.ttl_dropped += 1;
            trace!(originator = %preq.originator, "PREQ TTL exhausted, not forwarded");
            return;
        }

        preq.targets = forward;
        let interval = self.config.preq_min_interval();
        for (&interface, queues) in self.interfaces.iter_mut() {
            queues.preq.push(preq.clone());
            queues.preq.schedule_flush(scheduler, interval, interface);
        }
        self.stats.preq_forwarded += 1;
    }

    /// Process a PREP whose TTL the adapter already checked and decremented
    pub fn receive_prep(
        &mut self,
        mut prep: Prep,
        ctx: &ReceiveContext,
        scheduler: &mut dyn Scheduler,
    ) {
        prep.hop_count = prep.hop_count.saturating_add(1);
        prep.metric = prep.metric.saturating_add(ctx.metric);

        let candidate = RouteCandidate {
            destination: prep.destination,
            seqno: prep.destination_seqno,
            next_hop: NextHop {
                address: ctx.from,
                interface: ctx.interface,
            },
            metric: prep.metric,
            hop_count: prep.hop_count,
            lifetime: Duration::from_millis(prep.lifetime_ms as u64),
        };
        if !self.update_route(candidate, scheduler) {
            self.stats.stale += 1;
            trace!(
                destination = %prep.destination,
                seqno = %prep.destination_seqno,
                "Stale PREP ignored"
            );
            return;
        }

        if prep.originator == self.address {
            info!(
                destination = %prep.destination,
                hops = prep.hop_count,
                metric = prep.metric,
                "Path resolved"
            );
            return;
        }

        let Some(reverse) = self.table.next_hop(&prep.originator) else {
            self.stats.no_route += 1;
            debug!(originator = %prep.originator, "No reverse path for PREP");
            return;
        };
        if prep.ttl == 0 {
            self.stats.ttl_dropped += 1;
            return;
        }

        self.table
            .add_precursor(&prep.destination, reverse.interface, reverse.address);
        self.table
            .add_precursor(&prep.originator, ctx.interface, ctx.from);

        self.stats.prep_forwarded += 1;
        self.outbox.push(Outgoing::Prep {
            interface: reverse.interface,
            receiver: reverse.address,
            prep,
        });
    }

    /// Invalidate routes reported broken and pass the error on to their
    /// precursors. Only the route's own next hop can break it.
    pub fn receive_perr(
        &mut self,
        destinations: Vec<FailedDestination>,
        ctx: &ReceiveContext,
        scheduler: &mut dyn Scheduler,
    ) {
        let mut invalidated = Vec::new();
        let sender = NextHop {
            address: ctx.from,
            interface: ctx.interface,
        };

        for failed in destinations {
            match self.table.active(&failed.destination) {
                None => continue,
                Some(route) if route.next_hop != Some(sender) => {
                    trace!(
                        destination = %failed.destination,
                        from = %ctx.from,
                        "PERR from a neighbor that is not the next hop"
                    );
                    continue;
                }
                Some(route) if route.seqno.is_fresher_than(failed.seqno) => {
                    self.stats.stale += 1;
                    trace!(
                        destination = %failed.destination,
                        reported = %failed.seqno,
                        stored = %route.seqno,
                        "Stale PERR entry ignored"
                    );
                    continue;
                }
                Some(_) => {}
            }

            if let Some(gone) = self.table.invalidate(&failed.destination, failed.seqno) {
                if let Some(handle) = gone.expiry {
                    scheduler.cancel(handle);
                }
                invalidated.push(gone);
            }
        }

        if invalidated.is_empty() {
            return;
        }
        debug!(
            from = %ctx.from,
            count = invalidated.len(),
            "Paths invalidated by PERR"
        );
        self.stats.perr_forwarded += self.enqueue_perrs(&invalidated, scheduler);
    }

    /// A peer link went down: every Active route through it breaks
    pub fn on_link_failure(
        &mut self,
        interface: u32,
        neighbor: MeshAddress,
        scheduler: &mut dyn Scheduler,
    ) {
        let hop = NextHop {
            address: neighbor,
            interface,
        };

        let mut invalidated = Vec::new();
        for destination in self.table.via(hop) {
            let Some(seqno) = self.table.get(&destination).map(|entry| entry.seqno.next()) else {
                continue;
            };
            if let Some(gone) = self.table.invalidate(&destination, seqno) {
                if let Some(handle) = gone.expiry {
                    scheduler.cancel(handle);
                }
                invalidated.push(gone);
            }
        }

        if invalidated.is_empty() {
            return;
        }
        info!(
            neighbor = %neighbor,
            interface,
            count = invalidated.len(),
            "Link failure invalidated paths"
        );
        self.stats.perr_initiated += self.enqueue_perrs(&invalidated, scheduler);
    }

    /// Handle a fired timer
    pub fn on_timer(&mut self, event: TimerEvent, scheduler: &mut dyn Scheduler) {
        match event {
            TimerEvent::FlushPreq { interface } => self.flush_preqs(interface, scheduler),
            TimerEvent::FlushPerr { interface } => self.flush_perrs(interface),
            TimerEvent::PathExpired { destination } => {
                if self.table.expire(&destination, scheduler.now()) {
                    self.stats.paths_expired += 1;
                    debug!(destination = %destination, "Path expired");
                }
            }
        }
    }

    /// Whether a broadcast data frame with `seq` from `originator` was
    /// already seen; records it otherwise
    pub fn drop_data_frame(&mut self, seq: u32, originator: MeshAddress) -> bool {
        let duplicate = !self.broadcast_filter.observe(originator, seq);
        if duplicate {
            self.stats.broadcast_duplicates += 1;
            trace!(originator = %originator, seq, "Duplicate broadcast dropped");
        }
        duplicate
    }

    /// Tag a locally sourced data frame for transmission
    pub fn route_outgoing(&mut self, frame: &mut Frame, scheduler: &mut dyn Scheduler) -> DataRoute {
        let destination = frame.destination();
        if destination == self.address {
            self.stats.data_delivered += 1;
            return DataRoute::Local;
        }

        if destination.is_broadcast() {
            let seqno = self.next_data_seqno();
            self.broadcast_filter.observe(self.address, seqno);
            frame.tag = Some(HwmpTag {
                next_hop: MeshAddress::BROADCAST,
                ttl: self.config.max_ttl,
                seqno,
            });
            self.stats.data_initiated += 1;
            return DataRoute::Forward {
                interfaces: self.interface_ids(),
            };
        }

        let Some(next_hop) = self.table.next_hop(&destination) else {
            self.stats.no_route += 1;
            self.discover(destination, scheduler);
            return DataRoute::NoRoute;
        };

        let seqno = self.next_data_seqno();
        frame.tag = Some(HwmpTag {
            next_hop: next_hop.address,
            ttl: self.config.max_ttl,
            seqno,
        });
        self.stats.data_initiated += 1;
        DataRoute::Forward {
            interfaces: vec![next_hop.interface],
        }
    }

    /// Decide what happens to a data frame accepted by the adapter
    pub fn route_received(&mut self, frame: &mut Frame, interface: u32) -> Result<DataRoute> {
        let destination = frame.destination();
        let previous_hop = frame.header.transmitter();
        let tag = frame.tag.as_mut().ok_or(HwmpError::MissingTag)?;

        if destination.is_broadcast() {
            self.stats.data_delivered += 1;
            if tag.ttl <= 1 {
                return Ok(DataRoute::Local);
            }
            tag.ttl -= 1;
            tag.next_hop = MeshAddress::BROADCAST;
            self.stats.data_forwarded += 1;
            return Ok(DataRoute::LocalAndFlood {
                interfaces: self.interface_ids(),
            });
        }

        if destination == self.address {
            self.stats.data_delivered += 1;
            return Ok(DataRoute::Local);
        }

        if tag.ttl <= 1 {
            self.stats.ttl_dropped += 1;
            self.stats.data_dropped += 1;
            return Ok(DataRoute::Drop(DropReason::TtlExpired));
        }

        let Some(next_hop) = self.table.next_hop(&destination) else {
            self.stats.no_route += 1;
            self.stats.data_dropped += 1;
            debug!(destination = %destination, "No path for relayed data frame");
            return Ok(DataRoute::Drop(DropReason::NoRoute));
        };

        tag.ttl -= 1;
        tag.next_hop = next_hop.address;
        self.table.add_precursor(&destination, interface, previous_hop);
        self.stats.data_forwarded += 1;
        Ok(DataRoute::Forward {
            interfaces: vec![next_hop.interface],
        })
    }

    /// Cancel every outstanding timer and drop pending control traffic
    pub fn shutdown(&mut self, scheduler: &mut dyn Scheduler) {
        for queues in self.interfaces.values_mut() {
            queues.preq.shutdown(scheduler);
            queues.perr.shutdown(scheduler);
        }
        for handle in self.table.take_expiry_timers() {
            scheduler.cancel(handle);
        }
        self.outbox.clear();
    }

    fn next_data_seqno(&mut self) -> u32 {
        self.data_seqno = self.data_seqno.wrapping_add(1);
        self.data_seqno
    }

    fn send_prep(&mut self, ctx: &ReceiveContext, prep: Prep) {
        trace!(
            destination = %prep.destination,
            originator = %prep.originator,
            receiver = %ctx.from,
            "Originating PREP"
        );
        self.stats.prep_initiated += 1;
        self.outbox.push(Outgoing::Prep {
            interface: ctx.interface,
            receiver: ctx.from,
            prep,
        });
    }

    /// Install fresher information and (re)arm the path lifetime timer
    fn update_route(&mut self, candidate: RouteCandidate, scheduler: &mut dyn Scheduler) -> bool {
        if candidate.destination == self.address {
            return false;
        }

        let Some(entry) = self.table.update(candidate, scheduler.now()) else {
            return false;
        };
        if let Some(old) = entry.expiry.take() {
            scheduler.cancel(old);
        }
        entry.expiry = Some(scheduler.schedule(
            candidate.lifetime,
            TimerEvent::PathExpired {
                destination: candidate.destination,
            },
        ));

        trace!(
            destination = %candidate.destination,
            seqno = %candidate.seqno,
            next_hop = %candidate.next_hop.address,
            metric = candidate.metric,
            "Path updated"
        );
        true
    }

    /// Queue PERRs for the precursors of invalidated routes, grouped per
    /// interface. Returns the number of interfaces that got work.
    fn enqueue_perrs(&mut self, invalidated: &[Invalidated], scheduler: &mut dyn Scheduler) -> u64 {
        let mut per_interface: BTreeMap<u32, (Vec<FailedDestination>, Vec<MeshAddress>)> =
            BTreeMap::new();

        for gone in invalidated {
            for &(interface, neighbor) in &gone.precursors {
                let (destinations, receivers) = per_interface.entry(interface).or_default();
                if !destinations.iter().any(|d| d.destination == gone.destination) {
                    destinations.push(FailedDestination::new(gone.destination, gone.seqno));
                }
                receivers.push(neighbor);
            }
        }

        let interval = self.config.perr_min_interval();
        let mut queued = 0;
        for (interface, (destinations, receivers)) in per_interface {
            let Some(queues) = self.interfaces.get_mut(&interface) else {
                continue;
            };
            queues.perr.enqueue(&destinations, &receivers);
            queues.perr.schedule_flush(scheduler, interval, interface);
            queued += 1;
        }
        queued
    }

    fn flush_preqs(&mut self, interface: u32, scheduler: &mut dyn Scheduler) {
        let interval = self.config.preq_min_interval();
        let Some(queues) = self.interfaces.get_mut(&interface) else {
            return;
        };

        let preqs = queues.preq.flush(scheduler, interval, interface);
        if preqs.is_empty() {
            return;
        }
        trace!(interface, count = preqs.len(), "Flushing PREQs");
        self.outbox.push(Outgoing::Preqs { interface, preqs });
    }

    fn flush_perrs(&mut self, interface: u32) {
        let threshold = self.config.unicast_perr_threshold;
        let Some(queues) = self.interfaces.get_mut(&interface) else {
            return;
        };

        let Some(pending) = queues.perr.flush() else {
            return;
        };
        let (destinations, receivers) = pending.into_receivers(threshold);
        if receivers.is_empty() {
            return;
        }
        trace!(
            interface,
            destinations = destinations.len(),
            receivers = receivers.len(),
            "Flushing PERRs"
        );
        self.outbox.push(Outgoing::Perr {
            interface,
            destinations,
            receivers,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PathState;
    use crate::testing::ManualScheduler;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn addr(index: u32) -> MeshAddress {
        MeshAddress::from_index(index)
    }

    fn engine(index: u32) -> HwmpProtocol {
        let mut engine = HwmpProtocol::new(addr(index), HwmpConfig::default()).unwrap();
        engine.add_interface(0, 20);
        engine
    }

    fn ctx(from: u32) -> ReceiveContext {
        ReceiveContext {
            from: addr(from),
            interface: 0,
            source: addr(from),
            metric: 10,
        }
    }

    fn preq_for(originator: u32, preq_id: u32, target: PreqTarget) -> Preq {
        let mut preq = Preq::new(addr(originator), SeqNo::new(1), preq_id, 31, 5000);
        preq.add_target(target, 20);
        preq
    }

    /// Install an Active route to `destination` via neighbor `via`
    fn learn_route(
        engine: &mut HwmpProtocol,
        scheduler: &mut ManualScheduler,
        destination: u32,
        seqno: u32,
        via: u32,
    ) {
        let prep = Prep {
            hop_count: 0,
            ttl: 30,
            destination: addr(destination),
            destination_seqno: SeqNo::new(seqno),
            lifetime_ms: 5000,
            metric: 0,
            originator: engine.address(),
            originator_seqno: SeqNo::new(1),
        };
        engine.receive_prep(prep, &ctx(via), scheduler);
        engine.drain_outbox();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HwmpConfig {
            max_ttl: 0,
            ..Default::default()
        };
        assert!(HwmpProtocol::new(addr(1), config).is_err());
    }

    #[test]
    fn test_request_route_batches_targets() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        engine.request_route(addr(5), SeqNo::new(1), SeqNo::ZERO, &mut scheduler);
        engine.request_route(addr(6), SeqNo::new(2), SeqNo::ZERO, &mut scheduler);

        let pending = engine.pending_preqs(0);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].targets.len(), 2);
        assert_eq!(pending[0].preq_id, 1);
        assert_eq!(pending[0].originator_seqno, SeqNo::new(2));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(engine.route(&addr(5)).unwrap().state, PathState::Requesting);
    }

    #[test]
    fn test_request_route_ignores_self_and_broadcast() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        engine.request_route(addr(1), SeqNo::new(1), SeqNo::ZERO, &mut scheduler);
        engine.request_route(MeshAddress::BROADCAST, SeqNo::new(1), SeqNo::ZERO, &mut scheduler);
        assert!(engine.pending_preqs(0).is_empty());
        assert_eq!(engine.stats().preq_initiated, 0);
    }

    #[test]
    fn test_discover_draws_own_seqno() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        engine.discover(addr(5), &mut scheduler);
        engine.discover(addr(6), &mut scheduler);
        assert_eq!(engine.seqno(), SeqNo::new(2));
    }

    #[test]
    fn test_flush_emits_outgoing_preqs() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        engine.discover(addr(5), &mut scheduler);
        for event in scheduler.advance(INTERVAL) {
            engine.on_timer(event, &mut scheduler);
        }

        let outbox = engine.drain_outbox();
        assert_eq!(outbox.len(), 1);
        match &outbox[0] {
            Outgoing::Preqs { interface, preqs } => {
                assert_eq!(*interface, 0);
                assert_eq!(preqs[0].targets[0].address, addr(5));
                assert_eq!(preqs[0].ttl, 32);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.pending_preqs(0).is_empty());
    }

    #[test]
    fn test_destination_answers_preq() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(3);

        let preq = preq_for(1, 1, PreqTarget::new(addr(3), SeqNo::new(7), false, true));
        engine.receive_preq(preq, &ctx(2), &mut scheduler);

        let outbox = engine.drain_outbox();
        assert_eq!(outbox.len(), 1);
        match &outbox[0] {
            Outgoing::Prep {
                receiver, prep, ..
            } => {
                assert_eq!(*receiver, addr(2));
                assert_eq!(prep.destination, addr(3));
                assert_eq!(prep.destination_seqno, SeqNo::new(8));
                assert_eq!(prep.originator, addr(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        // Answered targets are not forwarded
        assert!(engine.pending_preqs(0).is_empty());

        let reverse = engine.route(&addr(1)).unwrap();
        assert_eq!(reverse.next_hop.unwrap().address, addr(2));
        assert_eq!(reverse.hop_count, 1);
        assert_eq!(reverse.metric, 10);
    }

    #[test]
    fn test_duplicate_preq_ignored() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(3);
        let target = PreqTarget::new(addr(9), SeqNo::ZERO, false, true);

        engine.receive_preq(preq_for(1, 4, target), &ctx(2), &mut scheduler);
        engine.receive_preq(preq_for(1, 4, target), &ctx(5), &mut scheduler);
        engine.receive_preq(preq_for(1, 3, target), &ctx(5), &mut scheduler);

        assert_eq!(engine.stats().duplicate_preq, 2);
        assert_eq!(engine.pending_preqs(0).len(), 1);
    }

    #[test]
    fn test_intermediate_forwards_unknown_target() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);

        let mut preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::ZERO, false, true));
        preq.ttl = 20;
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        let pending = engine.pending_preqs(0);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ttl, 20);
        assert_eq!(pending[0].hop_count, 1);
        assert_eq!(pending[0].metric, 10);
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_ttl_zero_preq_not_forwarded() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);

        let mut preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::ZERO, false, true));
        preq.ttl = 0;
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        assert!(engine.pending_preqs(0).is_empty());
        assert_eq!(engine.stats().ttl_dropped, 1);
    }

    #[test]
    fn test_reply_and_forward() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::new(3), false, true));
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        let outbox = engine.drain_outbox();
        assert!(matches!(
            &outbox[..],
            [Outgoing::Prep { prep, .. }] if prep.destination_seqno == SeqNo::new(5)
        ));
        assert_eq!(engine.pending_preqs(0).len(), 1);
        let forwarded = engine.pending_preqs(0)[0].targets[0];
        assert!(!forwarded.destination_only());
        assert!(forwarded.reply_and_forward());
    }

    #[test]
    fn test_reply_without_forward() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::new(3), false, false));
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        assert_eq!(engine.drain_outbox().len(), 1);
        assert!(engine.pending_preqs(0).is_empty());
    }

    #[test]
    fn test_destination_only_suppresses_intermediate_reply() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::new(3), true, true));
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.pending_preqs(0).len(), 1);
    }

    #[test]
    fn test_no_reply_when_route_not_fresher() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let preq = preq_for(1, 1, PreqTarget::new(addr(9), SeqNo::new(5), false, true));
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.pending_preqs(0).len(), 1);
    }

    #[test]
    fn test_prep_forwarded_along_reverse_path() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);

        // Reverse path to originator 1 via neighbor 1
        let preq = preq_for(1, 1, PreqTarget::new(addr(3), SeqNo::ZERO, false, true));
        engine.receive_preq(preq, &ctx(1), &mut scheduler);

        let prep = Prep {
            hop_count: 0,
            ttl: 31,
            destination: addr(3),
            destination_seqno: SeqNo::new(1),
            lifetime_ms: 5000,
            metric: 0,
            originator: addr(1),
            originator_seqno: SeqNo::new(1),
        };
        engine.receive_prep(prep, &ctx(3), &mut scheduler);

        let outbox = engine.drain_outbox();
        match &outbox[..] {
            [Outgoing::Prep { receiver, prep, .. }] => {
                assert_eq!(*receiver, addr(1));
                assert_eq!(prep.hop_count, 1);
                assert_eq!(prep.ttl, 31);
            }
            other => panic!("unexpected {:?}", other),
        }

        let forward = engine.route(&addr(3)).unwrap();
        assert!(forward.is_active());
        assert_eq!(forward.precursors().collect::<Vec<_>>(), vec![(0, addr(1))]);
        assert_eq!(engine.stats().prep_forwarded, 1);
    }

    #[test]
    fn test_prep_without_reverse_path() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);

        let prep = Prep {
            hop_count: 0,
            ttl: 31,
            destination: addr(3),
            destination_seqno: SeqNo::new(1),
            lifetime_ms: 5000,
            metric: 0,
            originator: addr(1),
            originator_seqno: SeqNo::new(1),
        };
        engine.receive_prep(prep, &ctx(3), &mut scheduler);

        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.stats().no_route, 1);
        // The forward path is still learned
        assert!(engine.route(&addr(3)).unwrap().is_active());
    }

    #[test]
    fn test_stale_prep_changes_nothing() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        learn_route(&mut engine, &mut scheduler, 9, 4, 6);

        let route = engine.route(&addr(9)).unwrap();
        assert_eq!(route.next_hop.unwrap().address, addr(4));
        assert_eq!(route.seqno, SeqNo::new(5));
        assert_eq!(engine.stats().stale, 1);
    }

    #[test]
    fn test_perr_invalidates_and_reoriginates() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        engine.table.add_precursor(&addr(9), 0, addr(1));

        engine.receive_perr(
            vec![FailedDestination::new(addr(9), SeqNo::new(5))],
            &ctx(4),
            &mut scheduler,
        );

        assert_eq!(engine.route(&addr(9)).unwrap().state, PathState::Invalid);
        assert_eq!(
            engine.pending_perrs(0),
            &[FailedDestination::new(addr(9), SeqNo::new(5))]
        );
    }

    #[test]
    fn test_stale_perr_ignored() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        engine.table.add_precursor(&addr(9), 0, addr(1));

        engine.receive_perr(
            vec![FailedDestination::new(addr(9), SeqNo::new(3))],
            &ctx(4),
            &mut scheduler,
        );

        assert!(engine.route(&addr(9)).unwrap().is_active());
        assert!(engine.pending_perrs(0).is_empty());
    }

    #[test]
    fn test_perr_from_other_neighbor_ignored() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        engine.table.add_precursor(&addr(9), 0, addr(1));

        engine.receive_perr(
            vec![FailedDestination::new(addr(9), SeqNo::new(6))],
            &ctx(7),
            &mut scheduler,
        );

        let route = engine.route(&addr(9)).unwrap();
        assert!(route.is_active());
        assert_eq!(route.next_hop.unwrap().address, addr(4));
        assert!(engine.pending_perrs(0).is_empty());
    }

    #[test]
    fn test_link_failures_within_one_interval_share_a_flush() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        learn_route(&mut engine, &mut scheduler, 8, 3, 6);
        engine.table.add_precursor(&addr(9), 0, addr(1));
        engine.table.add_precursor(&addr(8), 0, addr(1));

        engine.on_link_failure(0, addr(4), &mut scheduler);
        for event in scheduler.advance(Duration::from_millis(30)) {
            engine.on_timer(event, &mut scheduler);
        }
        engine.on_link_failure(0, addr(6), &mut scheduler);
        assert!(engine.drain_outbox().is_empty());

        // The second failure does not move the deadline
        for event in scheduler.advance(Duration::from_millis(70)) {
            engine.on_timer(event, &mut scheduler);
        }
        let outbox = engine.drain_outbox();
        assert_eq!(outbox.len(), 1);
        match &outbox[0] {
            Outgoing::Perr {
                destinations,
                receivers,
                ..
            } => {
                assert_eq!(
                    destinations,
                    &vec![
                        FailedDestination::new(addr(9), SeqNo::new(6)),
                        FailedDestination::new(addr(8), SeqNo::new(4)),
                    ]
                );
                assert_eq!(receivers, &vec![addr(1)]);
            }
            other => panic!("expected a PERR, got {:?}", other),
        }

        for event in scheduler.advance(INTERVAL) {
            engine.on_timer(event, &mut scheduler);
        }
        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.stats().perr_initiated, 2);
    }

    #[test]
    fn test_link_failure_bumps_seqno() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        engine.table.add_precursor(&addr(9), 0, addr(1));

        engine.on_link_failure(0, addr(4), &mut scheduler);

        let route = engine.route(&addr(9)).unwrap();
        assert_eq!(route.state, PathState::Invalid);
        assert_eq!(route.seqno, SeqNo::new(6));
        assert_eq!(
            engine.pending_perrs(0),
            &[FailedDestination::new(addr(9), SeqNo::new(6))]
        );
        assert_eq!(engine.stats().perr_initiated, 1);

        for event in scheduler.advance(INTERVAL) {
            engine.on_timer(event, &mut scheduler);
        }
        let outbox = engine.drain_outbox();
        assert!(matches!(
            &outbox[..],
            [Outgoing::Perr { receivers, .. }] if receivers == &vec![addr(1)]
        ));
    }

    #[test]
    fn test_path_expiry() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        for event in scheduler.advance(Duration::from_millis(4999)) {
            engine.on_timer(event, &mut scheduler);
        }
        assert!(engine.route(&addr(9)).unwrap().is_active());

        for event in scheduler.advance(Duration::from_millis(1)) {
            engine.on_timer(event, &mut scheduler);
        }
        assert_eq!(engine.route(&addr(9)).unwrap().state, PathState::Invalid);
        assert_eq!(engine.stats().paths_expired, 1);
    }

    #[test]
    fn test_refresh_replaces_expiry_timer() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        learn_route(&mut engine, &mut scheduler, 9, 6, 4);

        let expiries = scheduler
            .pending_events()
            .into_iter()
            .filter(|e| matches!(e, TimerEvent::PathExpired { .. }))
            .count();
        assert_eq!(expiries, 1);
    }

    #[test]
    fn test_drop_data_frame() {
        let mut engine = engine(1);
        assert!(!engine.drop_data_frame(10, addr(7)));
        assert!(engine.drop_data_frame(10, addr(7)));
        assert!(engine.drop_data_frame(9, addr(7)));
        assert!(!engine.drop_data_frame(11, addr(7)));
        assert_eq!(engine.stats().broadcast_duplicates, 2);
    }

    #[test]
    fn test_route_outgoing_without_path_discovers() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        let mut frame = Frame::data(addr(1), addr(9), vec![1, 2, 3]);
        assert_eq!(engine.route_outgoing(&mut frame, &mut scheduler), DataRoute::NoRoute);
        assert!(frame.tag.is_none());
        assert_eq!(engine.pending_preqs(0).len(), 1);
    }

    #[test]
    fn test_route_outgoing_tags_frame() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let mut frame = Frame::data(addr(1), addr(9), vec![1, 2, 3]);
        assert_eq!(
            engine.route_outgoing(&mut frame, &mut scheduler),
            DataRoute::Forward { interfaces: vec![0] }
        );
        let tag = frame.tag.unwrap();
        assert_eq!(tag.next_hop, addr(4));
        assert_eq!(tag.ttl, 32);
        assert_eq!(tag.seqno, 1);
    }

    #[test]
    fn test_own_broadcast_is_recorded() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(1);

        let mut frame = Frame::data(addr(1), MeshAddress::BROADCAST, vec![0]);
        engine.route_outgoing(&mut frame, &mut scheduler);
        let seqno = frame.tag.unwrap().seqno;

        // Our own broadcast echoed back by a neighbor is a duplicate
        assert!(engine.drop_data_frame(seqno, addr(1)));
    }

    #[test]
    fn test_route_received_relays_and_tracks_precursor() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);

        let mut frame = Frame::data(addr(1), addr(9), vec![7]);
        frame.header.addr2 = addr(1);
        frame.tag = Some(HwmpTag {
            next_hop: addr(2),
            ttl: 5,
            seqno: 1,
        });

        let route = engine.route_received(&mut frame, 0).unwrap();
        assert_eq!(route, DataRoute::Forward { interfaces: vec![0] });
        let tag = frame.tag.unwrap();
        assert_eq!(tag.ttl, 4);
        assert_eq!(tag.next_hop, addr(4));
        assert_eq!(
            engine.route(&addr(9)).unwrap().precursors().collect::<Vec<_>>(),
            vec![(0, addr(1))]
        );
    }

    #[test]
    fn test_route_received_ttl_exhausted() {
        let mut engine = engine(2);
        let mut frame = Frame::data(addr(1), addr(9), vec![7]);
        frame.tag = Some(HwmpTag {
            next_hop: addr(2),
            ttl: 1,
            seqno: 1,
        });

        assert_eq!(
            engine.route_received(&mut frame, 0).unwrap(),
            DataRoute::Drop(DropReason::TtlExpired)
        );
    }

    #[test]
    fn test_route_received_requires_tag() {
        let mut engine = engine(2);
        let mut frame = Frame::data(addr(1), addr(9), vec![7]);
        assert_eq!(engine.route_received(&mut frame, 0), Err(HwmpError::MissingTag));
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut scheduler = ManualScheduler::new();
        let mut engine = engine(2);
        learn_route(&mut engine, &mut scheduler, 9, 5, 4);
        engine.discover(addr(8), &mut scheduler);
        assert!(scheduler.pending_count() >= 2);

        engine.shutdown(&mut scheduler);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(engine.pending_preqs(0).is_empty());
    }
}
