//! Discrete event simulator for HWMP meshes.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use hwmp_protocol::{Frame, MeshAddress, Metric};
use hwmp_routing::{
    DataRoute, MeshPoint, ProtocolStats, Scheduler, TimerEvent, TimerHandle,
};

use crate::event::{Event, EventQueue};
use crate::scenario::ScenarioConfig;
use crate::transport::SimTransport;

/// Every node runs a single interface
const INTERFACE: u32 = 0;

/// Medium counters of a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    /// Unicast frames whose receiver is not a current neighbor
    pub frames_unroutable: u64,
    pub timers_fired: u64,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    metric: Metric,
    loss: f64,
}

/// Scheduler seam of one node, backed by the shared event queue
struct NodeScheduler<'a> {
    queue: &'a mut EventQueue,
    node: usize,
    now: Duration,
}

impl Scheduler for NodeScheduler<'_> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.queue.schedule_timer(self.now + delay, self.node, event)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel_timer(handle);
    }

    fn is_pending(&self, handle: TimerHandle) -> bool {
        self.queue.is_timer_live(handle)
    }
}

/// Discrete event simulator for HWMP networks.
pub struct Simulator {
    nodes: Vec<MeshPoint<SimTransport>>,
    /// Keyed by `(lower index, higher index)`
    links: BTreeMap<(usize, usize), Link>,
    queue: EventQueue,
    now: Duration,
    link_delay: Duration,
    rng: StdRng,
    stats: SimStats,
}

fn link_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl Simulator {
    /// Build the nodes and links described by `scenario`
    pub fn from_scenario(scenario: &ScenarioConfig) -> Result<Self> {
        scenario.validate()?;

        let mut nodes = Vec::with_capacity(scenario.nodes);
        for index in 0..scenario.nodes {
            let address = Self::address_of(index);
            let mut node = MeshPoint::new(address, scenario.hwmp.clone())
                .with_context(|| format!("Failed to create node {}", index))?;
            node.add_interface(SimTransport::new(address, scenario.channel));
            nodes.push(node);
        }

        let mut sim = Simulator {
            nodes,
            links: BTreeMap::new(),
            queue: EventQueue::new(),
            now: Duration::ZERO,
            link_delay: Duration::from_millis(scenario.link_delay_ms),
            rng: StdRng::seed_from_u64(scenario.seed),
            stats: SimStats::default(),
        };
        for link in &scenario.links {
            sim.add_link(link.a, link.b, link.metric, link.loss)?;
        }

        info!(
            nodes = scenario.nodes,
            links = scenario.links.len(),
            seed = scenario.seed,
            "Simulation created"
        );
        Ok(sim)
    }

    /// Mesh address of the node at `index`
    pub fn address_of(index: usize) -> MeshAddress {
        MeshAddress::from_index(index as u32 + 1)
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> Option<&MeshPoint<SimTransport>> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut MeshPoint<SimTransport>> {
        self.nodes.get_mut(index)
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Protocol counters summed over all nodes
    pub fn protocol_stats(&self) -> ProtocolStats {
        let mut total = ProtocolStats::default();
        for node in &self.nodes {
            total.accumulate(node.protocol().stats());
        }
        total
    }

    pub fn report(&self) -> String {
        self.nodes
            .iter()
            .map(|node| node.report())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn neighbors(&self, index: usize) -> Vec<usize> {
        self.links
            .keys()
            .filter_map(|&(a, b)| match (a == index, b == index) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Connect two nodes; both learn each other as peers
    pub fn add_link(&mut self, a: usize, b: usize, metric: Metric, loss: f64) -> Result<()> {
        self.check_index(a)?;
        self.check_index(b)?;

        self.links.insert(link_key(a, b), Link { metric, loss });
        let (address_a, address_b) = (Self::address_of(a), Self::address_of(b));
        self.transport_mut(a)?.set_peer(address_b, metric);
        self.transport_mut(b)?.set_peer(address_a, metric);
        Ok(())
    }

    /// Tear a link down and report the failure to both ends
    pub fn break_link(&mut self, a: usize, b: usize) -> Result<()> {
        if self.links.remove(&link_key(a, b)).is_none() {
            return Err(anyhow!("no link between {} and {}", a, b));
        }
        debug!(a, b, "Link broken");

        for (node, peer) in [(a, b), (b, a)] {
            let peer_address = Self::address_of(peer);
            self.transport_mut(node)?.remove_peer(&peer_address);

            let mut scheduler = NodeScheduler {
                queue: &mut self.queue,
                node,
                now: self.now,
            };
            self.nodes[node]
                .link_failure(INTERFACE, peer_address, &mut scheduler)
                .with_context(|| format!("Node {} failed handling link loss", node))?;
            self.collect_outgoing(node)?;
        }
        Ok(())
    }

    /// Start discovery of node `to` at node `from`
    pub fn discover(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;

        let mut scheduler = NodeScheduler {
            queue: &mut self.queue,
            node: from,
            now: self.now,
        };
        self.nodes[from]
            .discover(Self::address_of(to), &mut scheduler)
            .with_context(|| format!("Node {} failed to start discovery", from))?;
        self.collect_outgoing(from)
    }

    /// Send application data from node `from`
    pub fn send_data(
        &mut self,
        from: usize,
        destination: MeshAddress,
        payload: Vec<u8>,
    ) -> Result<DataRoute> {
        self.check_index(from)?;

        let mut scheduler = NodeScheduler {
            queue: &mut self.queue,
            node: from,
            now: self.now,
        };
        let route = self.nodes[from]
            .send(destination, payload, &mut scheduler)
            .with_context(|| format!("Node {} failed to send data", from))?;
        self.collect_outgoing(from)?;
        Ok(route)
    }

    /// Process every event due at or before `end`
    pub fn run_until(&mut self, end: Duration) -> Result<()> {
        while let Some(scheduled) = self.queue.pop_due(end) {
            if scheduled.time > self.now {
                self.now = scheduled.time;
            }
            self.process_event(scheduled.event)?;
        }
        if end > self.now {
            self.now = end;
        }
        Ok(())
    }

    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        self.run_until(self.now + duration)
    }

    /// Cancel every protocol timer; the queue then drains
    pub fn shutdown(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let mut scheduler = NodeScheduler {
                queue: &mut self.queue,
                node: index,
                now: self.now,
            };
            node.shutdown(&mut scheduler);
        }
    }

    /// Live protocol timers across all nodes
    pub fn pending_timers(&self) -> usize {
        self.queue.live_timer_count()
    }

    fn process_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::FrameDelivery { to, from, frame } => {
                // The link may have broken while the frame was in flight
                if !self.links.contains_key(&link_key(to, from)) {
                    self.stats.frames_lost += 1;
                    return Ok(());
                }
                self.stats.frames_delivered += 1;

                let mut scheduler = NodeScheduler {
                    queue: &mut self.queue,
                    node: to,
                    now: self.now,
                };
                self.nodes[to]
                    .receive(INTERFACE, frame, &mut scheduler)
                    .with_context(|| format!("Node {} rejected a frame from node {}", to, from))?;
                self.collect_outgoing(to)
            }
            Event::Timer { node, event, .. } => {
                self.stats.timers_fired += 1;
                let mut scheduler = NodeScheduler {
                    queue: &mut self.queue,
                    node,
                    now: self.now,
                };
                self.nodes[node]
                    .on_timer(event, &mut scheduler)
                    .with_context(|| format!("Node {} failed handling {:?}", node, event))?;
                self.collect_outgoing(node)
            }
        }
    }

    /// Route frames transmitted by `sender` to its neighbors
    fn collect_outgoing(&mut self, sender: usize) -> Result<()> {
        let frames = self.transport_mut(sender)?.take_outgoing();
        for frame in frames {
            self.route_frame(sender, frame);
        }
        Ok(())
    }

    fn route_frame(&mut self, sender: usize, frame: Frame) {
        self.stats.frames_sent += 1;
        let receiver = frame.header.addr1;

        let targets: Vec<(usize, Link)> = self
            .neighbors(sender)
            .into_iter()
            .filter(|&n| receiver.is_broadcast() || Self::address_of(n) == receiver)
            .filter_map(|n| self.links.get(&link_key(sender, n)).map(|link| (n, *link)))
            .collect();

        if targets.is_empty() && !receiver.is_broadcast() {
            self.stats.frames_unroutable += 1;
            return;
        }

        let at = self.now + self.link_delay;
        for (neighbor, link) in targets {
            if link.loss > 0.0 && self.rng.gen::<f64>() < link.loss {
                self.stats.frames_lost += 1;
                continue;
            }
            self.queue.push(
                at,
                Event::FrameDelivery {
                    to: neighbor,
                    from: sender,
                    frame: frame.clone(),
                },
            );
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.nodes.len() {
            return Err(anyhow!(
                "node {} does not exist ({} nodes)",
                index,
                self.nodes.len()
            ));
        }
        Ok(())
    }

    fn transport_mut(&mut self, index: usize) -> Result<&mut SimTransport> {
        self.nodes
            .get_mut(index)
            .and_then(|node| node.interface_mut(INTERFACE))
            .map(|iface| iface.transport_mut())
            .ok_or_else(|| anyhow!("node {} has no interface", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::LinkConfig;

    #[test]
    fn test_from_scenario_wires_peers() {
        let sim = Simulator::from_scenario(&ScenarioConfig::line(3)).unwrap();
        assert_eq!(sim.node_count(), 3);
        assert_eq!(sim.neighbors(1), vec![0, 2]);

        let middle = sim.node(1).unwrap().interface(INTERFACE).unwrap();
        assert_eq!(
            hwmp_routing::MeshTransport::peers(middle.transport()),
            vec![Simulator::address_of(0), Simulator::address_of(2)]
        );
    }

    #[test]
    fn test_unknown_nodes_rejected() {
        let mut sim = Simulator::from_scenario(&ScenarioConfig::line(2)).unwrap();
        assert!(sim.discover(0, 5).is_err());
        assert!(sim.break_link(0, 1).is_ok());
        assert!(sim.break_link(0, 1).is_err());
    }

    #[test]
    fn test_lossy_link_drops_everything() {
        let mut scenario = ScenarioConfig::line(2);
        scenario.links[0] = LinkConfig {
            a: 0,
            b: 1,
            metric: 1,
            loss: 1.0,
        };
        let mut sim = Simulator::from_scenario(&scenario).unwrap();
        sim.send_data(0, MeshAddress::BROADCAST, b"x".to_vec()).unwrap();
        sim.run_for(Duration::from_millis(10)).unwrap();

        assert_eq!(sim.stats().frames_sent, 1);
        assert_eq!(sim.stats().frames_lost, 1);
        assert!(sim.node_mut(1).unwrap().take_delivered().is_empty());
    }

    #[test]
    fn test_shutdown_leaves_no_live_timers() {
        let mut sim = Simulator::from_scenario(&ScenarioConfig::line(3)).unwrap();
        sim.discover(0, 2).unwrap();
        sim.run_for(Duration::from_millis(500)).unwrap();
        assert!(sim.pending_timers() > 0);

        sim.shutdown();
        assert_eq!(sim.pending_timers(), 0);
        sim.run_for(Duration::from_secs(10)).unwrap();
        assert_eq!(sim.pending_timers(), 0);
    }
}
