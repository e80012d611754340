//! Simulated link layer of one node

use std::collections::BTreeMap;

use hwmp_protocol::{Frame, MeshAddress, Metric};
use hwmp_routing::MeshTransport;

/// Interface that queues transmitted frames for the simulator to route
#[derive(Debug, Clone)]
pub struct SimTransport {
    address: MeshAddress,
    channel: u16,
    peers: BTreeMap<MeshAddress, Metric>,
    outgoing: Vec<Frame>,
}

impl SimTransport {
    pub fn new(address: MeshAddress, channel: u16) -> Self {
        SimTransport {
            address,
            channel,
            peers: BTreeMap::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn set_peer(&mut self, peer: MeshAddress, metric: Metric) {
        self.peers.insert(peer, metric);
    }

    pub fn remove_peer(&mut self, peer: &MeshAddress) -> bool {
        self.peers.remove(peer).is_some()
    }

    pub fn take_outgoing(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.outgoing)
    }
}

impl MeshTransport for SimTransport {
    fn address(&self) -> MeshAddress {
        self.address
    }

    // Unknown neighbors get the worst metric
    fn link_metric(&self, peer: MeshAddress) -> Metric {
        self.peers.get(&peer).copied().unwrap_or(Metric::MAX)
    }

    fn peers(&self) -> Vec<MeshAddress> {
        self.peers.keys().copied().collect()
    }

    fn transmit(&mut self, frame: Frame) {
        self.outgoing.push(frame);
    }

    fn channel_id(&self) -> u16 {
        self.channel
    }
}
