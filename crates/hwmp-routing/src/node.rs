//! Mesh point: one path selection engine and its interfaces
//!
//! `MeshPoint` wires received frames through the adapter of the arrival
//! interface into the engine, applies the forwarding decision and hands
//! control traffic produced by the engine back to the right adapter.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use hwmp_protocol::{Frame, FrameKind, MeshAddress};

use crate::config::HwmpConfig;
use crate::error::{HwmpError, Result};
use crate::mac::{HwmpMac, RxVerdict};
use crate::protocol::{DataRoute, HwmpProtocol};
use crate::scheduler::{Scheduler, TimerEvent};
use crate::transport::MeshTransport;

/// Adapter and link layer of one interface
#[derive(Debug)]
pub struct MeshInterface<T> {
    mac: HwmpMac,
    transport: T,
}

impl<T> MeshInterface<T> {
    pub fn mac(&self) -> &HwmpMac {
        &self.mac
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Data handed up to the upper layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub source: MeshAddress,
    pub destination: MeshAddress,
    pub payload: Vec<u8>,
}

/// A mesh node running HWMP on every attached interface
#[derive(Debug)]
pub struct MeshPoint<T: MeshTransport> {
    protocol: HwmpProtocol,
    interfaces: BTreeMap<u32, MeshInterface<T>>,
    delivered: Vec<Delivered>,
}

impl<T: MeshTransport> MeshPoint<T> {
    pub fn new(address: MeshAddress, config: HwmpConfig) -> Result<Self> {
        Ok(MeshPoint {
            protocol: HwmpProtocol::new(address, config)?,
            interfaces: BTreeMap::new(),
            delivered: Vec::new(),
        })
    }

    /// Attach an interface, returning its index
    pub fn add_interface(&mut self, transport: T) -> u32 {
        let index = self.interfaces.len() as u32;
        self.protocol
            .add_interface(index, transport.preq_capacity());

        let mac = HwmpMac::new(
            index,
            transport.address(),
            self.protocol.address(),
            self.protocol.config(),
        );
        debug!(
            interface = index,
            address = %transport.address(),
            channel = transport.channel_id(),
            "Interface attached"
        );
        self.interfaces
            .insert(index, MeshInterface { mac, transport });
        index
    }

    pub fn address(&self) -> MeshAddress {
        self.protocol.address()
    }

    pub fn protocol(&self) -> &HwmpProtocol {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut HwmpProtocol {
        &mut self.protocol
    }

    pub fn interface(&self, index: u32) -> Option<&MeshInterface<T>> {
        self.interfaces.get(&index)
    }

    pub fn interface_mut(&mut self, index: u32) -> Option<&mut MeshInterface<T>> {
        self.interfaces.get_mut(&index)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (u32, &MeshInterface<T>)> {
        self.interfaces.iter().map(|(index, iface)| (*index, iface))
    }

    pub fn channel_id(&self, index: u32) -> Result<u16> {
        self.interfaces
            .get(&index)
            .map(|iface| iface.transport.channel_id())
            .ok_or(HwmpError::UnknownInterface(index))
    }

    /// Handle a frame received on `interface`
    pub fn receive(
        &mut self,
        interface: u32,
        mut frame: Frame,
        scheduler: &mut dyn Scheduler,
    ) -> Result<RxVerdict> {
        let iface = self
            .interfaces
            .get_mut(&interface)
            .ok_or(HwmpError::UnknownInterface(interface))?;

        let verdict = iface
            .mac
            .receive(&mut frame, &iface.transport, &mut self.protocol, scheduler)?;

        if verdict == RxVerdict::Accept && frame.kind() == FrameKind::Data {
            let route = self.protocol.route_received(&mut frame, interface)?;
            self.dispatch_data(frame, route)?;
        }

        self.flush_outbox()?;
        Ok(verdict)
    }

    /// Send `payload` from this node; unicast or broadcast
    pub fn send(
        &mut self,
        destination: MeshAddress,
        payload: Vec<u8>,
        scheduler: &mut dyn Scheduler,
    ) -> Result<DataRoute> {
        let mut frame = Frame::data(self.address(), destination, payload);
        let route = self.protocol.route_outgoing(&mut frame, scheduler);
        self.dispatch_data(frame, route.clone())?;
        self.flush_outbox()?;
        Ok(route)
    }

    pub fn discover(&mut self, destination: MeshAddress, scheduler: &mut dyn Scheduler) -> Result<()> {
        self.protocol.discover(destination, scheduler);
        self.flush_outbox()
    }

    pub fn on_timer(&mut self, event: TimerEvent, scheduler: &mut dyn Scheduler) -> Result<()> {
        self.protocol.on_timer(event, scheduler);
        self.flush_outbox()
    }

    /// The peer link to `neighbor` on `interface` is gone
    pub fn link_failure(
        &mut self,
        interface: u32,
        neighbor: MeshAddress,
        scheduler: &mut dyn Scheduler,
    ) -> Result<()> {
        if !self.interfaces.contains_key(&interface) {
            return Err(HwmpError::UnknownInterface(interface));
        }
        self.protocol.on_link_failure(interface, neighbor, scheduler);
        self.flush_outbox()
    }

    pub fn shutdown(&mut self, scheduler: &mut dyn Scheduler) {
        self.protocol.shutdown(scheduler);
    }

    /// Take the data delivered to this node so far
    pub fn take_delivered(&mut self) -> Vec<Delivered> {
        std::mem::take(&mut self.delivered)
    }

    pub fn report(&self) -> String {
        let mut report = format!(
            "<Hwmp address=\"{}\" maxTtl=\"{}\">\n{}\n",
            self.address(),
            self.protocol.config().max_ttl,
            self.protocol.stats()
        );
        for iface in self.interfaces.values() {
            report.push_str(&iface.mac.report());
            report.push('\n');
        }
        report.push_str("</Hwmp>");
        report
    }

    fn dispatch_data(&mut self, frame: Frame, route: DataRoute) -> Result<()> {
        match route {
            DataRoute::Local => {
                self.deliver(frame);
                Ok(())
            }
            DataRoute::LocalAndFlood { interfaces } => {
                self.deliver(frame.clone());
                self.transmit_data(frame, &interfaces)
            }
            DataRoute::Forward { interfaces } => self.transmit_data(frame, &interfaces),
            DataRoute::NoRoute | DataRoute::Drop(_) => Ok(()),
        }
    }

    fn deliver(&mut self, frame: Frame) {
        trace!(source = %frame.source(), bytes = frame.payload.len(), "Data delivered");
        self.delivered.push(Delivered {
            source: frame.source(),
            destination: frame.destination(),
            payload: frame.payload,
        });
    }

    fn transmit_data(&mut self, frame: Frame, interfaces: &[u32]) -> Result<()> {
        for &index in interfaces {
            let iface = self
                .interfaces
                .get_mut(&index)
                .ok_or(HwmpError::UnknownInterface(index))?;
            let mut copy = frame.clone();
            iface.mac.prepare_outgoing(&mut copy)?;
            iface.transport.transmit(copy);
        }
        Ok(())
    }

    fn flush_outbox(&mut self) -> Result<()> {
        for outgoing in self.protocol.drain_outbox() {
            let index = outgoing.interface();
            let iface = self
                .interfaces
                .get_mut(&index)
                .ok_or(HwmpError::UnknownInterface(index))?;
            iface.mac.transmit(outgoing, &mut iface.transport);
        }
        Ok(())
    }
}
