//! Tagging & Transport Adapter
//!
//! One `HwmpMac` per mesh interface. It is the only place where control
//! frames are built and where received path selection frames are taken
//! apart; everything else it hands to the engine passed in by the caller.

use tracing::{trace, warn};

use hwmp_protocol::frame::ACTION_HEADER_SIZE;
use hwmp_protocol::{
    ActionHeader, FailedDestination, Frame, FrameKind, HwmpTag, MeshAddress, MeshHeader,
    PathSelectionElement, PathSelectionFrame, Perr, Prep, Preq,
};

use crate::config::HwmpConfig;
use crate::error::{HwmpError, Result};
use crate::protocol::{HwmpProtocol, Outgoing, ReceiveContext};
use crate::scheduler::Scheduler;
use crate::stats::MacStats;
use crate::transport::MeshTransport;

/// Outcome of [`HwmpMac::receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    /// Data frame tagged and ready for forwarding decisions
    Accept,
    /// Duplicate broadcast; neither delivered nor relayed
    Reject,
    /// Path selection frame fully processed
    Consumed,
    /// Not an HWMP frame
    Ignored,
}

/// HWMP adapter of one interface
#[derive(Debug)]
pub struct HwmpMac {
    interface: u32,
    interface_address: MeshAddress,
    mesh_address: MeshAddress,
    unicast_preq_threshold: usize,
    stats: MacStats,
}

impl HwmpMac {
    pub fn new(
        interface: u32,
        interface_address: MeshAddress,
        mesh_address: MeshAddress,
        config: &HwmpConfig,
    ) -> Self {
        HwmpMac {
            interface,
            interface_address,
            mesh_address,
            unicast_preq_threshold: config.unicast_preq_threshold,
            stats: MacStats::default(),
        }
    }

    pub fn interface(&self) -> u32 {
        self.interface
    }

    pub fn interface_address(&self) -> MeshAddress {
        self.interface_address
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Human-readable counters of this interface
    pub fn report(&self) -> String {
        format!(
            "<Interface index=\"{}\" address=\"{}\">\n{}\n</Interface>",
            self.interface, self.interface_address, self.stats
        )
    }

    /// Classify a received frame.
    ///
    /// Data frames lose their mesh header and gain a tag. Path selection
    /// frames are decoded and dispatched to `engine` in the order RANN,
    /// PREQ, PREP, PERR.
    pub fn receive<T: MeshTransport + ?Sized>(
        &mut self,
        frame: &mut Frame,
        transport: &T,
        engine: &mut HwmpProtocol,
        scheduler: &mut dyn Scheduler,
    ) -> Result<RxVerdict> {
        match frame.kind() {
            FrameKind::Data => self.receive_data(frame, engine),
            FrameKind::Action => self.receive_action(frame, transport, engine, scheduler),
            FrameKind::Management => Ok(RxVerdict::Ignored),
        }
    }

    fn receive_data(&mut self, frame: &mut Frame, engine: &mut HwmpProtocol) -> Result<RxVerdict> {
        if frame.tag.is_some() {
            return Err(HwmpError::UnexpectedTag);
        }

        let header = frame.remove_mesh_header()?;
        if header.address_extension != 0 {
            return Err(HwmpError::UnsupportedAddressExtension(
                header.address_extension,
            ));
        }

        self.stats.rx_data += 1;
        self.stats.rx_data_bytes += frame.payload.len() as u64;
        frame.tag = Some(HwmpTag {
            next_hop: frame.header.receiver(),
            ttl: header.ttl,
            seqno: header.seqno,
        });

        if frame.destination().is_broadcast() && engine.drop_data_frame(header.seqno, frame.source())
        {
            return Ok(RxVerdict::Reject);
        }
        Ok(RxVerdict::Accept)
    }

    fn receive_action<T: MeshTransport + ?Sized>(
        &mut self,
        frame: &Frame,
        transport: &T,
        engine: &mut HwmpProtocol,
        scheduler: &mut dyn Scheduler,
    ) -> Result<RxVerdict> {
        match ActionHeader::from_bytes(&frame.payload) {
            Ok(header) if header.is_path_selection() => {}
            _ => return Ok(RxVerdict::Ignored),
        }

        let elements = PathSelectionFrame::decode(&frame.payload[ACTION_HEADER_SIZE..])?;
        self.stats.rx_mgt += 1;
        self.stats.rx_mgt_bytes += frame.payload.len() as u64;

        let from = frame.header.transmitter();
        let ctx = ReceiveContext {
            from,
            interface: self.interface,
            source: frame.header.addr3,
            metric: transport.link_metric(from),
        };

        for rann in &elements.ranns {
            warn!(root = %rann.root, from = %from, "RANN is not supported, dropped");
        }

        for mut preq in elements.preqs {
            self.stats.rx_preq += 1;
            if preq.originator == self.mesh_address {
                trace!(preq_id = preq.preq_id, "Own PREQ looped back");
                continue;
            }
            if preq.ttl == 0 {
                self.stats.rx_ttl_expired += 1;
                continue;
            }
            preq.decrement_ttl();
            engine.receive_preq(preq, &ctx, scheduler);
        }

        for mut prep in elements.preps {
            self.stats.rx_prep += 1;
            if prep.ttl == 0 {
                self.stats.rx_ttl_expired += 1;
                continue;
            }
            prep.decrement_ttl();
            engine.receive_prep(prep, &ctx, scheduler);
        }

        let mut failed = Vec::new();
        for perr in elements.perrs {
            self.stats.rx_perr += 1;
            failed.extend(perr.destinations);
        }
        if !failed.is_empty() {
            engine.receive_perr(failed, &ctx, scheduler);
        }

        Ok(RxVerdict::Consumed)
    }

    /// Turn the tag of an outgoing data frame into the mesh header and
    /// next-hop addressing. Other frames pass through.
    pub fn prepare_outgoing(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.kind() != FrameKind::Data {
            return Ok(());
        }

        let tag = frame.tag.take().ok_or(HwmpError::MissingTag)?;
        self.stats.tx_data += 1;
        self.stats.tx_data_bytes += frame.payload.len() as u64;

        frame.add_mesh_header(MeshHeader::new(tag.ttl, tag.seqno));
        frame.header.addr1 = tag.next_hop;
        frame.header.addr2 = self.interface_address;
        Ok(())
    }

    /// Serialize and transmit control traffic produced by the engine
    pub fn transmit<T: MeshTransport + ?Sized>(&mut self, outgoing: Outgoing, transport: &mut T) {
        match outgoing {
            Outgoing::Preqs { preqs, .. } => self.send_preqs(preqs, transport),
            Outgoing::Prep { receiver, prep, .. } => self.send_prep(receiver, prep, transport),
            Outgoing::Perr {
                destinations,
                receivers,
                ..
            } => self.send_perr(&destinations, &receivers, transport),
        }
    }

    /// All PREQs in one frame, unicast to each peer below the threshold,
    /// broadcast otherwise
    fn send_preqs<T: MeshTransport + ?Sized>(&mut self, preqs: Vec<Preq>, transport: &mut T) {
        if preqs.is_empty() {
            return;
        }

        let peers = transport.peers();
        let receivers = if peers.is_empty() || peers.len() >= self.unicast_preq_threshold {
            vec![MeshAddress::BROADCAST]
        } else {
            peers
        };

        let elements: Vec<PathSelectionElement> =
            preqs.into_iter().map(PathSelectionElement::Preq).collect();
        for receiver in receivers {
            self.stats.tx_preq += elements.len() as u64;
            self.send_action(receiver, &elements, transport);
        }
    }

    fn send_prep<T: MeshTransport + ?Sized>(
        &mut self,
        receiver: MeshAddress,
        prep: Prep,
        transport: &mut T,
    ) {
        self.stats.tx_prep += 1;
        self.send_action(receiver, &[PathSelectionElement::Prep(prep)], transport);
    }

    fn send_perr<T: MeshTransport + ?Sized>(
        &mut self,
        destinations: &[FailedDestination],
        receivers: &[MeshAddress],
        transport: &mut T,
    ) {
        if destinations.is_empty() {
            return;
        }

        let elements: Vec<PathSelectionElement> = Perr::split(destinations, transport.perr_capacity())
            .into_iter()
            .map(PathSelectionElement::Perr)
            .collect();
        for receiver in receivers {
            self.stats.tx_perr += elements.len() as u64;
            self.send_action(*receiver, &elements, transport);
        }
    }

    fn send_action<T: MeshTransport + ?Sized>(
        &mut self,
        receiver: MeshAddress,
        elements: &[PathSelectionElement],
        transport: &mut T,
    ) {
        let frame = Frame::path_selection(
            receiver,
            self.interface_address,
            self.mesh_address,
            elements,
        );
        self.stats.tx_mgt += 1;
        self.stats.tx_mgt_bytes += frame.payload.len() as u64;
        transport.transmit(frame);
    }
}
