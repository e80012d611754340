//! Link-layer collaborator of an HWMP interface

use hwmp_protocol::{Frame, MeshAddress, Metric, MAX_PERR_DESTINATIONS, MAX_PREQ_TARGETS};

/// One mesh interface as seen by the protocol
pub trait MeshTransport {
    /// Address of this interface
    fn address(&self) -> MeshAddress;

    /// Current airtime metric towards a neighbor
    fn link_metric(&self, peer: MeshAddress) -> Metric;

    /// Neighbors with an established peer link
    fn peers(&self) -> Vec<MeshAddress>;

    /// Hand a fully prepared frame to the link layer
    fn transmit(&mut self, frame: Frame);

    /// Frequency channel of the interface
    fn channel_id(&self) -> u16;

    /// PREQ targets per element on this interface
    fn preq_capacity(&self) -> usize {
        MAX_PREQ_TARGETS
    }

    /// PERR destinations per element on this interface
    fn perr_capacity(&self) -> usize {
        MAX_PERR_DESTINATIONS
    }
}
