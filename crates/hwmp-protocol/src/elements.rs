//! HWMP information elements and their codec
//!
//! Every element is encoded as `[element id][length][body]`, multi-byte
//! fields big-endian. Element bodies:
//!
//! - RANN (21 bytes): flags, hop count, TTL, root, root seqno, interval, metric
//! - PREQ (26 + 11 * targets): flags, hop count, TTL, PREQ id, originator,
//!   originator seqno, lifetime, metric, target count, targets
//!   (flags, address, seqno)
//! - PREP (31 bytes): flags, hop count, TTL, destination, destination seqno,
//!   lifetime, metric, originator, originator seqno
//! - PERR (1 + 10 * destinations): count, then (address, seqno) pairs
//!
//! Decoding a path selection payload yields a [`PathSelectionFrame`] that
//! groups elements per type, each group in wire order.

use bitflags::bitflags;
use crate::error::{ProtocolError, Result};
use crate::types::{MeshAddress, Metric, SeqNo, MESH_ADDRESS_SIZE};

pub const ELEMENT_ID_RANN: u8 = 126;
pub const ELEMENT_ID_PREQ: u8 = 130;
pub const ELEMENT_ID_PREP: u8 = 131;
pub const ELEMENT_ID_PERR: u8 = 132;

/// Element id + length byte
pub const ELEMENT_HEADER_SIZE: usize = 2;

const PREQ_FIXED_SIZE: usize = 26;
const PREQ_TARGET_SIZE: usize = 1 + MESH_ADDRESS_SIZE + 4;
const PREP_SIZE: usize = 31;
const PERR_ENTRY_SIZE: usize = MESH_ADDRESS_SIZE + 4;
const RANN_SIZE: usize = 21;

/// Maximum PREQ targets that fit one element (26 + 20 * 11 = 246 bytes)
pub const MAX_PREQ_TARGETS: usize = 20;

/// Maximum PERR destinations that fit one element (1 + 25 * 10 = 251 bytes)
pub const MAX_PERR_DESTINATIONS: usize = 25;

bitflags! {
    /// Per-target PREQ modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetFlags: u8 {
        /// Only the target itself may answer
        const DESTINATION_ONLY = 0b0000_0001;
        /// Intermediate nodes with a fresher route answer and keep forwarding
        const REPLY_AND_FORWARD = 0b0000_0010;
    }
}

/// One destination entry of a PREQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreqTarget {
    pub flags: TargetFlags,
    pub address: MeshAddress,
    pub seqno: SeqNo,
}

impl PreqTarget {
    pub fn new(
        address: MeshAddress,
        seqno: SeqNo,
        destination_only: bool,
        reply_and_forward: bool,
    ) -> Self {
        let mut flags = TargetFlags::empty();
        flags.set(TargetFlags::DESTINATION_ONLY, destination_only);
        flags.set(TargetFlags::REPLY_AND_FORWARD, reply_and_forward);
        PreqTarget {
            flags,
            address,
            seqno,
        }
    }

    pub fn destination_only(&self) -> bool {
        self.flags.contains(TargetFlags::DESTINATION_ONLY)
    }

    pub fn reply_and_forward(&self) -> bool {
        self.flags.contains(TargetFlags::REPLY_AND_FORWARD)
    }
}

/// Path Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preq {
    pub hop_count: u8,
    pub ttl: u8,
    pub preq_id: u32,
    pub originator: MeshAddress,
    pub originator_seqno: SeqNo,
    pub lifetime_ms: u32,
    pub metric: Metric,
    pub targets: Vec<PreqTarget>,
}

impl Preq {
    /// Create a PREQ with no targets, zero hop count and zero metric
    pub fn new(
        originator: MeshAddress,
        originator_seqno: SeqNo,
        preq_id: u32,
        ttl: u8,
        lifetime_ms: u32,
    ) -> Self {
        Preq {
            hop_count: 0,
            ttl,
            preq_id,
            originator,
            originator_seqno,
            lifetime_ms,
            metric: 0,
            targets: Vec::new(),
        }
    }

    /// True once `capacity` targets are present
    pub fn is_full(&self, capacity: usize) -> bool {
        self.targets.len() >= capacity.min(MAX_PREQ_TARGETS)
    }

    /// Append a target unless the element is full
    pub fn add_target(&mut self, target: PreqTarget, capacity: usize) -> bool {
        if self.is_full(capacity) {
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    pub fn encoded_len(&self) -> usize {
        ELEMENT_HEADER_SIZE + PREQ_FIXED_SIZE + self.targets.len() * PREQ_TARGET_SIZE
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.targets.len() <= MAX_PREQ_TARGETS, "PREQ over capacity");

        buf.push(ELEMENT_ID_PREQ);
        buf.push((PREQ_FIXED_SIZE + self.targets.len() * PREQ_TARGET_SIZE) as u8);
        buf.push(0); // flags
        buf.push(self.hop_count);
        buf.push(self.ttl);
        buf.extend_from_slice(&self.preq_id.to_be_bytes());
        buf.extend_from_slice(self.originator.as_bytes());
        buf.extend_from_slice(&self.originator_seqno.value().to_be_bytes());
        buf.extend_from_slice(&self.lifetime_ms.to_be_bytes());
        buf.extend_from_slice(&self.metric.to_be_bytes());
        buf.push(self.targets.len() as u8);
        for target in &self.targets {
            buf.push(target.flags.bits());
            buf.extend_from_slice(target.address.as_bytes());
            buf.extend_from_slice(&target.seqno.value().to_be_bytes());
        }
    }

    fn decode_body(body: &mut ElementReader<'_>) -> Result<Self> {
        let _flags = body.read_u8("PREQ")?;
        let hop_count = body.read_u8("PREQ")?;
        let ttl = body.read_u8("PREQ")?;
        let preq_id = body.read_u32("PREQ")?;
        let originator = body.read_address("PREQ")?;
        let originator_seqno = SeqNo::new(body.read_u32("PREQ")?);
        let lifetime_ms = body.read_u32("PREQ")?;
        let metric = body.read_u32("PREQ")?;
        let count = body.read_u8("PREQ")? as usize;
        if count > MAX_PREQ_TARGETS {
            return Err(ProtocolError::OverCapacity {
                count,
                max: MAX_PREQ_TARGETS,
            });
        }

        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            let flags = TargetFlags::from_bits_truncate(body.read_u8("PREQ target")?);
            let address = body.read_address("PREQ target")?;
            let seqno = SeqNo::new(body.read_u32("PREQ target")?);
            targets.push(PreqTarget {
                flags,
                address,
                seqno,
            });
        }

        Ok(Preq {
            hop_count,
            ttl,
            preq_id,
            originator,
            originator_seqno,
            lifetime_ms,
            metric,
            targets,
        })
    }
}

/// Path Reply, answering exactly one PREQ target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prep {
    pub hop_count: u8,
    pub ttl: u8,
    pub destination: MeshAddress,
    pub destination_seqno: SeqNo,
    pub lifetime_ms: u32,
    pub metric: Metric,
    pub originator: MeshAddress,
    pub originator_seqno: SeqNo,
}

impl Prep {
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    pub fn encoded_len(&self) -> usize {
        ELEMENT_HEADER_SIZE + PREP_SIZE
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(ELEMENT_ID_PREP);
        buf.push(PREP_SIZE as u8);
        buf.push(0); // flags
        buf.push(self.hop_count);
        buf.push(self.ttl);
        buf.extend_from_slice(self.destination.as_bytes());
        buf.extend_from_slice(&self.destination_seqno.value().to_be_bytes());
        buf.extend_from_slice(&self.lifetime_ms.to_be_bytes());
        buf.extend_from_slice(&self.metric.to_be_bytes());
        buf.extend_from_slice(self.originator.as_bytes());
        buf.extend_from_slice(&self.originator_seqno.value().to_be_bytes());
    }

    fn decode_body(body: &mut ElementReader<'_>) -> Result<Self> {
        let _flags = body.read_u8("PREP")?;
        Ok(Prep {
            hop_count: body.read_u8("PREP")?,
            ttl: body.read_u8("PREP")?,
            destination: body.read_address("PREP")?,
            destination_seqno: SeqNo::new(body.read_u32("PREP")?),
            lifetime_ms: body.read_u32("PREP")?,
            metric: body.read_u32("PREP")?,
            originator: body.read_address("PREP")?,
            originator_seqno: SeqNo::new(body.read_u32("PREP")?),
        })
    }
}

/// A destination reported unreachable by a PERR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailedDestination {
    pub destination: MeshAddress,
    pub seqno: SeqNo,
}

impl FailedDestination {
    pub fn new(destination: MeshAddress, seqno: SeqNo) -> Self {
        FailedDestination { destination, seqno }
    }
}

/// Path Error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Perr {
    pub destinations: Vec<FailedDestination>,
}

impl Perr {
    pub fn is_full(&self, capacity: usize) -> bool {
        self.destinations.len() >= capacity.min(MAX_PERR_DESTINATIONS)
    }

    /// Split failed destinations into as many PERRs as `capacity` requires
    pub fn split(destinations: &[FailedDestination], capacity: usize) -> Vec<Perr> {
        let capacity = capacity.clamp(1, MAX_PERR_DESTINATIONS);
        destinations
            .chunks(capacity)
            .map(|chunk| Perr {
                destinations: chunk.to_vec(),
            })
            .collect()
    }

    pub fn encoded_len(&self) -> usize {
        ELEMENT_HEADER_SIZE + 1 + self.destinations.len() * PERR_ENTRY_SIZE
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(
            self.destinations.len() <= MAX_PERR_DESTINATIONS,
            "PERR over capacity"
        );

        buf.push(ELEMENT_ID_PERR);
        buf.push((1 + self.destinations.len() * PERR_ENTRY_SIZE) as u8);
        buf.push(self.destinations.len() as u8);
        for failed in &self.destinations {
            buf.extend_from_slice(failed.destination.as_bytes());
            buf.extend_from_slice(&failed.seqno.value().to_be_bytes());
        }
    }

    fn decode_body(body: &mut ElementReader<'_>) -> Result<Self> {
        let count = body.read_u8("PERR")? as usize;
        if count > MAX_PERR_DESTINATIONS {
            return Err(ProtocolError::OverCapacity {
                count,
                max: MAX_PERR_DESTINATIONS,
            });
        }

        let mut destinations = Vec::with_capacity(count);
        for _ in 0..count {
            let destination = body.read_address("PERR destination")?;
            let seqno = SeqNo::new(body.read_u32("PERR destination")?);
            destinations.push(FailedDestination { destination, seqno });
        }
        Ok(Perr { destinations })
    }
}

/// Root Announcement. Decoded so it can be skipped; never processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rann {
    pub flags: u8,
    pub hop_count: u8,
    pub ttl: u8,
    pub root: MeshAddress,
    pub root_seqno: SeqNo,
    pub interval_ms: u32,
    pub metric: Metric,
}

impl Rann {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(ELEMENT_ID_RANN);
        buf.push(RANN_SIZE as u8);
        buf.push(self.flags);
        buf.push(self.hop_count);
        buf.push(self.ttl);
        buf.extend_from_slice(self.root.as_bytes());
        buf.extend_from_slice(&self.root_seqno.value().to_be_bytes());
        buf.extend_from_slice(&self.interval_ms.to_be_bytes());
        buf.extend_from_slice(&self.metric.to_be_bytes());
    }

    fn decode_body(body: &mut ElementReader<'_>) -> Result<Self> {
        Ok(Rann {
            flags: body.read_u8("RANN")?,
            hop_count: body.read_u8("RANN")?,
            ttl: body.read_u8("RANN")?,
            root: body.read_address("RANN")?,
            root_seqno: SeqNo::new(body.read_u32("RANN")?),
            interval_ms: body.read_u32("RANN")?,
            metric: body.read_u32("RANN")?,
        })
    }
}

/// Any element carried by a path selection action frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSelectionElement {
    Rann(Rann),
    Preq(Preq),
    Prep(Prep),
    Perr(Perr),
}

impl PathSelectionElement {
    pub fn element_id(&self) -> u8 {
        match self {
            PathSelectionElement::Rann(_) => ELEMENT_ID_RANN,
            PathSelectionElement::Preq(_) => ELEMENT_ID_PREQ,
            PathSelectionElement::Prep(_) => ELEMENT_ID_PREP,
            PathSelectionElement::Perr(_) => ELEMENT_ID_PERR,
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            PathSelectionElement::Rann(rann) => rann.encode_into(buf),
            PathSelectionElement::Preq(preq) => preq.encode_into(buf),
            PathSelectionElement::Prep(prep) => prep.encode_into(buf),
            PathSelectionElement::Perr(perr) => perr.encode_into(buf),
        }
    }
}

/// Encode elements back to back, in the given order
pub fn encode_elements(elements: &[PathSelectionElement]) -> Vec<u8> {
    let mut buf = Vec::new();
    for element in elements {
        element.encode_into(&mut buf);
    }
    buf
}

/// Decoded content of a path selection action frame.
///
/// Elements are grouped by type; within a group they keep wire order.
/// Consumers process the groups RANN, PREQ, PREP, PERR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSelectionFrame {
    pub ranns: Vec<Rann>,
    pub preqs: Vec<Preq>,
    pub preps: Vec<Prep>,
    pub perrs: Vec<Perr>,
}

impl PathSelectionFrame {
    /// Decode a payload that must consist exclusively of path selection elements
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut frame = PathSelectionFrame::default();
        let mut reader = ElementReader::new(bytes);

        while !reader.is_empty() {
            if reader.remaining() < ELEMENT_HEADER_SIZE {
                return Err(ProtocolError::TrailingBytes {
                    remaining: reader.remaining(),
                });
            }

            let id = reader.read_u8("element header")?;
            let declared = reader.read_u8("element header")? as usize;
            let mut body = ElementReader::new(reader.read_bytes(declared, "element body")?);

            match id {
                ELEMENT_ID_RANN => frame.ranns.push(Rann::decode_body(&mut body)?),
                ELEMENT_ID_PREQ => frame.preqs.push(Preq::decode_body(&mut body)?),
                ELEMENT_ID_PREP => frame.preps.push(Prep::decode_body(&mut body)?),
                ELEMENT_ID_PERR => frame.perrs.push(Perr::decode_body(&mut body)?),
                other => return Err(ProtocolError::UnknownElement(other)),
            }

            if !body.is_empty() {
                return Err(ProtocolError::ElementLength {
                    id,
                    declared,
                    parsed: declared - body.remaining(),
                });
            }
        }

        Ok(frame)
    }

    pub fn element_count(&self) -> usize {
        self.ranns.len() + self.preqs.len() + self.preps.len() + self.perrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }
}

/// Bounds-checked cursor over an element buffer
struct ElementReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ElementReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ElementReader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                what,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.read_bytes(1, what)?[0])
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_address(&mut self, what: &'static str) -> Result<MeshAddress> {
        Ok(MeshAddress::from_slice(
            self.read_bytes(MESH_ADDRESS_SIZE, what)?,
        ))
    }
}
