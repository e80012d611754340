//! Link-layer frame model
//!
//! Frames carry four addresses:
//! - addr1: receiver of this hop
//! - addr2: transmitter of this hop (the sending interface)
//! - addr3: data frames: mesh destination; action frames: sender's mesh address
//! - addr4: data frames: mesh source
//!
//! Data frames travelling the mesh start with a mesh header:
//! - Flags (1 byte): address extension mode in the low 2 bits
//! - TTL (1 byte)
//! - Sequence number (4 bytes, big-endian)
//!
//! Path selection action frames start with a 2-byte action header
//! (category 13, action 1) followed by information elements.

use serde::{Deserialize, Serialize};

use crate::elements::{encode_elements, PathSelectionElement, PathSelectionFrame};
use crate::error::{ProtocolError, Result};
use crate::types::MeshAddress;

/// Mesh header size: flags + TTL + sequence number
pub const MESH_HEADER_SIZE: usize = 6;

/// Action header size: category + action
pub const ACTION_HEADER_SIZE: usize = 2;

/// Action category of mesh path selection frames
pub const CATEGORY_MESH_PATH_SELECTION: u8 = 13;

/// Action code of path selection frames within the category
pub const ACTION_PATH_SELECTION: u8 = 1;

const ADDRESS_EXTENSION_MASK: u8 = 0b0000_0011;

/// Kind of link-layer frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Data,
    Action,
    Management,
}

/// Link-layer addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub addr1: MeshAddress,
    pub addr2: MeshAddress,
    pub addr3: MeshAddress,
    pub addr4: MeshAddress,
}

impl FrameHeader {
    /// Receiver of this hop
    pub fn receiver(&self) -> MeshAddress {
        self.addr1
    }

    /// Transmitter of this hop
    pub fn transmitter(&self) -> MeshAddress {
        self.addr2
    }
}

/// Routing metadata attached to a data frame while it is inside the node.
///
/// Never serialized; on the wire it becomes the mesh header plus addr1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwmpTag {
    pub next_hop: MeshAddress,
    pub ttl: u8,
    pub seqno: u32,
}

/// Mesh header prefixing every data frame payload on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshHeader {
    pub address_extension: u8,
    pub ttl: u8,
    pub seqno: u32,
}

impl MeshHeader {
    pub fn new(ttl: u8, seqno: u32) -> Self {
        MeshHeader {
            address_extension: 0,
            ttl,
            seqno,
        }
    }

    pub fn to_bytes(&self) -> [u8; MESH_HEADER_SIZE] {
        let s = self.seqno.to_be_bytes();
        [
            self.address_extension & ADDRESS_EXTENSION_MASK,
            self.ttl,
            s[0],
            s[1],
            s[2],
            s[3],
        ]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESH_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "mesh header",
                needed: MESH_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        Ok(MeshHeader {
            address_extension: bytes[0] & ADDRESS_EXTENSION_MASK,
            ttl: bytes[1],
            seqno: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        })
    }
}

/// Action frame category/action pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHeader {
    pub category: u8,
    pub action: u8,
}

impl ActionHeader {
    pub fn path_selection() -> Self {
        ActionHeader {
            category: CATEGORY_MESH_PATH_SELECTION,
            action: ACTION_PATH_SELECTION,
        }
    }

    pub fn is_path_selection(&self) -> bool {
        self.category == CATEGORY_MESH_PATH_SELECTION && self.action == ACTION_PATH_SELECTION
    }

    pub fn to_bytes(&self) -> [u8; ACTION_HEADER_SIZE] {
        [self.category, self.action]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ACTION_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "action header",
                needed: ACTION_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Ok(ActionHeader {
            category: bytes[0],
            action: bytes[1],
        })
    }
}

/// Decode an action frame payload as path selection elements.
///
/// The payload must start with the path selection action header and
/// contain nothing but well-formed elements after it.
pub fn decode_path_selection(payload: &[u8]) -> Result<PathSelectionFrame> {
    let header = ActionHeader::from_bytes(payload)?;
    if !header.is_path_selection() {
        return Err(ProtocolError::InvalidActionHeader {
            category: header.category,
            action: header.action,
        });
    }
    PathSelectionFrame::decode(&payload[ACTION_HEADER_SIZE..])
}

/// Encode path selection elements behind the action header
pub fn encode_path_selection(elements: &[PathSelectionElement]) -> Vec<u8> {
    let mut payload = ActionHeader::path_selection().to_bytes().to_vec();
    payload.extend_from_slice(&encode_elements(elements));
    payload
}

/// A link-layer frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub header: FrameHeader,

    /// Frame body; for data frames on the wire it starts with the mesh header
    pub payload: Vec<u8>,

    /// Routing tag, present only between the routing layer and the adapter
    #[serde(skip)]
    pub tag: Option<HwmpTag>,
}

impl Frame {
    /// Create an untagged data frame from `source` to `destination`
    pub fn data(source: MeshAddress, destination: MeshAddress, payload: Vec<u8>) -> Self {
        Frame {
            header: FrameHeader {
                kind: FrameKind::Data,
                addr1: destination,
                addr2: source,
                addr3: destination,
                addr4: source,
            },
            payload,
            tag: None,
        }
    }

    /// Create a path selection action frame.
    ///
    /// `interface_address` is the transmitting interface, `mesh_address` the
    /// node identity carried in addr3.
    pub fn path_selection(
        receiver: MeshAddress,
        interface_address: MeshAddress,
        mesh_address: MeshAddress,
        elements: &[PathSelectionElement],
    ) -> Self {
        Frame {
            header: FrameHeader {
                kind: FrameKind::Action,
                addr1: receiver,
                addr2: interface_address,
                addr3: mesh_address,
                addr4: MeshAddress::BROADCAST,
            },
            payload: encode_path_selection(elements),
            tag: None,
        }
    }

    /// Create a non-action management frame
    pub fn management(receiver: MeshAddress, transmitter: MeshAddress, payload: Vec<u8>) -> Self {
        Frame {
            header: FrameHeader {
                kind: FrameKind::Management,
                addr1: receiver,
                addr2: transmitter,
                addr3: transmitter,
                addr4: MeshAddress::BROADCAST,
            },
            payload,
            tag: None,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    /// Mesh destination of a data frame
    pub fn destination(&self) -> MeshAddress {
        self.header.addr3
    }

    /// Mesh source of a data frame
    pub fn source(&self) -> MeshAddress {
        self.header.addr4
    }

    pub fn add_mesh_header(&mut self, header: MeshHeader) {
        let mut payload = Vec::with_capacity(MESH_HEADER_SIZE + self.payload.len());
        payload.extend_from_slice(&header.to_bytes());
        payload.extend_from_slice(&self.payload);
        self.payload = payload;
    }

    pub fn remove_mesh_header(&mut self) -> Result<MeshHeader> {
        let header = MeshHeader::from_bytes(&self.payload)?;
        self.payload.drain(..MESH_HEADER_SIZE);
        Ok(header)
    }
}
