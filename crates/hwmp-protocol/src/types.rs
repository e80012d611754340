//! Core protocol types

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Size of a mesh address in bytes
pub const MESH_ADDRESS_SIZE: usize = 6;

/// Airtime link metric, consumed as an opaque cost (lower is better)
pub type Metric = u32;

/// A link-layer identifier used as node identity (originator, destination, neighbor)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshAddress([u8; MESH_ADDRESS_SIZE]);

impl MeshAddress {
    /// The broadcast address ff:ff:ff:ff:ff:ff
    pub const BROADCAST: MeshAddress = MeshAddress([0xFF; MESH_ADDRESS_SIZE]);

    /// Create an address from raw bytes
    pub const fn from_bytes(bytes: [u8; MESH_ADDRESS_SIZE]) -> Self {
        MeshAddress(bytes)
    }

    /// Locally administered unicast address with the given index in the low bytes
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        MeshAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Get the bytes of this address
    pub fn as_bytes(&self) -> &[u8; MESH_ADDRESS_SIZE] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; MESH_ADDRESS_SIZE];
        arr.copy_from_slice(&bytes[..MESH_ADDRESS_SIZE]);
        MeshAddress(arr)
    }
}

impl fmt::Debug for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshAddress({})", self)
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| hex::encode([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl FromStr for MeshAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAddress(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != MESH_ADDRESS_SIZE || parts.iter().any(|p| p.len() != 2) {
            return Err(invalid());
        }

        let bytes = hex::decode(parts.concat()).map_err(|_| invalid())?;
        Ok(MeshAddress::from_slice(&bytes))
    }
}

impl TryFrom<String> for MeshAddress {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MeshAddress> for String {
    fn from(address: MeshAddress) -> Self {
        address.to_string()
    }
}

/// Returns true when `a` is newer than `b` under modulo-2^32 serial arithmetic.
///
/// Two values exactly 2^31 apart are not newer than each other.
pub fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// A per-originator sequence number compared by wraparound distance.
///
/// Deliberately not `PartialOrd`: raw integer ordering is wrong once the
/// counter wraps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqNo(u32);

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo(0);

    pub const fn new(value: u32) -> Self {
        SeqNo(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// The next value of the counter, wrapping at 2^32
    pub fn next(self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    /// True if this sequence number carries strictly fresher information than `other`
    pub fn is_fresher_than(&self, other: SeqNo) -> bool {
        is_newer(self.0, other.0)
    }

    /// Freshness ordering: `Greater` means `self` is fresher.
    ///
    /// Not a total order. Two values exactly 2^31 apart are neither fresher
    /// than the other and compare `Equal` although they differ.
    pub fn freshness_cmp(&self, other: SeqNo) -> Ordering {
        if self.is_fresher_than(other) {
            Ordering::Greater
        } else if other.is_fresher_than(*self) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }

    /// The fresher of two sequence numbers (`self` on a tie)
    pub fn freshest(self, other: SeqNo) -> SeqNo {
        if other.is_fresher_than(self) {
            other
        } else {
            self
        }
    }
}

impl From<u32> for SeqNo {
    fn from(value: u32) -> Self {
        SeqNo(value)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
