//! Routing error types
//!
//! Every variant is fatal: it signals a build or configuration mismatch
//! rather than a network condition. Transient conditions (stale sequence
//! numbers, exhausted TTL, missing routes) are counted, never returned.

use thiserror::Error;

use hwmp_protocol::ProtocolError;

/// HWMP fatal errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HwmpError {
    #[error("Data frame already carries a mesh tag on receipt")]
    UnexpectedTag,

    #[error("Data frame reached transmission without a mesh tag")]
    MissingTag,

    #[error("Unsupported mesh address extension: {0}")]
    UnsupportedAddressExtension(u8),

    #[error("Malformed path selection frame: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unknown interface: {0}")]
    UnknownInterface(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for HWMP operations
pub type Result<T> = std::result::Result<T, HwmpError>;
