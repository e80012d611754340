//! Error types for element and frame codec operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown information element id: {0}")]
    UnknownElement(u8),

    #[error("Element {id} length mismatch: declared {declared}, parsed {parsed}")]
    ElementLength { id: u8, declared: usize, parsed: usize },

    #[error("Path selection frame not exhausted: {remaining} trailing bytes")]
    TrailingBytes { remaining: usize },

    #[error("Element over capacity: {count} entries (max: {max})")]
    OverCapacity { count: usize, max: usize },

    #[error("Invalid mesh address: {0}")]
    InvalidAddress(String),

    #[error("Invalid action header: category {category}, action {action}")]
    InvalidActionHeader { category: u8, action: u8 },
}
