//! HWMP Protocol Module
//!
//! This module defines the wire-level data structures of the Hybrid Wireless
//! Mesh Protocol: mesh addresses, sequence numbers, path selection
//! information elements (PREQ, PREP, PERR, RANN) and the link-layer frame model.

pub mod elements;
pub mod error;
pub mod frame;
pub mod types;

pub use elements::{
    FailedDestination, PathSelectionElement, PathSelectionFrame, Perr, Prep, Preq, PreqTarget,
    Rann, TargetFlags, MAX_PERR_DESTINATIONS, MAX_PREQ_TARGETS,
};
pub use error::{ProtocolError, Result};
pub use frame::{
    decode_path_selection, encode_path_selection, ActionHeader, Frame, FrameHeader, FrameKind,
    HwmpTag, MeshHeader,
};
pub use types::{is_newer, MeshAddress, Metric, SeqNo};
