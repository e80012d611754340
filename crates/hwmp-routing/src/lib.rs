//! HWMP Path Selection
//!
//! This crate implements reactive path discovery for a wireless mesh:
//! - Route table with sequence-number freshness rules
//! - PREQ/PREP/PERR processing with Destination-Only and Reply-and-Forward
//! - Per-interface PREQ and PERR batching under a minimum interval
//! - Tagging of data frames between the routing layer and the link layer
//!
//! The engine is sans-io. Timers go through a [`Scheduler`] passed to each
//! call, frames leave through a [`MeshTransport`].

pub mod batch;
pub mod config;
pub mod dedup;
pub mod error;
pub mod mac;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod stats;
pub mod table;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::HwmpConfig;
pub use error::{HwmpError, Result};
pub use mac::{HwmpMac, RxVerdict};
pub use node::{Delivered, MeshInterface, MeshPoint};
pub use protocol::{DataRoute, DropReason, HwmpProtocol, Outgoing, ReceiveContext};
pub use scheduler::{Scheduler, TimerEvent, TimerHandle, TimerSlot};
pub use stats::{MacStats, ProtocolStats};
pub use table::{NextHop, PathState, RouteEntry, RouteTable};
pub use transport::MeshTransport;
