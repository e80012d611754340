//! HWMP Mesh Simulator
//!
//! Deterministic discrete-event harness for the path selection crates:
//! - Event queue implementing the scheduler seam
//! - Undirected links with metric, loss and a constant delay
//! - YAML scenario files
//!
//! Fatal protocol errors abort the run and are returned to the caller.

pub mod event;
pub mod logging;
pub mod scenario;
pub mod sim;
pub mod transport;

pub use scenario::{LinkConfig, ScenarioConfig};
pub use sim::{SimStats, Simulator};
pub use transport::SimTransport;
