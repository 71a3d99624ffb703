//! Chanswitch Deterministic Simulation Harness
//!
//! This crate runs the channel-switch protocol between two simulated
//! stations inside a discrete-event loop where every source of
//! non-determinism is controlled:
//! - **Time**: a virtual clock that jumps from event to event
//! - **Network**: one link with configurable latency, outages and targeted drops
//! - **Spectrum**: a ground-truth oracle with drifting floors and jammers
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Usage
//!
//! ```ignore
//! use chanswitch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_duration(10.0)
//!     .run(ScenarioId::SilentPeer);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod link;
mod network;
mod oracle;
mod runner;
mod scheduler;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{ChannelEvent, JammerEvent, SimExport};
pub use link::SimLinkLayer;
pub use network::{Delivery, DropReason, DropWindow, Endpoint, SimNetworkController, SimTransport, TransportStats};
pub use oracle::{Jammer, SpectrumOracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::EventQueue;
pub use world::{ChannelChange, EventKind, MismatchStats, SimConfig, SimEvent, SimWorld};
