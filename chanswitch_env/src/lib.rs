//! Channel-Switch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary between the channel-switch
//! protocol and the world it runs in. The protocol itself never touches a
//! socket, a radio or a clock; it talks to the collaborators defined here:
//!
//! - Time (`SwitchContext::now()`, `sleep()`)
//! - Transport (`Transport::open/send/close`)
//! - Link layer (`LinkLayer::request_interference_scan`, `switch_channel`)
//! - Timers (`TimerService::arm_timer`)
//!
//! Completions of asynchronous requests (scan results, own address, packet
//! arrival, timer expiry) are delivered back to the protocol as events by
//! whoever drives it: the discrete-event harness in simulation, or a
//! real-time loop paced by [`TokioContext`].
//!
//! # Example
//!
//! ```ignore
//! use chanswitch_env::{ConnectionId, LinkLayer, Transport};
//!
//! fn kick<E: Transport + LinkLayer>(env: &mut E, conn: ConnectionId) {
//!     env.request_own_address(conn);
//!     env.send(conn, &[0x01, 0x07, 0xFF]).ok();
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::SwitchContext;
pub use network::{LinkLayer, TimerService, Transport};
pub use types::{Channel, ChannelInterference, ChannelMask, ConnectionId, NodeId, ScanReport};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
