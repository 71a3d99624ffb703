//! Collaborator traits consumed by the channel-switch protocol.

use crate::error::EnvError;
use crate::types::{Channel, ChannelMask, ConnectionId, NodeId};
use std::time::Duration;

/// Connection-oriented, ordered, reliable byte-stream transport.
///
/// # Implementations
///
/// - **Simulation**: `SimTransport` with configurable latency and drop windows
///
/// # Packet Flow
///
/// ```text
/// Station A                 Transport                Station B
///   |                           |                        |
///   |-- send(conn_a, bytes) --->|                        |
///   |                           |-- [latency] ---------->|
///   |                           |                        |-- on_packet_received(conn_b, bytes)
/// ```
///
/// Receive and close notifications are not part of this trait: the driver
/// delivers them to the session registry as events.
pub trait Transport {
    /// Opens a connection between two stations and returns the local handle.
    fn open(&mut self, local: NodeId, remote: NodeId) -> Result<ConnectionId, EnvError>;

    /// Queues bytes for in-order delivery to the peer of `conn`.
    ///
    /// # Returns
    /// * `Ok(())` - Bytes queued for delivery
    /// * `Err(EnvError::TransportError)` - Connection already closed
    fn send(&mut self, conn: ConnectionId, bytes: &[u8]) -> Result<(), EnvError>;

    /// Closes the connection. Both ends are notified through `on_session_closed`.
    fn close(&mut self, conn: ConnectionId);
}

/// Physical/link layer of a station.
///
/// Scans and address lookups complete asynchronously: the link layer answers
/// later with an `on_scan_complete` / `on_address_resolved` event for the same
/// connection.
pub trait LinkLayer {
    /// Asks for this station's own link-layer address.
    fn request_own_address(&mut self, conn: ConnectionId);

    /// Starts an interference sweep over the channels in `mask`.
    fn request_interference_scan(&mut self, conn: ConnectionId, mask: ChannelMask);

    /// Retunes the radio. Assumed to always succeed.
    fn switch_channel(&mut self, conn: ConnectionId, from: Channel, to: Channel);
}

/// One-shot timers tagged with a connection id.
///
/// A timer fires at most once per arm and cannot be cancelled; the protocol
/// recognises superseded timers by their token when they fire.
pub trait TimerService<T> {
    /// Arms a timer that fires `token` for `conn` after `delay`.
    fn arm_timer(&mut self, conn: ConnectionId, token: T, delay: Duration);
}
