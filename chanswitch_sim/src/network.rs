//! Simulated transport with fault injection.

use chanswitch_env::{ConnectionId, EnvError, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// One side of a simulated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub local: NodeId,
    pub remote: NodeId,
    pub open: bool,
}

/// Where and when a routed packet lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub latency: Duration,
}

/// Why the network swallowed a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Window,
    Rule,
    Loss,
}

/// A time span during which one direction of a link drops everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropWindow {
    pub from: NodeId,
    pub to: NodeId,
    pub start: Duration,
    pub end: Duration,
}

/// Drops the next `remaining` packets whose type byte matches.
#[derive(Debug, Clone, Copy)]
struct DropRule {
    from: NodeId,
    type_byte: u8,
    remaining: u32,
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Packets accepted for delivery
    pub delivered: u64,

    /// Packets swallowed by fault injection
    pub dropped: u64,

    /// Sends refused because the connection was closed
    pub refused: u64,
}

/// Network controller for fault injection.
#[derive(Debug, Clone)]
pub struct SimNetworkController {
    /// Latency for links without an explicit setting
    default_latency: Duration,

    /// Per-direction latency
    link_latency: HashMap<(NodeId, NodeId), Duration>,

    /// Per-direction packet loss rate (0.0 - 1.0)
    link_loss: HashMap<(NodeId, NodeId), f64>,

    /// Scheduled outages
    drop_windows: Vec<DropWindow>,

    /// Targeted drops by packet type
    drop_rules: Vec<DropRule>,
}

impl SimNetworkController {
    /// Creates a controller with a uniform one-way latency.
    pub fn new(default_latency: Duration) -> Self {
        Self {
            default_latency,
            link_latency: HashMap::new(),
            link_loss: HashMap::new(),
            drop_windows: Vec::new(),
            drop_rules: Vec::new(),
        }
    }

    /// Sets latency for one direction of a link.
    pub fn set_latency(&mut self, from: NodeId, to: NodeId, latency: Duration) {
        self.link_latency.insert((from, to), latency);
    }

    /// Gets the latency for a link direction.
    pub fn get_latency(&self, from: NodeId, to: NodeId) -> Duration {
        self.link_latency
            .get(&(from, to))
            .copied()
            .unwrap_or(self.default_latency)
    }

    /// Sets packet loss rate for a link direction.
    pub fn set_loss(&mut self, from: NodeId, to: NodeId, loss_rate: f64) {
        self.link_loss.insert((from, to), loss_rate.clamp(0.0, 1.0));
    }

    /// Gets the loss rate for a link direction (default 0.0).
    pub fn get_loss(&self, from: NodeId, to: NodeId) -> f64 {
        self.link_loss.get(&(from, to)).copied().unwrap_or(0.0)
    }

    /// Drops everything sent `from` → `to` in `[start, end)`.
    pub fn drop_window(&mut self, from: NodeId, to: NodeId, start: Duration, end: Duration) {
        self.drop_windows.push(DropWindow { from, to, start, end });
    }

    /// Drops the next `count` packets from `from` whose first byte is `type_byte`.
    pub fn drop_next(&mut self, from: NodeId, type_byte: u8, count: u32) {
        self.drop_rules.push(DropRule {
            from,
            type_byte,
            remaining: count,
        });
    }

    /// Removes all outages, rules and loss rates.
    pub fn heal_all(&mut self) {
        self.drop_windows.clear();
        self.drop_rules.clear();
        self.link_loss.clear();
    }

    /// True while a drop window covers this direction at `now`.
    pub fn in_outage(&self, from: NodeId, to: NodeId, now: Duration) -> bool {
        self.drop_windows
            .iter()
            .any(|w| w.from == from && w.to == to && w.start <= now && now < w.end)
    }

    fn should_drop(
        &mut self,
        from: NodeId,
        to: NodeId,
        now: Duration,
        bytes: &[u8],
        rng: &mut ChaCha8Rng,
    ) -> Option<DropReason> {
        if self.in_outage(from, to, now) {
            return Some(DropReason::Window);
        }

        if let Some(first) = bytes.first() {
            if let Some(rule) = self
                .drop_rules
                .iter_mut()
                .find(|r| r.from == from && r.type_byte == *first && r.remaining > 0)
            {
                rule.remaining -= 1;
                return Some(DropReason::Rule);
            }
        }

        let loss = self.get_loss(from, to);
        if loss > 0.0 && rng.gen::<f64>() < loss {
            return Some(DropReason::Loss);
        }
        None
    }
}

/// Simulated connection table.
///
/// Routing only decides whether and when a packet arrives; the event loop
/// turns the returned [`Delivery`] into a receive event.
#[derive(Debug)]
pub struct SimTransport {
    endpoints: BTreeMap<ConnectionId, Endpoint>,
    next_conn: u64,
    controller: SimNetworkController,
    rng: ChaCha8Rng,
    stats: TransportStats,
}

impl SimTransport {
    pub fn new(controller: SimNetworkController, seed: u64) -> Self {
        Self {
            endpoints: BTreeMap::new(),
            next_conn: 1,
            controller,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: TransportStats::default(),
        }
    }

    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SimNetworkController {
        &mut self.controller
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn endpoint(&self, conn: ConnectionId) -> Option<&Endpoint> {
        self.endpoints.get(&conn)
    }

    /// Registers the local end of a connection.
    pub fn open_endpoint(&mut self, local: NodeId, remote: NodeId) -> ConnectionId {
        let conn = ConnectionId(self.next_conn);
        self.next_conn += 1;
        self.endpoints.insert(
            conn,
            Endpoint {
                local,
                remote,
                open: true,
            },
        );
        debug!(%conn, %local, %remote, "endpoint opened");
        conn
    }

    /// The matching endpoint on the remote station.
    pub fn peer_of(&self, conn: ConnectionId) -> Option<ConnectionId> {
        let ep = self.endpoints.get(&conn)?;
        self.endpoints
            .iter()
            .find(|(_, other)| other.local == ep.remote && other.remote == ep.local)
            .map(|(id, _)| *id)
    }

    /// Decides the fate of one packet sent on `conn` at `now`.
    ///
    /// # Returns
    /// * `Ok(Some(delivery))` - Packet will arrive after `delivery.latency`
    /// * `Ok(None)` - Packet lost to fault injection
    /// * `Err(..)` - Connection unknown or closed
    pub fn route(
        &mut self,
        now: Duration,
        conn: ConnectionId,
        bytes: &[u8],
    ) -> Result<Option<Delivery>, EnvError> {
        let ep = *self
            .endpoints
            .get(&conn)
            .ok_or_else(|| EnvError::unknown_connection(conn))?;
        let peer = self.peer_of(conn).ok_or_else(|| EnvError::unreachable(ep.remote))?;
        let peer_open = self.endpoints.get(&peer).map_or(false, |p| p.open);
        if !ep.open || !peer_open {
            self.stats.refused += 1;
            return Err(EnvError::transport(format!("{conn} is closed")));
        }

        if let Some(reason) = self
            .controller
            .should_drop(ep.local, ep.remote, now, bytes, &mut self.rng)
        {
            self.stats.dropped += 1;
            debug!(%conn, ?reason, len = bytes.len(), "packet dropped");
            return Ok(None);
        }

        self.stats.delivered += 1;
        Ok(Some(Delivery {
            to: peer,
            latency: self.controller.get_latency(ep.local, ep.remote),
        }))
    }

    /// Closes both ends of the link and returns the peer to notify.
    pub fn close_endpoint(&mut self, conn: ConnectionId) -> Option<ConnectionId> {
        let peer = self.peer_of(conn);
        for id in std::iter::once(conn).chain(peer) {
            if let Some(ep) = self.endpoints.get_mut(&id) {
                ep.open = false;
            }
        }
        peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(latency_ms: u64) -> (SimTransport, NodeId, NodeId, ConnectionId, ConnectionId) {
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);
        let mut transport = SimTransport::new(SimNetworkController::new(Duration::from_millis(latency_ms)), 7);
        let ca = transport.open_endpoint(a, b);
        let cb = transport.open_endpoint(b, a);
        (transport, a, b, ca, cb)
    }

    #[test]
    fn test_route_reaches_peer() {
        let (mut transport, _, _, ca, cb) = linked(5);
        assert_eq!(transport.peer_of(ca), Some(cb));
        assert_eq!(transport.peer_of(cb), Some(ca));

        let delivery = transport.route(Duration::ZERO, ca, &[0x03]).unwrap().unwrap();
        assert_eq!(delivery.to, cb);
        assert_eq!(delivery.latency, Duration::from_millis(5));
        assert_eq!(transport.stats().delivered, 1);
    }

    #[test]
    fn test_network_controller_latency() {
        let mut controller = SimNetworkController::new(Duration::ZERO);
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);

        assert_eq!(controller.get_latency(a, b), Duration::ZERO);

        controller.set_latency(a, b, Duration::from_millis(100));
        assert_eq!(controller.get_latency(a, b), Duration::from_millis(100));

        // Reverse direction is separate
        assert_eq!(controller.get_latency(b, a), Duration::ZERO);
    }

    #[test]
    fn test_drop_window_is_directional() {
        let (mut transport, a, b, ca, cb) = linked(1);
        transport
            .controller_mut()
            .drop_window(a, b, Duration::from_millis(10), Duration::from_millis(20));

        assert!(transport.route(Duration::from_millis(9), ca, &[0x03]).unwrap().is_some());
        assert!(transport.route(Duration::from_millis(10), ca, &[0x03]).unwrap().is_none());
        assert!(transport.route(Duration::from_millis(15), cb, &[0x03]).unwrap().is_some());
        assert!(transport.route(Duration::from_millis(20), ca, &[0x03]).unwrap().is_some());
        assert_eq!(transport.stats().dropped, 1);
    }

    #[test]
    fn test_drop_next_matches_type_byte() {
        let (mut transport, a, _, ca, _) = linked(1);
        transport.controller_mut().drop_next(a, 0x03, 1);

        assert!(transport.route(Duration::ZERO, ca, &[0x04]).unwrap().is_some());
        assert!(transport.route(Duration::ZERO, ca, &[0x03]).unwrap().is_none());
        assert!(transport.route(Duration::ZERO, ca, &[0x03]).unwrap().is_some());
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let (mut transport, a, b, ca, _) = linked(1);
        transport.controller_mut().set_loss(a, b, 1.5);
        assert_eq!(transport.controller().get_loss(a, b), 1.0);
        for _ in 0..10 {
            assert!(transport.route(Duration::ZERO, ca, &[0x01, 0, 0]).unwrap().is_none());
        }

        transport.controller_mut().heal_all();
        assert!(transport.route(Duration::ZERO, ca, &[0x01, 0, 0]).unwrap().is_some());
    }

    #[test]
    fn test_closed_link_refuses_sends() {
        let (mut transport, _, _, ca, cb) = linked(1);
        assert_eq!(transport.close_endpoint(ca), Some(cb));

        assert!(matches!(
            transport.route(Duration::ZERO, cb, &[0x03]),
            Err(EnvError::TransportError(_))
        ));
        assert!(!transport.endpoint(ca).unwrap().open);
        assert_eq!(transport.stats().refused, 1);
    }

    #[test]
    fn test_unknown_connection() {
        let (mut transport, _, _, _, _) = linked(1);
        assert!(matches!(
            transport.route(Duration::ZERO, ConnectionId(77), &[0x03]),
            Err(EnvError::UnknownConnection(_))
        ));
    }
}
