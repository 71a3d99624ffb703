//! SimWorld - two stations, one link, one event loop.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           SimWorld                            │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │ EventQueue (virtual time, FIFO on ties)                 │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │        │ dispatch                         │ dispatch          │
//! │  ┌─────▼──────┐    SimTransport     ┌─────▼──────┐            │
//! │  │ Initiator  │◄───────────────────►│ Responder  │            │
//! │  │ registry   │  latency / drops    │ registry   │            │
//! │  └─────┬──────┘                     └─────┬──────┘            │
//! │        │ retune / scan                    │                   │
//! │  ┌─────▼──────────────────────────────────▼──────┐            │
//! │  │ SimLinkLayer ◄── SpectrumOracle (ground truth)│            │
//! │  └───────────────────────────────────────────────┘            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator call a session makes becomes a future event: packets
//! arrive after the link latency, scans complete after the scan latency and
//! timers fire at their deadline. One event is handled to completion before
//! the next is popped.

use crate::context::SimContext;
use crate::error::SimError;
use crate::link::SimLinkLayer;
use crate::network::{SimNetworkController, SimTransport};
use crate::oracle::SpectrumOracle;
use crate::scheduler::EventQueue;

use chanswitch_core::{ProtocolConfig, RegistryError, Role, Session, SessionRegistry, TimerToken};
use chanswitch_env::{
    Channel, ChannelMask, ConnectionId, EnvError, LinkLayer, NodeId, ScanReport, SwitchContext, TimerService,
    Transport,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// One-way link latency
    pub latency: Duration,

    /// Time from scan request to scan report
    pub scan_latency: Duration,

    /// Time from address request to answer
    pub address_latency: Duration,

    /// Channels the radios can tune to (indices `0..channel_count`)
    pub channel_count: u8,

    /// Measurement noise on scan reports (dB standard deviation)
    pub noise_std_db: f64,

    /// Random-walk step of the ambient floor (dB standard deviation, 0 = static)
    pub walk_std_db: f64,

    /// Spacing of random-walk steps
    pub walk_interval: Duration,

    /// Explicit ambient floor per channel; random when `None`
    pub spectrum_profile: Option<Vec<f64>>,

    /// Peer signal strength as seen by the responder (dBm)
    pub tx_rss_dbm: f64,

    /// Protocol parameters used by both stations
    pub protocol: ProtocolConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            latency: Duration::from_millis(5),
            scan_latency: Duration::from_millis(50),
            address_latency: Duration::from_millis(1),
            channel_count: 12,
            noise_std_db: 1.0,
            walk_std_db: 0.0,
            walk_interval: Duration::from_secs(1),
            spectrum_profile: None,
            tx_rss_dbm: -40.0,
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Something that happens to one connection at one instant.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PacketArrived(Vec<u8>),
    TimerFired(TimerToken),
    ScanComplete(ScanReport),
    AddressResolved(NodeId),
    ScanTriggerRequested,
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    pub conn: ConnectionId,
    pub kind: EventKind,
}

/// One radio retune, as recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelChange {
    pub at: Duration,
    pub role: Role,
    pub from: Channel,
    pub to: Channel,
}

/// Time the two radios spent on different channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MismatchStats {
    pub longest: Duration,
    pub total: Duration,
    pub episodes: u64,
}

/// Handle to a simulated station.
#[derive(Debug)]
struct Station {
    role: Role,
    node: NodeId,
    peer: NodeId,
    conn: ConnectionId,
    registry: SessionRegistry,

    /// Session removed from the registry after its connection closed
    retired: Option<Session>,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    context: SimContext,

    queue: EventQueue<SimEvent>,
    transport: SimTransport,
    link: SimLinkLayer,

    /// Ground truth spectrum
    oracle: SpectrumOracle,

    /// Initiator first, responder second
    stations: Vec<Station>,

    timeline: Vec<ChannelChange>,
    mismatch_since: Option<Duration>,
    mismatch: MismatchStats,
    events_processed: u64,
    started: bool,
}

impl SimWorld {
    /// Creates a world with both stations attached to one link.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.protocol.validate()?;

        // Derive separate seeds for different subsystems
        let context = SimContext::new(config.seed);
        let spectrum_seed = context.derive_seed(1);
        let network_seed = context.derive_seed(2);
        let noise_seed = context.derive_seed(3);

        let mut oracle = match &config.spectrum_profile {
            Some(profile) => SpectrumOracle::with_profile(spectrum_seed, profile.clone()),
            None => SpectrumOracle::new(spectrum_seed, config.channel_count),
        };
        oracle.set_walk(config.walk_std_db, config.walk_interval);
        oracle.set_tx_rss_dbm(config.tx_rss_dbm);

        let mut transport = SimTransport::new(SimNetworkController::new(config.latency), network_seed);
        let mut link = SimLinkLayer::new(noise_seed, config.noise_std_db, config.scan_latency, config.address_latency);

        let initiator = NodeId::from_seed(context.derive_seed(10));
        let responder = NodeId::from_seed(context.derive_seed(11));
        let mut stations = Vec::with_capacity(2);
        for (role, node, peer) in [
            (Role::Initiator, initiator, responder),
            (Role::Responder, responder, initiator),
        ] {
            let conn = transport.open_endpoint(node, peer);
            link.register(conn, node, config.protocol.initial_channel);
            stations.push(Station {
                role,
                node,
                peer,
                conn,
                registry: SessionRegistry::new(config.protocol.clone())?,
                retired: None,
            });
        }

        info!(seed = config.seed, %initiator, %responder, "world created");

        Ok(Self {
            config,
            context,
            queue: EventQueue::new(),
            transport,
            link,
            oracle,
            stations,
            timeline: Vec::new(),
            mismatch_since: None,
            mismatch: MismatchStats::default(),
            events_processed: 0,
            started: false,
        })
    }

    pub fn context(&self) -> &SimContext {
        &self.context
    }

    pub fn now(&self) -> Duration {
        self.context.now()
    }

    pub fn oracle(&self) -> &SpectrumOracle {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut SpectrumOracle {
        &mut self.oracle
    }

    pub fn transport(&self) -> &SimTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut SimTransport {
        &mut self.transport
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Recorded retunes, in time order.
    pub fn timeline(&self) -> &[ChannelChange] {
        &self.timeline
    }

    fn station(&self, role: Role) -> &Station {
        match role {
            Role::Initiator => &self.stations[0],
            Role::Responder => &self.stations[1],
        }
    }

    pub fn node(&self, role: Role) -> NodeId {
        self.station(role).node
    }

    pub fn conn(&self, role: Role) -> ConnectionId {
        self.station(role).conn
    }

    /// The station's session, live or retired after close.
    pub fn session(&self, role: Role) -> Option<&Session> {
        let station = self.station(role);
        station.registry.get(station.conn).or(station.retired.as_ref())
    }

    /// Sessions still held by the stations' registries.
    pub fn open_sessions(&self) -> usize {
        self.stations.iter().map(|s| s.registry.len()).sum()
    }

    /// Channel the station's radio is physically tuned to.
    pub fn channel(&self, role: Role) -> Option<Channel> {
        self.link.channel_of(self.conn(role))
    }

    /// True when both radios share a channel.
    pub fn in_sync(&self) -> bool {
        self.channel(Role::Initiator) == self.channel(Role::Responder)
    }

    /// Mismatch accounting, including an episode still in progress.
    pub fn mismatch(&self) -> MismatchStats {
        let mut stats = self.mismatch;
        if let Some(since) = self.mismatch_since {
            let ongoing = self.now().saturating_sub(since);
            stats.total += ongoing;
            stats.longest = stats.longest.max(ongoing);
        }
        stats
    }

    /// Schedules a raw event.
    pub fn schedule(&mut self, at: Duration, event: SimEvent) {
        self.queue.push(at, event);
    }

    /// Higher layer on the initiator asks for a reselection at `at`.
    pub fn request_scan_at(&mut self, at: Duration) {
        let conn = self.conn(Role::Initiator);
        self.schedule(at, SimEvent { conn, kind: EventKind::ScanTriggerRequested });
    }

    /// Closes `role`'s session at `at`; the peer learns of it one latency later.
    pub fn close_at(&mut self, at: Duration, role: Role) {
        let conn = self.conn(role);
        self.schedule(at, SimEvent { conn, kind: EventKind::SessionClosed });
    }

    /// Delivers raw bytes to `role` at `at`, bypassing the transport.
    pub fn inject_at(&mut self, at: Duration, role: Role, bytes: Vec<u8>) {
        let conn = self.conn(role);
        self.schedule(at, SimEvent { conn, kind: EventKind::PacketArrived(bytes) });
    }

    /// Opens both sessions. Called implicitly by the run methods.
    pub fn start(&mut self) -> Result<(), SimError> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let now = self.now();
        for idx in 0..self.stations.len() {
            let Self { stations, queue, transport, link, oracle, timeline, .. } = self;
            let station = &mut stations[idx];
            let commands = station
                .registry
                .on_session_opened(station.conn, station.node, station.peer, station.role, now)?;
            let mut env = StationEnv { now, role: station.role, queue, transport, link, oracle, timeline };
            station.registry.apply(station.conn, commands, &mut env)?;
        }
        Ok(())
    }

    /// Handles the earliest pending event. Returns `false` when idle.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some((at, event)) = self.queue.pop() else {
            return Ok(false);
        };
        self.context.advance_to(at);
        self.oracle.advance_to(at);
        self.dispatch(at, event)?;
        self.events_processed += 1;
        Ok(true)
    }

    /// Runs every event due up to and including `end`, then parks the clock
    /// at `end`.
    pub fn run_until(&mut self, end: Duration) -> Result<(), SimError> {
        self.start()?;
        while let Some(at) = self.queue.peek_time() {
            if at > end {
                break;
            }
            self.step()?;
        }
        self.finish_at(end);
        Ok(())
    }

    /// Like [`Self::run_until`], but waits on `pacer` so virtual time tracks
    /// the pacer's clock.
    pub async fn run_paced<C: SwitchContext>(&mut self, end: Duration, pacer: &C) -> Result<(), SimError> {
        self.start()?;
        let origin = pacer.now().saturating_sub(self.now());
        while let Some(at) = self.queue.peek_time() {
            if at > end {
                break;
            }
            let elapsed = pacer.now().saturating_sub(origin);
            if at > elapsed {
                pacer.sleep(at - elapsed).await;
            }
            self.step()?;
        }
        self.finish_at(end);
        Ok(())
    }

    fn finish_at(&mut self, end: Duration) {
        self.context.advance_to(end);
        self.oracle.advance_to(end);
    }

    fn dispatch(&mut self, now: Duration, event: SimEvent) -> Result<(), SimError> {
        let conn = event.conn;
        let idx = self
            .stations
            .iter()
            .position(|s| s.conn == conn)
            .ok_or(RegistryError::UnknownConnection(conn))?;

        let Self { stations, queue, transport, link, oracle, timeline, .. } = self;
        let station = &mut stations[idx];
        if station.retired.is_some() {
            debug!(%conn, ?event.kind, "event for a removed session dropped");
            return Ok(());
        }
        let closing = event.kind == EventKind::SessionClosed;
        let registry = &mut station.registry;
        let mut env = StationEnv { now, role: station.role, queue, transport, link, oracle, timeline };

        let commands = match event.kind {
            EventKind::PacketArrived(bytes) => registry.on_packet_received(conn, &bytes)?,
            EventKind::TimerFired(token) => registry.on_timer_fired(conn, token)?,
            EventKind::ScanComplete(report) => registry.on_scan_complete(conn, report)?,
            EventKind::AddressResolved(address) => registry.on_address_resolved(conn, address)?,
            EventKind::ScanTriggerRequested => registry.on_scan_trigger_requested(conn, now)?,
            EventKind::SessionClosed => {
                registry.on_session_closed(conn)?;
                if env.transport.endpoint(conn).map_or(false, |ep| ep.open) {
                    env.close(conn);
                }
                Vec::new()
            }
        };
        registry.apply(conn, commands, &mut env)?;
        if closing {
            station.retired = registry.remove(conn);
        }

        self.observe_channels(now);
        Ok(())
    }

    fn observe_channels(&mut self, now: Duration) {
        let in_sync = self.in_sync();
        match (self.mismatch_since, in_sync) {
            (None, false) => {
                self.mismatch_since = Some(now);
                self.mismatch.episodes += 1;
            }
            (Some(since), true) => {
                let span = now.saturating_sub(since);
                self.mismatch.total += span;
                self.mismatch.longest = self.mismatch.longest.max(span);
                self.mismatch_since = None;
                debug!(span_ms = span.as_millis() as u64, "radios back on one channel");
            }
            _ => {}
        }
    }
}

/// One station's view of the simulated collaborators during one dispatch.
struct StationEnv<'a> {
    now: Duration,
    role: Role,
    queue: &'a mut EventQueue<SimEvent>,
    transport: &'a mut SimTransport,
    link: &'a mut SimLinkLayer,
    oracle: &'a SpectrumOracle,
    timeline: &'a mut Vec<ChannelChange>,
}

impl Transport for StationEnv<'_> {
    fn open(&mut self, local: NodeId, remote: NodeId) -> Result<ConnectionId, EnvError> {
        Ok(self.transport.open_endpoint(local, remote))
    }

    fn send(&mut self, conn: ConnectionId, bytes: &[u8]) -> Result<(), EnvError> {
        if let Some(delivery) = self.transport.route(self.now, conn, bytes)? {
            self.queue.push(
                self.now + delivery.latency,
                SimEvent {
                    conn: delivery.to,
                    kind: EventKind::PacketArrived(bytes.to_vec()),
                },
            );
        }
        Ok(())
    }

    fn close(&mut self, conn: ConnectionId) {
        let Some(ep) = self.transport.endpoint(conn).copied() else {
            return;
        };
        if let Some(peer) = self.transport.close_endpoint(conn) {
            let latency = self.transport.controller().get_latency(ep.local, ep.remote);
            self.queue.push(self.now + latency, SimEvent { conn: peer, kind: EventKind::SessionClosed });
        }
        info!(%conn, role = ?self.role, "link closed");
    }
}

impl LinkLayer for StationEnv<'_> {
    fn request_own_address(&mut self, conn: ConnectionId) {
        match self.link.address_of(conn) {
            Some(address) => self.queue.push(
                self.now + self.link.address_latency(),
                SimEvent { conn, kind: EventKind::AddressResolved(address) },
            ),
            None => warn!(%conn, "address requested for a connection without a radio"),
        }
    }

    fn request_interference_scan(&mut self, conn: ConnectionId, mask: ChannelMask) {
        match self.link.measure(conn, mask, self.oracle, self.now) {
            Some(report) => self.queue.push(
                self.now + self.link.scan_latency(),
                SimEvent { conn, kind: EventKind::ScanComplete(report) },
            ),
            None => warn!(%conn, "scan requested for a connection without a radio"),
        }
    }

    fn switch_channel(&mut self, conn: ConnectionId, from: Channel, to: Channel) {
        match self.link.retune(conn, to) {
            Some(actual) => {
                if actual != from {
                    debug!(%conn, believed = %from, %actual, "session and radio disagreed on channel");
                }
                self.timeline.push(ChannelChange { at: self.now, role: self.role, from: actual, to });
            }
            None => warn!(%conn, "retune requested for a connection without a radio"),
        }
    }
}

impl TimerService<TimerToken> for StationEnv<'_> {
    fn arm_timer(&mut self, conn: ConnectionId, token: TimerToken, delay: Duration) {
        self.queue.push(self.now + delay, SimEvent { conn, kind: EventKind::TimerFired(token) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> SimConfig {
        SimConfig {
            noise_std_db: 0.0,
            spectrum_profile: Some(vec![-20.0, -60.0, -80.0, -70.0]),
            protocol: ProtocolConfig {
                channel_mask: ChannelMask::from_channels([Channel(1), Channel(2), Channel(3)]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_scan_moves_both_to_best_channel() {
        let mut world = SimWorld::new(quiet_config()).unwrap();
        world.run_until(Duration::from_secs(1)).unwrap();

        assert_eq!(world.channel(Role::Initiator), Some(Channel(2)));
        assert_eq!(world.channel(Role::Responder), Some(Channel(2)));
        assert!(world.in_sync());
        assert_eq!(world.timeline().len(), 2);
        assert_eq!(world.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_tx_power_feeds_scan_reports() {
        let mut world = SimWorld::new(SimConfig { tx_rss_dbm: -25.0, ..quiet_config() }).unwrap();
        world.run_until(Duration::from_secs(1)).unwrap();

        let sinr = world
            .session(Role::Responder)
            .and_then(|s| s.responder())
            .and_then(|r| r.last_evaluation())
            .map(|e| e.sinr_db);
        assert_eq!(sinr, Some(55.0));
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = || {
            let mut world = SimWorld::new(SimConfig {
                seed: 7,
                walk_std_db: 2.0,
                ..Default::default()
            })
            .unwrap();
            for k in 1..4 {
                world.request_scan_at(Duration::from_secs(6 * k));
            }
            world.run_until(Duration::from_secs(20)).unwrap();
            (world.timeline().to_vec(), world.events_processed())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_event_for_unknown_connection_is_fatal() {
        let mut world = SimWorld::new(quiet_config()).unwrap();
        world.schedule(
            Duration::from_millis(1),
            SimEvent { conn: ConnectionId(99), kind: EventKind::ScanTriggerRequested },
        );
        let err = world.run_until(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Registry(RegistryError::UnknownConnection(ConnectionId(99)))
        ));
    }

    #[test]
    fn test_invalid_protocol_config_rejected() {
        let config = SimConfig {
            protocol: ProtocolConfig {
                ack_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(SimWorld::new(config), Err(SimError::Config(_))));
    }

    #[test]
    fn test_close_propagates_to_peer() {
        let mut world = SimWorld::new(quiet_config()).unwrap();
        world.close_at(Duration::from_millis(500), Role::Initiator);
        world.run_until(Duration::from_secs(1)).unwrap();

        assert!(world.session(Role::Initiator).unwrap().is_closed());
        assert!(world.session(Role::Responder).unwrap().is_closed());
        assert!(!world.transport().endpoint(world.conn(Role::Responder)).unwrap().open);
        assert_eq!(world.open_sessions(), 0);
    }

    #[test]
    fn test_events_after_close_are_dropped() {
        let mut world = SimWorld::new(quiet_config()).unwrap();
        assert_eq!(world.open_sessions(), 2);
        world.close_at(Duration::from_millis(500), Role::Initiator);
        world.request_scan_at(Duration::from_millis(700));
        world.inject_at(Duration::from_millis(700), Role::Responder, vec![0x03]);
        world.run_until(Duration::from_secs(1)).unwrap();

        assert_eq!(world.open_sessions(), 0);
        let initiator = world.session(Role::Initiator).unwrap().stats();
        assert_eq!(initiator.scans_triggered, 1);
        assert_eq!(world.session(Role::Responder).unwrap().violations(), 0);
    }

    #[tokio::test]
    async fn test_paced_run_matches_unpaced() {
        let mut paced = SimWorld::new(quiet_config()).unwrap();
        let pacer = SimContext::new(0);
        paced.run_paced(Duration::from_millis(300), &pacer).await.unwrap();

        let mut plain = SimWorld::new(quiet_config()).unwrap();
        plain.run_until(Duration::from_millis(300)).unwrap();

        assert_eq!(paced.timeline(), plain.timeline());
        assert_eq!(paced.events_processed(), plain.events_processed());
    }
}
