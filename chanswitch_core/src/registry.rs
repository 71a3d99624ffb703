//! Session registry - maps transport connections to live protocol sessions.
//!
//! The registry is the only entry point the surrounding framework uses. Each
//! `on_*` method routes one event to the session's state machine and returns
//! the commands it produced; [`SessionRegistry::apply`] then executes them
//! against the collaborators.
//!
//! ```ignore
//! let commands = registry.on_packet_received(conn, &bytes, now)?;
//! registry.apply(conn, commands, &mut env)?;
//! ```
//!
//! An event for a connection the registry has never seen is a bookkeeping
//! bug in the caller and comes back as [`RegistryError::UnknownConnection`].
//! Protocol violations never leave the registry: they are logged, counted on
//! the session and dropped.

use crate::command::Command;
use crate::config::{ConfigError, ProtocolConfig};
use crate::error::ProtocolError;
use crate::initiator::Initiator;
use crate::responder::Responder;
use crate::stats::SessionStats;
use crate::timer::TimerToken;
use crate::wire::FrameDecoder;
use chanswitch_env::{Channel, ConnectionId, LinkLayer, NodeId, ScanReport, TimerService, Transport};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures that indicate a caller bug rather than a protocol condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("{operation} is not available on {role:?} session {conn}")]
    WrongRole {
        conn: ConnectionId,
        operation: &'static str,
        role: Role,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Side of the protocol a session plays; fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Role-specific state machine.
#[derive(Debug, Clone)]
pub enum Machine {
    Initiator(Initiator),
    Responder(Responder),
}

impl Machine {
    pub fn role(&self) -> Role {
        match self {
            Machine::Initiator(_) => Role::Initiator,
            Machine::Responder(_) => Role::Responder,
        }
    }

    fn stats(&self) -> &SessionStats {
        match self {
            Machine::Initiator(m) => m.stats(),
            Machine::Responder(m) => m.stats(),
        }
    }

    fn stats_mut(&mut self) -> &mut SessionStats {
        match self {
            Machine::Initiator(m) => m.stats_mut(),
            Machine::Responder(m) => m.stats_mut(),
        }
    }
}

/// One protocol session bound to one transport connection.
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    local_addr: NodeId,
    remote_addr: NodeId,
    opened_at: Duration,
    machine: Machine,
    decoder: FrameDecoder,
    closed: bool,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn local_addr(&self) -> NodeId {
        self.local_addr
    }

    pub fn remote_addr(&self) -> NodeId {
        self.remote_addr
    }

    pub fn opened_at(&self) -> Duration {
        self.opened_at
    }

    pub fn role(&self) -> Role {
        self.machine.role()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn initiator(&self) -> Option<&Initiator> {
        match &self.machine {
            Machine::Initiator(m) => Some(m),
            Machine::Responder(_) => None,
        }
    }

    pub fn responder(&self) -> Option<&Responder> {
        match &self.machine {
            Machine::Responder(m) => Some(m),
            Machine::Initiator(_) => None,
        }
    }

    /// Channel this side believes it is on.
    pub fn current_channel(&self) -> Channel {
        match &self.machine {
            Machine::Initiator(m) => m.current_channel(),
            Machine::Responder(m) => m.current_channel(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        self.machine.stats()
    }

    pub fn violations(&self) -> u64 {
        self.stats().violations
    }

    /// Logs and counts a protocol violation, passing commands through.
    fn absorb(&mut self, result: Result<Vec<Command>, ProtocolError>) -> Vec<Command> {
        match result {
            Ok(commands) => commands,
            Err(error) => {
                self.machine.stats_mut().violations += 1;
                warn!(conn = %self.connection_id, role = ?self.role(), %error, "protocol violation, input discarded");
                Vec::new()
            }
        }
    }
}

/// Connection id → session table for one station.
#[derive(Debug)]
pub struct SessionRegistry {
    config: ProtocolConfig,
    sessions: HashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions all use `config`.
    pub fn new(config: ProtocolConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Session> {
        self.sessions.get(&conn)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connections whose violation count reached `threshold`.
    pub fn misbehaving(&self, threshold: u64) -> Vec<ConnectionId> {
        let mut conns: Vec<_> = self
            .sessions
            .values()
            .filter(|s| !s.closed && s.violations() >= threshold)
            .map(|s| s.connection_id)
            .collect();
        conns.sort();
        conns
    }

    /// Creates the session for a freshly opened connection.
    pub fn on_session_opened(
        &mut self,
        conn: ConnectionId,
        local_addr: NodeId,
        remote_addr: NodeId,
        role: Role,
        now: Duration,
    ) -> Result<Vec<Command>, RegistryError> {
        if self.sessions.contains_key(&conn) {
            return Err(RegistryError::DuplicateConnection(conn));
        }

        let mut commands = Vec::new();
        let machine = match role {
            Role::Initiator => {
                let mut initiator = Initiator::new(&self.config);
                commands = initiator.on_opened(now);
                Machine::Initiator(initiator)
            }
            Role::Responder => Machine::Responder(Responder::new(&self.config)),
        };

        info!(%conn, %local_addr, %remote_addr, ?role, "session opened");
        self.sessions.insert(
            conn,
            Session {
                connection_id: conn,
                local_addr,
                remote_addr,
                opened_at: now,
                machine,
                decoder: FrameDecoder::new(),
                closed: false,
            },
        );
        Ok(commands)
    }

    /// Marks the session closed. Later events for it are ignored and no
    /// packet is sent on it again. The entry stays until the owner of the
    /// connection destroys it with [`Self::remove`].
    pub fn on_session_closed(&mut self, conn: ConnectionId) -> Result<(), RegistryError> {
        let session = self.session_mut(conn)?;
        if !session.closed {
            session.closed = true;
            info!(%conn, stats = ?session.stats(), "session closed");
        }
        Ok(())
    }

    /// Drops the session entry entirely.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Session> {
        self.sessions.remove(&conn)
    }

    pub fn on_packet_received(
        &mut self,
        conn: ConnectionId,
        bytes: &[u8],
    ) -> Result<Vec<Command>, RegistryError> {
        let Some(session) = self.live_session(conn)? else {
            return Ok(Vec::new());
        };

        session.decoder.extend(bytes);
        let mut commands = Vec::new();
        while let Some(decoded) = session.decoder.next_packet() {
            let result = match decoded {
                Ok(packet) => {
                    debug!(%conn, kind = %packet.kind(), "packet received");
                    match &mut session.machine {
                        Machine::Initiator(m) => m.on_packet(packet),
                        Machine::Responder(m) => m.on_packet(packet),
                    }
                }
                Err(err) => Err(ProtocolError::from(err)),
            };
            commands.extend(session.absorb(result));
        }
        Ok(commands)
    }

    pub fn on_timer_fired(
        &mut self,
        conn: ConnectionId,
        token: TimerToken,
    ) -> Result<Vec<Command>, RegistryError> {
        let Some(session) = self.live_session(conn)? else {
            return Ok(Vec::new());
        };
        Ok(match &mut session.machine {
            Machine::Initiator(m) => m.on_timer(token),
            Machine::Responder(m) => m.on_timer(token),
        })
    }

    pub fn on_scan_complete(
        &mut self,
        conn: ConnectionId,
        report: ScanReport,
    ) -> Result<Vec<Command>, RegistryError> {
        let Some(session) = self.live_session(conn)? else {
            return Ok(Vec::new());
        };
        let result = match &mut session.machine {
            Machine::Responder(m) => m.on_scan_complete(report),
            Machine::Initiator(_) => Err(ProtocolError::unexpected_event("ScanComplete", "Initiator")),
        };
        Ok(session.absorb(result))
    }

    pub fn on_address_resolved(
        &mut self,
        conn: ConnectionId,
        address: NodeId,
    ) -> Result<Vec<Command>, RegistryError> {
        let Some(session) = self.live_session(conn)? else {
            return Ok(Vec::new());
        };
        let result = match &mut session.machine {
            Machine::Initiator(m) => Ok(m.on_address_resolved(address)),
            Machine::Responder(_) => Err(ProtocolError::unexpected_event("AddressResolved", "Responder")),
        };
        Ok(session.absorb(result))
    }

    /// Higher-layer request for a mid-session reselection.
    pub fn on_scan_trigger_requested(
        &mut self,
        conn: ConnectionId,
        now: Duration,
    ) -> Result<Vec<Command>, RegistryError> {
        let Some(session) = self.live_session(conn)? else {
            return Ok(Vec::new());
        };
        match &mut session.machine {
            Machine::Initiator(m) => Ok(m.on_scan_requested(now)),
            Machine::Responder(_) => Err(RegistryError::WrongRole {
                conn,
                operation: "scan trigger",
                role: Role::Responder,
            }),
        }
    }

    /// Executes `commands` for `conn` against the collaborators.
    pub fn apply<E>(
        &mut self,
        conn: ConnectionId,
        commands: Vec<Command>,
        env: &mut E,
    ) -> Result<(), RegistryError>
    where
        E: Transport + LinkLayer + TimerService<TimerToken>,
    {
        let session = self.session_mut(conn)?;
        for command in commands {
            match command {
                Command::Send(packet) => {
                    if session.closed {
                        session.machine.stats_mut().packets_suppressed += 1;
                        debug!(%conn, kind = %packet.kind(), "session closed, send suppressed");
                        continue;
                    }
                    match env.send(conn, &packet.encode()) {
                        Ok(()) => session.machine.stats_mut().packets_sent += 1,
                        Err(err) => {
                            session.machine.stats_mut().packets_suppressed += 1;
                            debug!(%conn, kind = %packet.kind(), %err, "transport refused send");
                        }
                    }
                }
                Command::ArmTimer { token, delay } => env.arm_timer(conn, token, delay),
                Command::RequestOwnAddress => env.request_own_address(conn),
                Command::RequestScan { mask } => env.request_interference_scan(conn, mask),
                Command::SwitchChannel { from, to } => env.switch_channel(conn, from, to),
            }
        }
        Ok(())
    }

    fn session_mut(&mut self, conn: ConnectionId) -> Result<&mut Session, RegistryError> {
        self.sessions
            .get_mut(&conn)
            .ok_or(RegistryError::UnknownConnection(conn))
    }

    /// `Ok(None)` for a closed session, whose events are dropped.
    fn live_session(&mut self, conn: ConnectionId) -> Result<Option<&mut Session>, RegistryError> {
        let session = self.session_mut(conn)?;
        if session.closed {
            debug!(%conn, "event for closed session ignored");
            return Ok(None);
        }
        Ok(Some(session))
    }
}
