//! Chanswitch Core - Synchronized Channel-Switch Coordination Protocol
//!
//! Two stations sharing a wireless link agree on a less-interfered channel
//! and retune together, without losing each other if a packet goes missing:
//! 1. **Initiator**: asks the peer to scan (rate-limited by a backoff window)
//!    and follows the peer's proposal after a short ack delay
//! 2. **Responder**: scans, picks the channel with the best SINR and drives
//!    the change-ack / verify-ack handshake, switching on timeout and
//!    rolling back when the switch is never confirmed
//! 3. **Registry**: routes framework events to per-connection sessions and
//!    executes the commands they produce
//!
//! The state machines are pure: every handler returns a list of
//! [`Command`]s and never performs I/O. Timer tokens carry an epoch so a
//! timer armed for an earlier step is recognised and ignored.

pub mod command;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod initiator;
pub mod registry;
pub mod responder;
pub mod stats;
pub mod timer;
pub mod wire;

// Re-export key types for convenience
pub use command::Command;
pub use config::{ConfigError, ProtocolConfig};
pub use error::ProtocolError;
pub use evaluator::{evaluate, Evaluation};
pub use initiator::{Initiator, InitiatorPhase};
pub use registry::{Machine, RegistryError, Role, Session, SessionRegistry};
pub use responder::{Responder, ResponderPhase};
pub use stats::SessionStats;
pub use timer::{TimerFacade, TimerTag, TimerToken};
pub use wire::{CodecError, FrameDecoder, Packet, PacketKind};
