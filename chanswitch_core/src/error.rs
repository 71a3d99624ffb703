//! Protocol-level errors.
//!
//! None of these end a session. The registry logs them as warnings, counts
//! them on the session and discards the offending input.

use crate::wire::{CodecError, PacketKind};
use chanswitch_env::Channel;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed packet: {0}")]
    Malformed(#[from] CodecError),

    #[error("{packet} has no transition in state {state}")]
    UnexpectedPacket {
        packet: PacketKind,
        state: &'static str,
    },

    #[error("{event} has no transition in state {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: &'static str,
    },

    #[error("Proposed channel {0} is not permitted")]
    ChannelNotPermitted(Channel),
}

impl ProtocolError {
    pub fn unexpected_packet(packet: PacketKind, state: &'static str) -> Self {
        Self::UnexpectedPacket { packet, state }
    }

    pub fn unexpected_event(event: &'static str, state: &'static str) -> Self {
        Self::UnexpectedEvent { event, state }
    }
}
