//! Side effects requested by the state machines.

use crate::timer::TimerToken;
use crate::wire::Packet;
use chanswitch_env::{Channel, ChannelMask};
use std::time::Duration;

/// One collaborator call, produced by a handler and executed by
/// [`SessionRegistry::apply`](crate::registry::SessionRegistry::apply).
///
/// Handlers never call collaborators directly; returning commands keeps them
/// pure and lets tests inspect exactly what a transition would do.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a packet to the peer (suppressed once the session is closed)
    Send(Packet),

    /// Arm a one-shot timer
    ArmTimer { token: TimerToken, delay: Duration },

    /// Ask the link layer for this station's address
    RequestOwnAddress,

    /// Ask the link layer for an interference sweep
    RequestScan { mask: ChannelMask },

    /// Retune the local radio
    SwitchChannel { from: Channel, to: Channel },
}

impl Command {
    /// Returns the packet if this is a send.
    pub fn as_packet(&self) -> Option<&Packet> {
        match self {
            Command::Send(packet) => Some(packet),
            _ => None,
        }
    }
}
