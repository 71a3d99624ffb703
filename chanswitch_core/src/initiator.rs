//! Initiator (TX role) state machine.
//!
//! The initiator decides *when* a reselection cycle starts and follows the
//! responder's proposal:
//!
//! ```text
//!   Idle ──trigger (backoff elapsed)──► ScanInit ──ScanTrigger──► peer
//!                                          │
//!            ChangeProposal(c) ◄── peer    │  next := c, send ChangeAck, arm AckDelay
//!                                          │
//!            AckDelay fires                │  retune current → c, send VerifyAck
//! ```
//!
//! The initiator never leaves ScanInit on its own: it has nothing left to
//! track once it has retuned. Further triggers are gated only by the backoff
//! timestamp.

use crate::command::Command;
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::stats::SessionStats;
use crate::timer::{TimerFacade, TimerTag, TimerToken};
use crate::wire::Packet;
use chanswitch_env::{Channel, ChannelMask, NodeId};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorPhase {
    Idle,
    ScanInit,
}

impl InitiatorPhase {
    pub fn name(self) -> &'static str {
        match self {
            InitiatorPhase::Idle => "Idle",
            InitiatorPhase::ScanInit => "ScanInit",
        }
    }
}

/// Initiator side of one session.
#[derive(Debug, Clone)]
pub struct Initiator {
    phase: InitiatorPhase,
    current_channel: Channel,
    /// Accepted proposal awaiting the ack delay
    next_channel: Option<Channel>,
    channel_mask: ChannelMask,
    backoff_window: Duration,
    /// Earliest time the next trigger is allowed
    next_trigger_at: Option<Duration>,
    ack_delay: Duration,
    initial_scan: bool,
    self_address: Option<NodeId>,
    address_requested: bool,
    /// A trigger is waiting for the own address
    trigger_pending: bool,
    timers: TimerFacade,
    stats: SessionStats,
}

impl Initiator {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            phase: InitiatorPhase::Idle,
            current_channel: config.initial_channel,
            next_channel: None,
            channel_mask: config.channel_mask,
            backoff_window: config.backoff_window,
            next_trigger_at: None,
            ack_delay: config.ack_delay,
            initial_scan: config.initial_scan,
            self_address: None,
            address_requested: false,
            trigger_pending: false,
            timers: TimerFacade::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> InitiatorPhase {
        self.phase
    }

    pub fn current_channel(&self) -> Channel {
        self.current_channel
    }

    pub fn next_channel(&self) -> Option<Channel> {
        self.next_channel
    }

    pub fn self_address(&self) -> Option<NodeId> {
        self.self_address
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// True while a new trigger would be refused.
    pub fn backoff_active(&self, now: Duration) -> bool {
        self.next_trigger_at.map_or(false, |at| now < at)
    }

    /// Connection established.
    pub fn on_opened(&mut self, now: Duration) -> Vec<Command> {
        if self.initial_scan {
            self.trigger(now)
        } else {
            Vec::new()
        }
    }

    /// Higher layer asks for a mid-session reselection.
    pub fn on_scan_requested(&mut self, now: Duration) -> Vec<Command> {
        self.trigger(now)
    }

    pub fn on_address_resolved(&mut self, address: NodeId) -> Vec<Command> {
        self.self_address = Some(address);
        self.address_requested = false;
        if self.trigger_pending {
            self.trigger_pending = false;
            vec![self.scan_trigger()]
        } else {
            Vec::new()
        }
    }

    pub fn on_packet(&mut self, packet: Packet) -> Result<Vec<Command>, ProtocolError> {
        match (self.phase, packet) {
            (InitiatorPhase::ScanInit, Packet::ChangeProposal { channel }) => {
                if !self.channel_mask.contains(channel) {
                    return Err(ProtocolError::ChannelNotPermitted(channel));
                }
                debug!(current = %self.current_channel, next = %channel, "accepting change proposal");
                self.next_channel = Some(channel);
                self.timers.advance();
                Ok(vec![
                    Command::Send(Packet::ChangeAck),
                    self.timers.arm(TimerTag::AckDelay, self.ack_delay),
                ])
            }
            (phase, packet) => Err(ProtocolError::unexpected_packet(packet.kind(), phase.name())),
        }
    }

    pub fn on_timer(&mut self, token: TimerToken) -> Vec<Command> {
        let next = match (token.tag, self.phase, self.next_channel) {
            (TimerTag::AckDelay, InitiatorPhase::ScanInit, Some(next))
                if self.timers.is_current(token) =>
            {
                next
            }
            _ => {
                self.stats.stale_timers += 1;
                debug!(?token, phase = self.phase.name(), "ignoring stale timer");
                return Vec::new();
            }
        };

        self.timers.advance();
        self.next_channel = None;
        let from = self.current_channel;
        self.current_channel = next;

        let mut commands = Vec::with_capacity(2);
        if from != next {
            self.stats.channel_switches += 1;
            commands.push(Command::SwitchChannel { from, to: next });
        }
        commands.push(Command::Send(Packet::VerifyAck));
        commands
    }

    fn trigger(&mut self, now: Duration) -> Vec<Command> {
        if self.backoff_active(now) {
            self.stats.triggers_suppressed += 1;
            debug!(?now, next_trigger_at = ?self.next_trigger_at, "scan trigger suppressed by backoff");
            return Vec::new();
        }

        self.phase = InitiatorPhase::ScanInit;
        self.next_trigger_at = Some(now + self.backoff_window);

        if self.self_address.is_some() {
            return vec![self.scan_trigger()];
        }

        self.trigger_pending = true;
        if self.address_requested {
            Vec::new()
        } else {
            self.address_requested = true;
            vec![Command::RequestOwnAddress]
        }
    }

    fn scan_trigger(&mut self) -> Command {
        self.stats.scans_triggered += 1;
        Command::Send(Packet::ScanTrigger {
            mask: self.channel_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            initial_scan: true,
            ..Default::default()
        }
    }

    fn ack_delay_token(commands: &[Command]) -> TimerToken {
        commands
            .iter()
            .find_map(|c| match c {
                Command::ArmTimer { token, .. } if token.tag == TimerTag::AckDelay => Some(*token),
                _ => None,
            })
            .expect("ack delay armed")
    }

    /// Initiator that has sent its first ScanTrigger at t=0.
    fn triggered() -> Initiator {
        let mut initiator = Initiator::new(&config());
        assert_eq!(initiator.on_opened(Duration::ZERO), vec![Command::RequestOwnAddress]);
        let commands = initiator.on_address_resolved(NodeId::from_seed(1));
        assert!(matches!(commands[0], Command::Send(Packet::ScanTrigger { .. })));
        initiator
    }

    #[test]
    fn test_open_requests_address_then_triggers() {
        let mut initiator = Initiator::new(&config());
        let commands = initiator.on_opened(Duration::ZERO);
        assert_eq!(commands, vec![Command::RequestOwnAddress]);
        assert_eq!(initiator.phase(), InitiatorPhase::ScanInit);

        let commands = initiator.on_address_resolved(NodeId::from_seed(1));
        assert_eq!(
            commands,
            vec![Command::Send(Packet::ScanTrigger {
                mask: ProtocolConfig::default().channel_mask
            })]
        );
        assert_eq!(initiator.stats().scans_triggered, 1);
        assert_eq!(initiator.self_address(), Some(NodeId::from_seed(1)));
    }

    #[test]
    fn test_no_initial_scan_when_disabled() {
        let mut initiator = Initiator::new(&ProtocolConfig {
            initial_scan: false,
            ..Default::default()
        });
        assert!(initiator.on_opened(Duration::ZERO).is_empty());
        assert_eq!(initiator.phase(), InitiatorPhase::Idle);
    }

    #[test]
    fn test_backoff_blocks_trigger_in_idle() {
        let mut initiator = Initiator::new(&config());
        initiator.next_trigger_at = Some(Duration::from_secs(5));
        assert_eq!(initiator.phase(), InitiatorPhase::Idle);
        assert!(initiator.backoff_active(Duration::from_secs(1)));

        let commands = initiator.on_scan_requested(Duration::from_secs(1));
        assert!(commands.is_empty());
        assert_eq!(initiator.phase(), InitiatorPhase::Idle);
        assert_eq!(initiator.stats().triggers_suppressed, 1);
        assert_eq!(initiator.stats().scans_triggered, 0);
    }

    #[test]
    fn test_trigger_allowed_after_backoff_window() {
        let mut initiator = triggered();
        assert!(initiator.on_scan_requested(Duration::from_secs(4)).is_empty());

        let commands = initiator.on_scan_requested(Duration::from_secs(5));
        assert!(matches!(commands[..], [Command::Send(Packet::ScanTrigger { .. })]));
        assert_eq!(initiator.stats().scans_triggered, 2);
        assert!(initiator.backoff_active(Duration::from_secs(9)));
    }

    #[test]
    fn test_address_requested_once_while_pending() {
        let mut initiator = Initiator::new(&ProtocolConfig {
            backoff_window: Duration::from_millis(10),
            ..config()
        });
        assert_eq!(initiator.on_opened(Duration::ZERO), vec![Command::RequestOwnAddress]);
        assert!(initiator.on_scan_requested(Duration::from_millis(20)).is_empty());

        let commands = initiator.on_address_resolved(NodeId::from_seed(3));
        assert_eq!(commands.len(), 1);
        assert_eq!(initiator.stats().scans_triggered, 1);
    }

    #[test]
    fn test_proposal_acked_then_switch_after_delay() {
        let mut initiator = triggered();
        let commands = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(6) })
            .unwrap();

        assert_eq!(commands[0], Command::Send(Packet::ChangeAck));
        match commands[1] {
            Command::ArmTimer { token, delay } => {
                assert_eq!(token.tag, TimerTag::AckDelay);
                assert_eq!(delay, Duration::from_millis(20));
            }
            ref other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(initiator.next_channel(), Some(Channel(6)));
        assert_eq!(initiator.current_channel(), Channel(1));

        let commands = initiator.on_timer(ack_delay_token(&commands));
        assert_eq!(
            commands,
            vec![
                Command::SwitchChannel { from: Channel(1), to: Channel(6) },
                Command::Send(Packet::VerifyAck),
            ]
        );
        assert_eq!(initiator.current_channel(), Channel(6));
        assert_eq!(initiator.next_channel(), None);
        assert_eq!(initiator.phase(), InitiatorPhase::ScanInit);
    }

    #[test]
    fn test_ack_delay_fires_once() {
        let mut initiator = triggered();
        let commands = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(6) })
            .unwrap();
        let token = ack_delay_token(&commands);

        assert_eq!(initiator.on_timer(token).len(), 2);
        assert!(initiator.on_timer(token).is_empty());
        assert_eq!(initiator.stats().stale_timers, 1);
        assert_eq!(initiator.stats().channel_switches, 1);
    }

    #[test]
    fn test_superseded_proposal_timer_is_stale() {
        let mut initiator = triggered();
        let first = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(6) })
            .unwrap();
        let second = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(11) })
            .unwrap();

        assert!(initiator.on_timer(ack_delay_token(&first)).is_empty());
        let commands = initiator.on_timer(ack_delay_token(&second));
        assert_eq!(commands[0], Command::SwitchChannel { from: Channel(1), to: Channel(11) });
    }

    #[test]
    fn test_proposal_in_idle_is_violation() {
        let mut initiator = Initiator::new(&ProtocolConfig {
            initial_scan: false,
            ..Default::default()
        });
        let err = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(6) })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedPacket { state: "Idle", .. }));
    }

    #[test]
    fn test_proposal_outside_mask_rejected() {
        let mut initiator = triggered();
        let err = initiator
            .on_packet(Packet::ChangeProposal { channel: Channel(14) })
            .unwrap_err();
        assert_eq!(err, ProtocolError::ChannelNotPermitted(Channel(14)));
        assert_eq!(initiator.next_channel(), None);
    }

    #[test]
    fn test_responder_packets_rejected() {
        let mut initiator = triggered();
        assert!(initiator.on_packet(Packet::ChangeAck).is_err());
        assert!(initiator.on_packet(Packet::VerifyAck).is_err());
        assert!(initiator
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::first(4) })
            .is_err());
    }
}
