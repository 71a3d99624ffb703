//! Responder (RX role) state machine.
//!
//! The responder measures, decides and owns the completion of a switch:
//!
//! ```text
//!   Idle ──ScanTrigger──► Scanning ──scan complete──► AwaitingChangeAck
//!    ▲                       │ (abstain)                 │        │
//!    └───────────────────────┘                 ChangeAck │        │ ChangeAckTimeout
//!    ▲                                        (switch)   │        │ (switch anyway)
//!    ├───────────────────────────────────────────────────┘        ▼
//!    │                                                   AwaitingVerifyAck
//!    └──────────────────── VerifyAck ◄───────────────────────┘    │
//!                                                                 │ VerifyAckTimeout
//!                      AwaitingChangeAck ◄──── rollback ──────────┘
//! ```
//!
//! Every transition out of an awaiting state bumps the timer epoch, so the
//! ack path and the timeout path can never both retune for one proposal.

use crate::command::Command;
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::evaluator::{evaluate, Evaluation};
use crate::stats::SessionStats;
use crate::timer::{TimerFacade, TimerTag, TimerToken};
use crate::wire::Packet;
use chanswitch_env::{Channel, ChannelInterference, ChannelMask, ScanReport};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderPhase {
    Idle,
    /// Sweep requested over `mask`
    Scanning { mask: ChannelMask },
    /// Proposal `from -> to` sent, waiting for ChangeAck
    AwaitingChangeAck { from: Channel, to: Channel },
    /// Retuned to `to` on timeout, waiting for VerifyAck
    AwaitingVerifyAck { from: Channel, to: Channel },
}

impl ResponderPhase {
    pub fn name(self) -> &'static str {
        match self {
            ResponderPhase::Idle => "Idle",
            ResponderPhase::Scanning { .. } => "Scanning",
            ResponderPhase::AwaitingChangeAck { .. } => "AwaitingChangeAck",
            ResponderPhase::AwaitingVerifyAck { .. } => "AwaitingVerifyAck",
        }
    }
}

/// Responder side of one session.
#[derive(Debug, Clone)]
pub struct Responder {
    phase: ResponderPhase,
    current_channel: Channel,
    channel_mask: ChannelMask,
    measured_tx_rss_dbm: Option<f64>,
    interference: Vec<ChannelInterference>,
    last_evaluation: Option<Evaluation>,
    change_ack_timeout: Duration,
    verify_ack_timeout: Duration,
    timers: TimerFacade,
    stats: SessionStats,
}

impl Responder {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            phase: ResponderPhase::Idle,
            current_channel: config.initial_channel,
            channel_mask: config.channel_mask,
            measured_tx_rss_dbm: None,
            interference: Vec::new(),
            last_evaluation: None,
            change_ack_timeout: config.change_ack_timeout,
            verify_ack_timeout: config.verify_ack_timeout,
            timers: TimerFacade::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> ResponderPhase {
        self.phase
    }

    pub fn current_channel(&self) -> Channel {
        self.current_channel
    }

    /// Target of the outstanding proposal, if any.
    pub fn next_channel(&self) -> Option<Channel> {
        match self.phase {
            ResponderPhase::AwaitingChangeAck { to, .. }
            | ResponderPhase::AwaitingVerifyAck { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn measured_tx_rss_dbm(&self) -> Option<f64> {
        self.measured_tx_rss_dbm
    }

    /// Interference table of the last sweep; empty once a decision was taken from it.
    pub fn interference(&self) -> &[ChannelInterference] {
        &self.interference
    }

    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.last_evaluation.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn on_packet(&mut self, packet: Packet) -> Result<Vec<Command>, ProtocolError> {
        match (self.phase, packet) {
            (ResponderPhase::Idle, Packet::ScanTrigger { mask }) => {
                let mask = mask.intersect(self.channel_mask);
                if mask.is_empty() {
                    self.stats.abstentions += 1;
                    debug!("scan trigger shares no channel with local mask");
                    return Ok(Vec::new());
                }
                self.phase = ResponderPhase::Scanning { mask };
                Ok(vec![Command::RequestScan { mask }])
            }

            (ResponderPhase::AwaitingChangeAck { from, to }, Packet::ChangeAck) => {
                self.timers.advance();
                self.phase = ResponderPhase::Idle;
                self.stats.fast_path_switches += 1;
                info!(%from, %to, "change acknowledged, switching");
                Ok(self.retune(to).into_iter().collect())
            }

            // Initiator already retuned and verified; catch up
            (ResponderPhase::AwaitingChangeAck { to, .. }, Packet::VerifyAck) => {
                self.timers.advance();
                self.phase = ResponderPhase::Idle;
                self.stats.verified += 1;
                info!(%to, "verify received while awaiting ack, following initiator");
                Ok(self.retune(to).into_iter().collect())
            }

            (ResponderPhase::AwaitingVerifyAck { to, .. }, Packet::VerifyAck) => {
                self.timers.advance();
                self.phase = ResponderPhase::Idle;
                self.stats.verified += 1;
                info!(%to, "switch verified");
                Ok(Vec::new())
            }

            (ResponderPhase::AwaitingVerifyAck { .. }, Packet::ChangeAck) => {
                debug!("late change ack, already switched");
                Ok(Vec::new())
            }

            // Trailing confirmation of a fast-path switch
            (ResponderPhase::Idle, Packet::VerifyAck) => {
                debug!(current = %self.current_channel, "verify after completed switch");
                Ok(Vec::new())
            }

            (phase, packet) => Err(ProtocolError::unexpected_packet(packet.kind(), phase.name())),
        }
    }

    pub fn on_scan_complete(&mut self, report: ScanReport) -> Result<Vec<Command>, ProtocolError> {
        let mask = match self.phase {
            ResponderPhase::Scanning { mask } => mask,
            phase => return Err(ProtocolError::unexpected_event("ScanComplete", phase.name())),
        };

        self.current_channel = report.current_channel;
        self.measured_tx_rss_dbm = Some(report.tx_rss_dbm);
        self.interference = report
            .per_channel
            .iter()
            .enumerate()
            .map(|(idx, entry)| ChannelInterference {
                switchable: entry.switchable
                    && u8::try_from(idx).map_or(false, |c| mask.contains(Channel(c))),
                ..*entry
            })
            .collect();

        let evaluation = evaluate(self.current_channel, report.tx_rss_dbm, &self.interference);
        self.last_evaluation = evaluation;

        let evaluation = match evaluation {
            Some(eval) if eval.is_switch_from(self.current_channel) => eval,
            _ => {
                self.phase = ResponderPhase::Idle;
                self.stats.abstentions += 1;
                debug!(current = %self.current_channel, "no better channel, abstaining");
                return Ok(Vec::new());
            }
        };

        // The table is consumed by this decision
        self.interference.clear();

        let from = self.current_channel;
        let to = evaluation.channel;
        debug!(
            worst = %evaluation.worst_channel,
            worst_db = evaluation.worst_average_db,
            "noisiest candidate"
        );
        info!(%from, %to, sinr_db = evaluation.sinr_db, "proposing channel change");

        self.timers.advance();
        self.phase = ResponderPhase::AwaitingChangeAck { from, to };
        self.stats.proposals_sent += 1;
        Ok(vec![
            Command::Send(Packet::ChangeProposal { channel: to }),
            self.timers.arm(TimerTag::ChangeAckTimeout, self.change_ack_timeout),
        ])
    }

    pub fn on_timer(&mut self, token: TimerToken) -> Vec<Command> {
        if !self.timers.is_current(token) {
            return self.stale(token);
        }

        match (token.tag, self.phase) {
            (TimerTag::ChangeAckTimeout, ResponderPhase::AwaitingChangeAck { from, to }) => {
                self.timers.advance();
                self.phase = ResponderPhase::AwaitingVerifyAck { from, to };
                self.stats.timeout_switches += 1;
                info!(%from, %to, "change ack timed out, switching anyway");

                let mut commands: Vec<Command> = self.retune(to).into_iter().collect();
                commands.push(self.timers.arm(TimerTag::VerifyAckTimeout, self.verify_ack_timeout));
                commands
            }

            (TimerTag::VerifyAckTimeout, ResponderPhase::AwaitingVerifyAck { from, to }) => {
                self.timers.advance();
                self.phase = ResponderPhase::AwaitingChangeAck { from, to };
                self.stats.rollbacks += 1;
                info!(%from, %to, "verify timed out, rolling back");

                let mut commands: Vec<Command> = self.retune(from).into_iter().collect();
                commands.push(self.timers.arm(TimerTag::ChangeAckTimeout, self.change_ack_timeout));
                commands
            }

            _ => self.stale(token),
        }
    }

    fn stale(&mut self, token: TimerToken) -> Vec<Command> {
        self.stats.stale_timers += 1;
        debug!(?token, phase = self.phase.name(), "ignoring stale timer");
        Vec::new()
    }

    fn retune(&mut self, to: Channel) -> Option<Command> {
        let from = self.current_channel;
        if from == to {
            return None;
        }
        self.current_channel = to;
        self.stats.channel_switches += 1;
        Some(Command::SwitchChannel { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> ProtocolConfig {
        ProtocolConfig::default()
    }

    /// Channels 0..=3: channel 0 unusable, 1..=3 at -60/-80/-70 dB.
    fn report(current: Channel) -> ScanReport {
        ScanReport {
            tx_rss_dbm: -30.0,
            per_channel: vec![
                ChannelInterference::new(-20.0, -15.0, false),
                ChannelInterference::new(-60.0, -55.0, true),
                ChannelInterference::new(-80.0, -72.0, true),
                ChannelInterference::new(-70.0, -66.0, true),
            ],
            current_channel: current,
        }
    }

    fn armed(commands: &[Command], tag: TimerTag) -> TimerToken {
        commands
            .iter()
            .find_map(|c| match c {
                Command::ArmTimer { token, .. } if token.tag == tag => Some(*token),
                _ => None,
            })
            .expect("timer armed")
    }

    /// Responder that has proposed channel 2 from channel 1.
    fn proposing() -> (Responder, Vec<Command>) {
        let mut responder = Responder::new(&config());
        let commands = responder
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::first(4) })
            .unwrap();
        assert_eq!(
            commands,
            vec![Command::RequestScan {
                mask: ChannelMask::from_channels([Channel(1), Channel(2), Channel(3)])
            }]
        );
        let commands = responder.on_scan_complete(report(Channel(1))).unwrap();
        (responder, commands)
    }

    #[test]
    fn test_scan_complete_proposes_best_channel() {
        let (responder, commands) = proposing();
        assert_eq!(commands[0], Command::Send(Packet::ChangeProposal { channel: Channel(2) }));
        assert!(matches!(
            commands[1],
            Command::ArmTimer { token: TimerToken { tag: TimerTag::ChangeAckTimeout, .. }, delay }
                if delay == Duration::from_millis(200)
        ));
        assert_eq!(
            responder.phase(),
            ResponderPhase::AwaitingChangeAck { from: Channel(1), to: Channel(2) }
        );
        assert_eq!(responder.next_channel(), Some(Channel(2)));
        assert_eq!(responder.measured_tx_rss_dbm(), Some(-30.0));
        assert!(responder.interference().is_empty());
        assert_eq!(responder.stats().proposals_sent, 1);
    }

    #[test]
    fn test_fast_path_switches_once() {
        let (mut responder, commands) = proposing();
        let change_ack = armed(&commands, TimerTag::ChangeAckTimeout);

        let commands = responder.on_packet(Packet::ChangeAck).unwrap();
        assert_eq!(commands, vec![Command::SwitchChannel { from: Channel(1), to: Channel(2) }]);
        assert_eq!(responder.phase(), ResponderPhase::Idle);
        assert_eq!(responder.current_channel(), Channel(2));

        // The pending timeout is now stale
        assert!(responder.on_timer(change_ack).is_empty());
        assert_eq!(responder.current_channel(), Channel(2));
        assert_eq!(responder.stats().channel_switches, 1);
        assert_eq!(responder.stats().timeout_switches, 0);

        // Trailing VerifyAck is harmless
        assert!(responder.on_packet(Packet::VerifyAck).unwrap().is_empty());
        assert_eq!(responder.phase(), ResponderPhase::Idle);
    }

    #[test]
    fn test_timeout_switch_then_rollback() {
        let (mut responder, commands) = proposing();

        let commands = responder.on_timer(armed(&commands, TimerTag::ChangeAckTimeout));
        assert_eq!(commands[0], Command::SwitchChannel { from: Channel(1), to: Channel(2) });
        assert_eq!(
            responder.phase(),
            ResponderPhase::AwaitingVerifyAck { from: Channel(1), to: Channel(2) }
        );
        assert_eq!(responder.current_channel(), Channel(2));

        let commands = responder.on_timer(armed(&commands, TimerTag::VerifyAckTimeout));
        assert_eq!(commands[0], Command::SwitchChannel { from: Channel(2), to: Channel(1) });
        assert_eq!(
            responder.phase(),
            ResponderPhase::AwaitingChangeAck { from: Channel(1), to: Channel(2) }
        );
        assert_eq!(responder.current_channel(), Channel(1));
        assert_eq!(responder.stats().rollbacks, 1);

        // Retry cycle continues with a fresh change-ack timeout, no new proposal
        assert!(commands.iter().all(|c| c.as_packet().is_none()));
        let commands = responder.on_timer(armed(&commands, TimerTag::ChangeAckTimeout));
        assert_eq!(commands[0], Command::SwitchChannel { from: Channel(1), to: Channel(2) });
    }

    #[test]
    fn test_verify_confirms_timeout_switch() {
        let (mut responder, commands) = proposing();
        let commands = responder.on_timer(armed(&commands, TimerTag::ChangeAckTimeout));
        let verify_timeout = armed(&commands, TimerTag::VerifyAckTimeout);

        assert!(responder.on_packet(Packet::VerifyAck).unwrap().is_empty());
        assert_eq!(responder.phase(), ResponderPhase::Idle);
        assert!(responder.on_timer(verify_timeout).is_empty());
        assert_eq!(responder.current_channel(), Channel(2));
        assert_eq!(responder.stats().verified, 1);
    }

    #[test]
    fn test_late_change_ack_while_awaiting_verify() {
        let (mut responder, commands) = proposing();
        responder.on_timer(armed(&commands, TimerTag::ChangeAckTimeout));

        assert!(responder.on_packet(Packet::ChangeAck).unwrap().is_empty());
        assert!(matches!(responder.phase(), ResponderPhase::AwaitingVerifyAck { .. }));
    }

    #[test]
    fn test_verify_after_rollback_follows_initiator() {
        let (mut responder, commands) = proposing();
        let commands = responder.on_timer(armed(&commands, TimerTag::ChangeAckTimeout));
        responder.on_timer(armed(&commands, TimerTag::VerifyAckTimeout));
        assert_eq!(responder.current_channel(), Channel(1));

        let commands = responder.on_packet(Packet::VerifyAck).unwrap();
        assert_eq!(commands, vec![Command::SwitchChannel { from: Channel(1), to: Channel(2) }]);
        assert_eq!(responder.phase(), ResponderPhase::Idle);
    }

    #[test]
    fn test_abstains_when_current_is_only_option() {
        let mut responder = Responder::new(&config());
        responder
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::from_channels([Channel(1)]) })
            .unwrap();
        let commands = responder.on_scan_complete(report(Channel(1))).unwrap();

        assert!(commands.is_empty());
        assert_eq!(responder.phase(), ResponderPhase::Idle);
        assert_eq!(responder.stats().abstentions, 1);
        assert_eq!(responder.last_evaluation().map(|e| e.channel), Some(Channel(1)));
        assert_eq!(responder.interference().len(), 4);
    }

    #[test]
    fn test_sweep_longer_than_channel_space() {
        let mut responder = Responder::new(&config());
        responder
            .on_packet(Packet::ScanTrigger { mask: config().channel_mask })
            .unwrap();

        // Index 259 would alias channel 3 if truncated to u8
        let mut per_channel = vec![ChannelInterference::new(-60.0, -55.0, true); 260];
        per_channel[0] = ChannelInterference::new(-20.0, -15.0, false);
        per_channel[259] = ChannelInterference::new(-95.0, -90.0, true);
        let commands = responder
            .on_scan_complete(ScanReport { tx_rss_dbm: -30.0, per_channel, current_channel: Channel(1) })
            .unwrap();

        assert_eq!(commands[0], Command::Send(Packet::ChangeProposal { channel: Channel(2) }));
        let eval = responder.last_evaluation().unwrap();
        assert_eq!(eval.channel, Channel(2));
        assert!((eval.sinr_db - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_mask_abstains_without_scanning() {
        let mut responder = Responder::new(&config());
        let commands = responder
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::from_channels([Channel(13)]) })
            .unwrap();
        assert!(commands.is_empty());
        assert_eq!(responder.phase(), ResponderPhase::Idle);
    }

    #[test]
    fn test_scan_complete_outside_scanning_is_violation() {
        let mut responder = Responder::new(&config());
        let err = responder.on_scan_complete(report(Channel(1))).unwrap_err();
        assert_eq!(err, ProtocolError::unexpected_event("ScanComplete", "Idle"));
        assert_eq!(responder.phase(), ResponderPhase::Idle);
    }

    #[test]
    fn test_second_trigger_while_proposing_rejected() {
        let (mut responder, _) = proposing();
        let err = responder
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::first(4) })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedPacket { state: "AwaitingChangeAck", .. }));
    }

    #[test]
    fn test_scan_report_resyncs_current_channel() {
        let mut responder = Responder::new(&config());
        responder
            .on_packet(Packet::ScanTrigger { mask: ChannelMask::first(4) })
            .unwrap();
        let commands = responder.on_scan_complete(report(Channel(3))).unwrap();
        assert_eq!(commands[0], Command::Send(Packet::ChangeProposal { channel: Channel(2) }));
        assert_eq!(
            responder.phase(),
            ResponderPhase::AwaitingChangeAck { from: Channel(3), to: Channel(2) }
        );
    }

    #[derive(Debug, Clone)]
    enum Input {
        Trigger,
        ScanDone(u8),
        ChangeAck,
        VerifyAck,
        Fire(usize),
    }

    fn input() -> impl Strategy<Value = Input> {
        prop_oneof![
            Just(Input::Trigger),
            (0u8..4).prop_map(Input::ScanDone),
            Just(Input::ChangeAck),
            Just(Input::VerifyAck),
            any::<usize>().prop_map(Input::Fire),
        ]
    }

    proptest! {
        #[test]
        fn prop_single_outstanding_proposal_and_stale_timers(
            inputs in prop::collection::vec(input(), 1..64)
        ) {
            let mut responder = Responder::new(&config());
            let mut tokens: Vec<TimerToken> = Vec::new();

            for input in inputs {
                let before = responder.phase();
                let commands = match input {
                    Input::Trigger => responder
                        .on_packet(Packet::ScanTrigger { mask: ChannelMask::first(4) })
                        .unwrap_or_default(),
                    Input::ScanDone(current) => responder
                        .on_scan_complete(report(Channel(current)))
                        .unwrap_or_default(),
                    Input::ChangeAck => responder.on_packet(Packet::ChangeAck).unwrap_or_default(),
                    Input::VerifyAck => responder.on_packet(Packet::VerifyAck).unwrap_or_default(),
                    Input::Fire(i) if !tokens.is_empty() => {
                        let token = tokens[i % tokens.len()];
                        let stale = token.epoch != responder.timers.epoch();
                        let commands = responder.on_timer(token);
                        if stale {
                            prop_assert!(commands.is_empty());
                            prop_assert_eq!(responder.phase(), before);
                        }
                        commands
                    }
                    Input::Fire(_) => Vec::new(),
                };

                let proposals = commands
                    .iter()
                    .filter(|c| matches!(c, Command::Send(Packet::ChangeProposal { .. })))
                    .count();
                if proposals > 0 {
                    prop_assert_eq!(proposals, 1);
                    prop_assert!(
                        matches!(before, ResponderPhase::Scanning { .. }),
                        "proposal sent from {:?}",
                        before
                    );
                }

                match responder.phase() {
                    ResponderPhase::AwaitingChangeAck { from, to } => {
                        prop_assert_eq!(responder.current_channel(), from);
                        prop_assert_ne!(from, to);
                    }
                    ResponderPhase::AwaitingVerifyAck { from, to } => {
                        prop_assert_eq!(responder.current_channel(), to);
                        prop_assert_ne!(from, to);
                    }
                    _ => {
                        prop_assert_eq!(responder.next_channel(), None);
                    }
                }

                for command in &commands {
                    if let Command::ArmTimer { token, .. } = command {
                        tokens.push(*token);
                    }
                }
            }
        }
    }
}
