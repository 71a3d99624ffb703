//! Per-session counters.

use serde::Serialize;

/// Counters kept by every session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// ScanTrigger packets sent (initiator)
    pub scans_triggered: u64,

    /// Triggers refused because the backoff window had not elapsed (initiator)
    pub triggers_suppressed: u64,

    /// Scans that ended without a proposal (responder)
    pub abstentions: u64,

    /// ChangeProposal packets sent (responder)
    pub proposals_sent: u64,

    /// Proposals completed by ChangeAck (responder)
    pub fast_path_switches: u64,

    /// Switches forced by the change-ack timeout (responder)
    pub timeout_switches: u64,

    /// Rollbacks after a verify timeout (responder)
    pub rollbacks: u64,

    /// Proposals confirmed by VerifyAck (responder)
    pub verified: u64,

    /// Local retunes performed by either role
    pub channel_switches: u64,

    /// Timer firings ignored as stale
    pub stale_timers: u64,

    /// Protocol violations (malformed or unexpected input)
    pub violations: u64,

    /// Packets handed to the transport
    pub packets_sent: u64,

    /// Packets dropped because the session was closed
    pub packets_suppressed: u64,
}

impl SessionStats {
    /// Adds another session's counters to this one.
    pub fn merge(&mut self, other: &SessionStats) {
        self.scans_triggered += other.scans_triggered;
        self.triggers_suppressed += other.triggers_suppressed;
        self.abstentions += other.abstentions;
        self.proposals_sent += other.proposals_sent;
        self.fast_path_switches += other.fast_path_switches;
        self.timeout_switches += other.timeout_switches;
        self.rollbacks += other.rollbacks;
        self.verified += other.verified;
        self.channel_switches += other.channel_switches;
        self.stale_timers += other.stale_timers;
        self.violations += other.violations;
        self.packets_sent += other.packets_sent;
        self.packets_suppressed += other.packets_suppressed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counters() {
        let initiator = SessionStats {
            scans_triggered: 2,
            triggers_suppressed: 1,
            channel_switches: 2,
            packets_sent: 6,
            ..Default::default()
        };
        let responder = SessionStats {
            proposals_sent: 2,
            fast_path_switches: 1,
            rollbacks: 1,
            channel_switches: 3,
            violations: 1,
            ..Default::default()
        };

        let mut totals = SessionStats::default();
        totals.merge(&initiator);
        totals.merge(&responder);

        assert_eq!(totals.scans_triggered, 2);
        assert_eq!(totals.proposals_sent, 2);
        assert_eq!(totals.channel_switches, 5);
        assert_eq!(totals.rollbacks, 1);
        assert_eq!(totals.violations, 1);
        assert_eq!(totals.packets_sent, 6);
        assert_eq!(totals.stale_timers, 0);
    }
}
