//! Named fault-injection scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// SW-001: Initial scan lands both stations on the quietest channel
    BestChannel,

    /// SW-002: Triggers inside the backoff window are refused
    BackoffGuard,

    /// SW-003: ChangeAck beats the timeout, no verify phase
    FastAck,

    /// SW-004: Initiator goes silent after the proposal
    SilentPeer,

    /// SW-005: Garbage bytes delivered to an idle responder
    MalformedPacket,

    /// SW-006: A jammer parks on the chosen channel
    Jammer,

    /// SW-007: One-way latency above the change-ack timeout
    SlowPeer,

    /// SW-008: Outage, then a lost ChangeAck
    LossyWindow,

    /// SW-009: Initiator closes mid-handshake
    Teardown,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BestChannel,
            ScenarioId::BackoffGuard,
            ScenarioId::FastAck,
            ScenarioId::SilentPeer,
            ScenarioId::MalformedPacket,
            ScenarioId::Jammer,
            ScenarioId::SlowPeer,
            ScenarioId::LossyWindow,
            ScenarioId::Teardown,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BestChannel => "best_channel",
            ScenarioId::BackoffGuard => "backoff_guard",
            ScenarioId::FastAck => "fast_ack",
            ScenarioId::SilentPeer => "silent_peer",
            ScenarioId::MalformedPacket => "malformed_packet",
            ScenarioId::Jammer => "jammer",
            ScenarioId::SlowPeer => "slow_peer",
            ScenarioId::LossyWindow => "lossy_window",
            ScenarioId::Teardown => "teardown",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BestChannel => "Static spectrum, initial scan must pick the lowest-interference channel",
            ScenarioId::BackoffGuard => "Scan requests at 1s/3s/6s/8s, only 6s may pass the 5s backoff",
            ScenarioId::FastAck => "25ms latency, ChangeAck arrives 50ms after the proposal",
            ScenarioId::SilentPeer => "Initiator to responder link dies after the trigger, responder switches and rolls back",
            ScenarioId::MalformedPacket => "Unknown type byte injected at 1s, responder must stay idle and usable",
            ScenarioId::Jammer => "Drifting spectrum, jammer on the chosen channel at 3s, reselection at 6s",
            ScenarioId::SlowPeer => "300ms one-way latency, switch completes through the timeout path",
            ScenarioId::LossyWindow => "2s outage swallows the first trigger, then the first ChangeAck is lost",
            ScenarioId::Teardown => "Initiator closes before the proposal leaves, sends suppressed and timers ignored",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best_channel" | "bestchannel" | "a" | "sw-001" => Ok(ScenarioId::BestChannel),
            "backoff_guard" | "backoffguard" | "b" | "sw-002" => Ok(ScenarioId::BackoffGuard),
            "fast_ack" | "fastack" | "c" | "sw-003" => Ok(ScenarioId::FastAck),
            "silent_peer" | "silentpeer" | "d" | "sw-004" => Ok(ScenarioId::SilentPeer),
            "malformed_packet" | "malformedpacket" | "e" | "sw-005" => Ok(ScenarioId::MalformedPacket),
            "jammer" | "sw-006" => Ok(ScenarioId::Jammer),
            "slow_peer" | "slowpeer" | "sw-007" => Ok(ScenarioId::SlowPeer),
            "lossy_window" | "lossywindow" | "sw-008" => Ok(ScenarioId::LossyWindow),
            "teardown" | "sw-009" => Ok(ScenarioId::Teardown),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_parse() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert!(!scenario.description().is_empty());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("E".parse::<ScenarioId>(), Ok(ScenarioId::MalformedPacket));
        assert_eq!("SW-006".parse::<ScenarioId>(), Ok(ScenarioId::Jammer));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
