//! Scenario runner - builds, runs and judges fault-injection scenarios.

use crate::error::SimError;
use crate::network::TransportStats;
use crate::oracle::Jammer;
use crate::scenarios::ScenarioId;
use crate::world::{ChannelChange, SimConfig, SimWorld};

use chanswitch_core::{ResponderPhase, Role, SessionStats};
use chanswitch_env::{Channel, SwitchContext};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Channel with the lowest floor in [`quiet_spectrum`].
const QUIET_BEST: Channel = Channel(2);

/// Where the jammer scenario starts, and where the jammer goes.
const JAMMED: Channel = Channel(6);

/// Static 12-channel floor: channel 0 is loud and outside the default mask,
/// channel 2 is clearly best, channel 3 second best.
fn quiet_spectrum() -> Vec<f64> {
    let mut floor = vec![-65.0; 12];
    floor[0] = -20.0;
    floor[1] = -60.0;
    floor[2] = -80.0;
    floor[3] = -70.0;
    floor
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Events dispatched by the loop
    pub events_processed: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub initiator: SessionStats,
    pub responder: SessionStats,
    pub transport: TransportStats,

    /// Radio retunes on both stations
    pub channel_switches: usize,

    pub final_initiator_channel: Option<u8>,
    pub final_responder_channel: Option<u8>,

    /// Sessions not yet destroyed at the end of the run
    pub open_sessions: usize,

    /// Longest stretch with the radios on different channels
    pub longest_mismatch_ms: f64,
    pub total_mismatch_ms: f64,
    pub mismatch_episodes: u64,
}

impl ScenarioMetrics {
    pub fn collect(world: &SimWorld) -> Self {
        let stats = |role| world.session(role).map(|s| *s.stats()).unwrap_or_default();
        let mismatch = world.mismatch();
        Self {
            initiator: stats(Role::Initiator),
            responder: stats(Role::Responder),
            transport: world.transport().stats(),
            channel_switches: world.timeline().len(),
            final_initiator_channel: world.channel(Role::Initiator).map(|c| c.0),
            final_responder_channel: world.channel(Role::Responder).map(|c| c.0),
            open_sessions: world.open_sessions(),
            longest_mismatch_ms: mismatch.longest.as_secs_f64() * 1000.0,
            total_mismatch_ms: mismatch.total.as_secs_f64() * 1000.0,
            mismatch_episodes: mismatch.episodes,
        }
    }
}

/// Assertion collector; a scenario fails with every message it gathered.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn expect(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            self.failures.push(what());
        }
    }

    fn expect_eq<T: PartialEq + std::fmt::Debug>(&mut self, label: &str, actual: T, expected: T) {
        if actual != expected {
            self.failures
                .push(format!("{label}: expected {expected:?}, got {actual:?}"));
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Requested run length; scenarios that need longer get longer
    max_duration: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_duration: Duration::from_secs(10),
        }
    }

    /// Sets the run length in seconds.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration = Duration::from_secs_f64(secs.max(0.0));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run length for `scenario`, never shorter than the events it schedules.
    pub fn duration_for(&self, scenario: ScenarioId) -> Duration {
        let minimum = match scenario {
            ScenarioId::BestChannel | ScenarioId::FastAck | ScenarioId::Teardown => Duration::from_secs(1),
            ScenarioId::SilentPeer | ScenarioId::SlowPeer => Duration::from_secs(2),
            ScenarioId::MalformedPacket | ScenarioId::LossyWindow => Duration::from_secs(7),
            ScenarioId::Jammer => Duration::from_secs(8),
            ScenarioId::BackoffGuard => Duration::from_secs(10),
        };
        self.max_duration.max(minimum)
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        match self.run_world(scenario) {
            Ok(world) => self.evaluate(scenario, &world),
            Err(err) => self.aborted(scenario, err),
        }
    }

    /// Runs a scenario with virtual time paced by `pacer`.
    pub async fn run_paced<C: SwitchContext>(&self, scenario: ScenarioId, pacer: &C) -> ScenarioResult {
        let mut world = match self.build(scenario) {
            Ok(world) => world,
            Err(err) => return self.aborted(scenario, err),
        };
        match world.run_paced(self.duration_for(scenario), pacer).await {
            Ok(()) => self.evaluate(scenario, &world),
            Err(err) => self.aborted(scenario, err),
        }
    }

    /// Builds and runs the world without judging it.
    pub fn run_world(&self, scenario: ScenarioId) -> Result<SimWorld, SimError> {
        let mut world = self.build(scenario)?;
        world.run_until(self.duration_for(scenario))?;
        Ok(world)
    }

    /// Sets up the world for `scenario` with all its faults scheduled.
    pub fn build(&self, scenario: ScenarioId) -> Result<SimWorld, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let quiet = SimConfig {
            seed: self.seed,
            noise_std_db: 0.0,
            spectrum_profile: Some(quiet_spectrum()),
            ..Default::default()
        };

        let world = match scenario {
            ScenarioId::BestChannel => SimWorld::new(quiet)?,

            ScenarioId::BackoffGuard => {
                let mut world = SimWorld::new(quiet)?;
                for secs in [1, 3, 6, 8] {
                    world.request_scan_at(Duration::from_secs(secs));
                }
                world
            }

            ScenarioId::FastAck => SimWorld::new(SimConfig {
                latency: Duration::from_millis(25),
                ..quiet
            })?,

            ScenarioId::SilentPeer => {
                let mut world = SimWorld::new(quiet)?;
                let (initiator, responder) = (world.node(Role::Initiator), world.node(Role::Responder));
                world
                    .transport_mut()
                    .controller_mut()
                    .drop_window(initiator, responder, Duration::from_millis(10), Duration::MAX);
                world
            }

            ScenarioId::MalformedPacket => {
                let mut world = SimWorld::new(quiet)?;
                world.inject_at(Duration::from_secs(1), Role::Responder, vec![0xAB, 0x02, 0x03]);
                world.request_scan_at(Duration::from_secs(6));
                world
            }

            ScenarioId::Jammer => {
                let floor = vec![-20.0, -60.0, -72.0, -70.0, -74.0, -71.0, -90.0, -73.0, -69.0, -75.0, -68.0, -67.0];
                let mut world = SimWorld::new(SimConfig {
                    seed: self.seed,
                    walk_std_db: 0.5,
                    spectrum_profile: Some(floor),
                    ..Default::default()
                })?;
                world.oracle_mut().add_jammer(Jammer {
                    channel: JAMMED,
                    start: Duration::from_secs(3),
                    end: None,
                    level_db: -30.0,
                });
                world.request_scan_at(Duration::from_secs(6));
                world
            }

            ScenarioId::SlowPeer => SimWorld::new(SimConfig {
                latency: Duration::from_millis(300),
                ..quiet
            })?,

            ScenarioId::LossyWindow => {
                let mut world = SimWorld::new(quiet)?;
                let (initiator, responder) = (world.node(Role::Initiator), world.node(Role::Responder));
                let controller = world.transport_mut().controller_mut();
                controller.drop_window(initiator, responder, Duration::ZERO, Duration::from_secs(2));
                controller.drop_window(responder, initiator, Duration::ZERO, Duration::from_secs(2));
                controller.drop_next(initiator, 0x03, 1);
                world.request_scan_at(Duration::from_secs(6));
                world
            }

            ScenarioId::Teardown => {
                let mut world = SimWorld::new(SimConfig {
                    latency: Duration::from_millis(20),
                    ..quiet
                })?;
                world.close_at(Duration::from_millis(60), Role::Initiator);
                world
            }
        };
        Ok(world)
    }

    /// Judges a finished world.
    pub fn evaluate(&self, scenario: ScenarioId, world: &SimWorld) -> ScenarioResult {
        let metrics = ScenarioMetrics::collect(world);
        let mut checks = Checks::default();
        let config = &world.config;
        let (tx, rx) = (&metrics.initiator, &metrics.responder);
        let responder_changes: Vec<ChannelChange> = world
            .timeline()
            .iter()
            .filter(|c| c.role == Role::Responder)
            .copied()
            .collect();

        // Every scenario: nobody misbehaved unless we made them
        if scenario != ScenarioId::MalformedPacket {
            checks.expect_eq("responder violations", rx.violations, 0);
        }
        checks.expect_eq("initiator violations", tx.violations, 0);

        match scenario {
            ScenarioId::BestChannel => {
                checks.expect_eq("initiator channel", world.channel(Role::Initiator), Some(QUIET_BEST));
                checks.expect_eq("responder channel", world.channel(Role::Responder), Some(QUIET_BEST));
                checks.expect_eq("proposals", rx.proposals_sent, 1);
                checks.expect_eq("fast path switches", rx.fast_path_switches, 1);
                let sinr = world
                    .session(Role::Responder)
                    .and_then(|s| s.responder())
                    .and_then(|r| r.last_evaluation())
                    .map(|e| e.sinr_db);
                let expected_sinr = world.oracle().tx_rss_dbm() + 80.0;
                checks.expect(sinr.map_or(false, |s| (s - expected_sinr).abs() < 1e-9), || {
                    format!("SINR: expected {expected_sinr} dB, got {sinr:?}")
                });
            }

            ScenarioId::BackoffGuard => {
                checks.expect_eq("scans triggered", tx.scans_triggered, 2);
                checks.expect_eq("triggers suppressed", tx.triggers_suppressed, 3);
                checks.expect_eq("proposals", rx.proposals_sent, 2);
                checks.expect_eq("final channel", world.channel(Role::Initiator), Some(Channel(3)));
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
            }

            ScenarioId::FastAck => {
                let proposal_at = config.address_latency + config.latency + config.scan_latency;
                checks.expect_eq("fast path switches", rx.fast_path_switches, 1);
                checks.expect_eq("timeout switches", rx.timeout_switches, 0);
                checks.expect(rx.stale_timers >= 1, || "change-ack timeout was not seen as stale".into());
                checks.expect_eq(
                    "responder switch time",
                    responder_changes.first().map(|c| c.at),
                    Some(proposal_at + 2 * config.latency),
                );
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
            }

            ScenarioId::SilentPeer => {
                let proposal_at = config.address_latency + config.latency + config.scan_latency;
                let timeout = config.protocol.change_ack_timeout;
                let verify = config.protocol.verify_ack_timeout;
                checks.expect_eq("proposals", rx.proposals_sent, 1);
                checks.expect(rx.timeout_switches >= 1, || "no timeout switch".into());
                checks.expect(rx.rollbacks >= 1, || "no rollback".into());
                checks.expect_eq("verified", rx.verified, 0);
                checks.expect_eq(
                    "forced switch",
                    responder_changes.first().map(|c| (c.at, c.from, c.to)),
                    Some((proposal_at + timeout, Channel(1), QUIET_BEST)),
                );
                checks.expect_eq(
                    "rollback",
                    responder_changes.get(1).map(|c| (c.at, c.from, c.to)),
                    Some((proposal_at + timeout + verify, QUIET_BEST, Channel(1))),
                );
            }

            ScenarioId::MalformedPacket => {
                checks.expect_eq("responder violations", rx.violations, 1);
                let phase = world
                    .session(Role::Responder)
                    .and_then(|s| s.responder())
                    .map(|r| r.phase());
                checks.expect_eq("responder phase", phase, Some(ResponderPhase::Idle));
                checks.expect_eq("proposals", rx.proposals_sent, 2);
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
            }

            ScenarioId::Jammer => {
                checks.expect_eq("first move", responder_changes.first().map(|c| c.to), Some(JAMMED));
                checks.expect(rx.proposals_sent >= 2, || format!("only {} proposals", rx.proposals_sent));
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
                match world.channel(Role::Responder) {
                    Some(channel) => {
                        let level = world.oracle().interference_db(channel, world.now());
                        checks.expect(channel != JAMMED, || format!("still on jammed {channel}"));
                        checks.expect(level < -60.0, || format!("{channel} at {level:.1} dB"));
                    }
                    None => checks.expect(false, || "responder radio missing".into()),
                }
            }

            ScenarioId::SlowPeer => {
                checks.expect_eq("timeout switches", rx.timeout_switches, 1);
                checks.expect_eq("verified", rx.verified, 1);
                checks.expect_eq("rollbacks", rx.rollbacks, 0);
                checks.expect_eq("responder channel", world.channel(Role::Responder), Some(QUIET_BEST));
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
            }

            ScenarioId::LossyWindow => {
                checks.expect_eq("scans triggered", tx.scans_triggered, 2);
                checks.expect_eq("proposals", rx.proposals_sent, 1);
                checks.expect_eq("verified", rx.verified, 1);
                checks.expect_eq("fast path switches", rx.fast_path_switches, 0);
                checks.expect_eq("timeout switches", rx.timeout_switches, 0);
                checks.expect_eq("packets dropped", metrics.transport.dropped, 2);
                checks.expect_eq("responder channel", world.channel(Role::Responder), Some(QUIET_BEST));
                checks.expect(world.in_sync(), || "stations ended on different channels".into());
            }

            ScenarioId::Teardown => {
                let closed = |role| world.session(role).map_or(false, |s| s.is_closed());
                checks.expect(closed(Role::Initiator), || "initiator not closed".into());
                checks.expect(closed(Role::Responder), || "responder not closed".into());
                checks.expect_eq("proposals", rx.proposals_sent, 1);
                checks.expect_eq("packets suppressed", rx.packets_suppressed, 1);
                checks.expect_eq("timeout switches", rx.timeout_switches, 0);
                checks.expect_eq("channel switches", metrics.channel_switches, 0);
                checks.expect_eq("open sessions", metrics.open_sessions, 0);
            }
        }

        let passed = checks.failures.is_empty();
        if passed {
            info!(
                "✓ {} complete: {} events, {} switches, longest mismatch {:.1}ms",
                scenario.name(),
                world.events_processed(),
                metrics.channel_switches,
                metrics.longest_mismatch_ms
            );
        } else {
            warn!("✗ {}: {}", scenario.name(), checks.failures.join("; "));
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            events_processed: world.events_processed(),
            final_time_secs: world.now().as_secs_f64(),
            failure_reason: (!passed).then(|| checks.failures.join("; ")),
            metrics,
        }
    }

    fn aborted(&self, scenario: ScenarioId, err: SimError) -> ScenarioResult {
        warn!("✗ {} aborted: {}", scenario.name(), err);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            events_processed: 0,
            final_time_secs: 0.0,
            failure_reason: Some(format!("fatal: {err}")),
            metrics: ScenarioMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_never_below_minimum() {
        let runner = ScenarioRunner::new(1).with_duration(0.5);
        assert_eq!(runner.duration_for(ScenarioId::BackoffGuard), Duration::from_secs(10));
        assert_eq!(runner.duration_for(ScenarioId::BestChannel), Duration::from_secs(1));

        let runner = ScenarioRunner::new(1).with_duration(30.0);
        assert_eq!(runner.duration_for(ScenarioId::Teardown), Duration::from_secs(30));
    }

    #[test]
    fn test_quiet_spectrum_best_channel() {
        let floor = quiet_spectrum();
        let best = (1..12).min_by(|a, b| floor[*a].total_cmp(&floor[*b]));
        assert_eq!(best, Some(QUIET_BEST.index()));
    }

    #[test]
    fn test_best_channel_passes() {
        let result = ScenarioRunner::new(42).run(ScenarioId::BestChannel);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.channel_switches, 2);
    }
}
