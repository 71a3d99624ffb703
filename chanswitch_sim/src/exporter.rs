//! JSON exporter for the channel timeline.
//!
//! Exports one scenario run as JSON for offline plotting: every radio
//! retune, every jammer, and the final counters.

use crate::oracle::Jammer;
use crate::runner::{ScenarioMetrics, ScenarioResult};
use crate::world::{ChannelChange, SimWorld};
use chanswitch_core::Role;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single retune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Simulation time in milliseconds
    pub time_ms: f64,

    /// "initiator" or "responder"
    pub station: String,

    pub from: u8,
    pub to: u8,
}

impl From<&ChannelChange> for ChannelEvent {
    fn from(change: &ChannelChange) -> Self {
        Self {
            time_ms: change.at.as_secs_f64() * 1000.0,
            station: station_name(change.role).to_string(),
            from: change.from.0,
            to: change.to.0,
        }
    }
}

/// A jammer active during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JammerEvent {
    pub channel: u8,
    pub start_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<f64>,
    pub level_db: f64,
}

impl From<&Jammer> for JammerEvent {
    fn from(jammer: &Jammer) -> Self {
        Self {
            channel: jammer.channel.0,
            start_ms: jammer.start.as_secs_f64() * 1000.0,
            end_ms: jammer.end.map(|end| end.as_secs_f64() * 1000.0),
            level_db: jammer.level_db,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Both stations start here
    pub initial_channel: u8,

    /// All retunes, in time order
    pub channel_events: Vec<ChannelEvent>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jammers: Vec<JammerEvent>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, initial_channel: u8) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            initial_channel,
            channel_events: Vec::new(),
            jammers: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: ScenarioMetrics::default(),
        }
    }

    /// Captures a finished world together with its verdict.
    pub fn capture(world: &SimWorld, result: &ScenarioResult) -> Self {
        let mut export = Self::new(
            result.scenario.name(),
            result.seed,
            world.config.protocol.initial_channel.0,
        );
        for change in world.timeline() {
            export.add_event(change.into());
        }
        export.jammers = world.oracle().jammers().iter().map(JammerEvent::from).collect();
        export.duration_sec = world.now().as_secs_f64();
        export.finalize(result);
        export
    }

    /// Adds a retune.
    pub fn add_event(&mut self, event: ChannelEvent) {
        self.duration_sec = self.duration_sec.max(event.time_ms / 1000.0);
        self.channel_events.push(event);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, result: &ScenarioResult) {
        self.passed = result.passed;
        self.failure_reason = result.failure_reason.clone();
        self.metrics = result.metrics.clone();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

fn station_name(role: Role) -> &'static str {
    match role {
        Role::Initiator => "initiator",
        Role::Responder => "responder",
    }
}
