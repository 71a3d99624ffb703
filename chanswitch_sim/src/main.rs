//! Chanswitch DST Simulator CLI
//!
//! Run deterministic fault-injection scenarios against the channel-switch
//! protocol.

use chanswitch_core::SessionStats;
use chanswitch_env::TokioContext;
use chanswitch_sim::scenarios::ScenarioId;
use chanswitch_sim::{ScenarioResult, ScenarioRunner, SimExport};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Chanswitch Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "chanswitch-sim")]
#[command(about = "Run deterministic channel-switch simulations", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (best_channel, backoff_guard, fast_ack, silent_peer,
    /// malformed_packet, jammer, slow_peer, lossy_window, teardown, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds (scenarios may extend it)
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the channel timeline to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Pace virtual time against the wall clock
    #[arg(long)]
    realtime: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the --verbose default
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if !args.json {
        info!("Chanswitch DST Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        std::process::exit(run_with_export(base_seed, scenarios[0], args.duration, export_path));
    }

    let runtime = if args.realtime {
        match tokio::runtime::Builder::new_multi_thread().enable_time().build() {
            Ok(rt) => Some(rt),
            Err(e) => {
                eprintln!("Error: failed to start runtime: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_duration(args.duration);

        for scenario in &scenarios {
            let result = match &runtime {
                Some(rt) => rt.block_on(async {
                    let pacer = TokioContext::new();
                    runner.run_paced(*scenario, &pacer).await
                }),
                None => runner.run(*scenario),
            };

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    // Protocol counters summed over every run and both stations
    let mut totals = SessionStats::default();
    for result in &all_results {
        totals.merge(&result.metrics.initiator);
        totals.merge(&result.metrics.responder);
    }

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "totals": totals,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "events": r.events_processed,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: failed to render summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        for result in &all_results {
            let m = &result.metrics;
            info!(
                "  {:<16} seed={} proposals={} fast={} timeout={} rollbacks={} violations={} mismatch_max={:.1}ms",
                result.scenario.name(),
                result.seed,
                m.responder.proposals_sent,
                m.responder.fast_path_switches,
                m.responder.timeout_switches,
                m.responder.rollbacks,
                m.initiator.violations + m.responder.violations,
                m.longest_mismatch_ms,
            );
        }

        info!(
            "  totals: scans={} proposals={} switches={} rollbacks={} stale_timers={} violations={}",
            totals.scans_triggered,
            totals.proposals_sent,
            totals.channel_switches,
            totals.rollbacks,
            totals.stale_timers,
            totals.violations,
        );

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

/// Runs one scenario and writes its timeline to `export_path`. Returns the
/// process exit code.
fn run_with_export(seed: u64, scenario: ScenarioId, duration: f64, export_path: &str) -> i32 {
    info!("Running with export to: {}", export_path);

    let runner = ScenarioRunner::new(seed).with_duration(duration);
    let world = match runner.run_world(scenario) {
        Ok(world) => world,
        Err(e) => {
            error!("✗ {} aborted: {}", scenario.name(), e);
            return 1;
        }
    };
    let result = runner.evaluate(scenario, &world);
    let export = SimExport::capture(&world, &result);

    if let Err(e) = export.write_to_file(export_path) {
        error!("Failed to write export: {:?}", e);
        return 1;
    }
    info!("Exported {} channel events to {}", export.channel_events.len(), export_path);

    if result.passed {
        info!("✓ {} (seed={}) PASSED - exported to {}", scenario.name(), seed, export_path);
        0
    } else {
        error!(
            "✗ {} FAILED: {}",
            scenario.name(),
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
        1
    }
}
