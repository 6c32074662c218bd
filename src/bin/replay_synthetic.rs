//! CLI tool that drives the pressure engine from the synthetic feed.
//!
//! Useful for eyeballing zone output, profiling a full analysis pass and
//! producing sample JSON for a presentation layer without a live transport.
//!
//! # Usage
//!
//! ```bash
//! # 1000 events with a fixed seed, summary only
//! cargo run --release --bin replay_synthetic -- --events 1000 --seed 7
//!
//! # Stream every analysis result as JSON lines
//! cargo run --release --bin replay_synthetic -- -n 200 --json > passes.jsonl
//!
//! # Use a saved engine configuration
//! cargo run --release --bin replay_synthetic -- --config engine.json
//!
//! # Write the default configuration to disk for editing
//! cargo run --release --bin replay_synthetic -- --save-config engine.json
//! ```

use std::env;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use orderbook_pressure::{AlertType, EngineConfig, PressureEngine, Result, Severity, SyntheticFeed};

/// Command-line arguments
struct Args {
    /// Number of feed events to replay (snapshot included)
    events: usize,
    /// Seed for the random walk
    seed: Option<u64>,
    /// Engine configuration JSON
    config: Option<PathBuf>,
    /// Write the effective configuration here and exit
    save_config: Option<PathBuf>,
    /// Emit every analysis result as a JSON line on stdout
    json: bool,
    /// Log every alert as it fires
    verbose: bool,
}

fn parse_args() -> std::result::Result<Args, String> {
    let args: Vec<String> = env::args().collect();

    let mut events = 1_000usize;
    let mut seed = None;
    let mut config = None;
    let mut save_config = None;
    let mut json = false;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--events" | "-n" => {
                i += 1;
                let value = args.get(i).ok_or("--events requires a count")?;
                events = value
                    .parse()
                    .map_err(|_| format!("Invalid event count: {value}"))?;
            }
            "--seed" | "-s" => {
                i += 1;
                let value = args.get(i).ok_or("--seed requires a number")?;
                seed = Some(value.parse().map_err(|_| format!("Invalid seed: {value}"))?);
            }
            "--config" | "-c" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires a path")?;
                config = Some(PathBuf::from(value));
            }
            "--save-config" => {
                i += 1;
                let value = args.get(i).ok_or("--save-config requires a path")?;
                save_config = Some(PathBuf::from(value));
            }
            "--json" | "-j" => {
                json = true;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg => {
                return Err(format!("Unknown argument: {arg}"));
            }
        }
        i += 1;
    }

    if events == 0 {
        return Err("--events must be at least 1".to_string());
    }

    Ok(Args {
        events,
        seed,
        config,
        save_config,
        json,
        verbose,
    })
}

fn print_help() {
    eprintln!(
        r#"
Replay Synthetic Depth Through the Pressure Engine

Generates a random-walk order book (one snapshot followed by sequenced
diffs) and runs the full reconciliation and zone-analysis pipeline on it.

USAGE:
    replay_synthetic [OPTIONS]

OPTIONS:
    -n, --events <N>          Number of feed events to replay [default: 1000]
    -s, --seed <SEED>         Seed for a reproducible walk
    -c, --config <PATH>       Engine configuration JSON
        --save-config <PATH>  Write the effective configuration and exit
    -j, --json                Print every analysis result as a JSON line
    -v, --verbose             Log each alert as it fires
    -h, --help                Print this help message

NOTES:
    - Logging is controlled with RUST_LOG (default: info)
    - With --json, the summary goes to stderr so stdout stays parseable
"#
    );
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_json(path)?,
        None => EngineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.synthetic = config.synthetic.with_seed(seed);
    }
    config.validate()?;
    Ok(config)
}

/// Per-run tallies for the closing summary.
#[derive(Default)]
struct Tally {
    passes: u64,
    errors: u64,
    alerts: u64,
    critical_alerts: u64,
    spikes: u64,
    max_zones: usize,
}

fn run(args: &Args, config: EngineConfig) -> Result<Tally> {
    let feed = SyntheticFeed::new(config.synthetic.clone())?;
    let mut engine = PressureEngine::new(config)?;
    engine.connect();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut tally = Tally::default();

    for event in feed.take(args.events) {
        match engine.on_event(&event) {
            Ok(Some(result)) => {
                tally.passes += 1;
                tally.max_zones = tally.max_zones.max(result.zones.len());
                for alert in &result.alerts {
                    tally.alerts += 1;
                    if alert.severity == Severity::Critical {
                        tally.critical_alerts += 1;
                    }
                    if alert.alert_type == AlertType::VolumeSpike {
                        tally.spikes += 1;
                    }
                    if args.verbose {
                        log::info!("[{:?}] {}", alert.severity, alert.message);
                    }
                }
                if args.json {
                    serde_json::to_writer(&mut out, &result)?;
                    out.write_all(b"\n")?;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tally.errors += 1;
                log::warn!("Event at {} rejected: {}", event.timestamp_ns(), e);
            }
        }
    }
    out.flush()?;

    let stats = engine.stats();
    log::info!(
        "Engine: {} snapshots, {} diffs, {} stale, {} gaps, zones/pass mean {:.2} max {:.0}",
        stats.snapshots,
        stats.diffs,
        stats.stale_diffs,
        stats.gaps,
        stats.zones_per_pass.mean,
        stats.zones_per_pass.max,
    );
    log::info!("Alerts suppressed by cooldown: {}", engine.suppressed_alerts());

    Ok(tally)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.save_config {
        if let Err(e) = config.save_json(path) {
            eprintln!("Error saving configuration: {e}");
            std::process::exit(1);
        }
        eprintln!("Configuration written to {}", path.display());
        return;
    }

    let start = Instant::now();
    let tally = match run(&args, config) {
        Ok(tally) => tally,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed().as_secs_f64();

    eprintln!("\n{}", "=".repeat(60));
    eprintln!("Replay Complete");
    eprintln!("  Events: {}", args.events);
    eprintln!("  Analysis passes: {}", tally.passes);
    eprintln!("  Rejected events: {}", tally.errors);
    eprintln!("  Alerts: {} ({} critical, {} volume spikes)", tally.alerts, tally.critical_alerts, tally.spikes);
    eprintln!("  Max zones in a pass: {}", tally.max_zones);
    eprintln!("  Time: {:.3}s ({:.0} events/s)", elapsed, args.events as f64 / elapsed.max(1e-9));

    if tally.errors > 0 {
        std::process::exit(1);
    }
}
