use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use crossbeam::channel::{Receiver, Sender};
use ks_detect::alerting::{Alert, MatchQueue};
use ks_detect::capture::Packet;
use ks_detect::config::Settings;
use ks_detect::detection::{FlowBitStore, WorkerState};
use ks_detect::rules::{self, RuleSet};
use ks_detect::stats::StatsAggregator;
use ks_detect::{KsError, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ks-detect")]
#[command(author = "KS-Sniff Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Evaluate payloads against a deduplicated rule option tree", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Rule file to load (can be repeated; overrides the config file)
    #[arg(short, long, value_name = "FILE")]
    rules: Vec<PathBuf>,

    /// File with one payload per line, in content notation (`GET |0D 0A|`).
    /// Each payload is its own flow: flowbits never carry over between lines
    #[arg(short, long, value_name = "FILE")]
    payloads: Option<PathBuf>,

    /// Destination port given to every payload packet
    #[arg(long, default_value_t = 80)]
    dst_port: u16,

    /// Number of detection workers (0 = auto)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Record per-rule profiling statistics
    #[arg(long)]
    profile: bool,

    /// Generate default configuration file
    #[arg(long)]
    generate_config: bool,

    /// Verbose logging (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress most output)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle config generation
    if cli.generate_config {
        generate_default_config()?;
        return Ok(());
    }

    let mut settings = load_config(&cli)?;
    init_logging(&cli, &settings)?;

    info!("Starting ks-detect v{}", env!("CARGO_PKG_VERSION"));

    // Override config with CLI arguments
    if !cli.rules.is_empty() {
        settings.rules.paths = cli.rules.clone();
    }
    if let Some(workers) = cli.workers {
        settings.detection.worker_threads = workers;
    }
    if cli.profile {
        settings.performance.enable_profiling = true;
    }

    settings.validate().context("Invalid configuration")?;

    let compiled = rules::load_rule_files(&settings.rules.paths);
    let ruleset = RuleSet::build(compiled).context("Failed to build rule set")?;
    info!("{}", ruleset.stats());

    let Some(payload_path) = cli.payloads.as_ref() else {
        info!("No payload file given, rule set check complete");
        return Ok(());
    };

    let packets = load_payloads(payload_path, cli.dst_port)
        .with_context(|| format!("Failed to read payloads from {:?}", payload_path))?;

    if let Err(e) = run_detection(&settings, Arc::new(ruleset), packets) {
        error!("Detection error: {}", e);
        return Err(e.into());
    }

    info!("ks-detect shutdown complete");
    Ok(())
}

fn init_logging(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => settings.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    // RUST_LOG overrides the settings when it is set
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("ks_detect={}", log_level))
            .context("Invalid log level")?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Settings> {
    if let Some(config_path) = &cli.config {
        Settings::from_file(config_path).context("Failed to load configuration file")
    } else {
        // Try default locations
        let default_paths = vec![
            PathBuf::from("ks-detect.yaml"),
            PathBuf::from("config/ks-detect.yaml"),
            PathBuf::from("/etc/ks-detect/ks-detect.yaml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Settings::from_file(&path)
                    .context(format!("Failed to load configuration from {:?}", path));
            }
        }

        Ok(Settings::default_config())
    }
}

fn generate_default_config() -> anyhow::Result<()> {
    let config = Settings::default_config();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;

    let output_path = PathBuf::from("ks-detect.yaml");
    std::fs::write(&output_path, yaml).context("Failed to write config file")?;

    println!("Generated default configuration at: {:?}", output_path);
    Ok(())
}

/// One TCP packet per non-empty line; undecodable lines are skipped
fn load_payloads(path: &Path, dst_port: u16) -> Result<Vec<Packet>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut packets = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match rules::parse_content_pattern(&line) {
            Ok(payload) => {
                let number = packets.len() as u64 + 1;
                packets.push(Packet::tcp(Utc::now(), number, 40000, dst_port, payload));
            }
            Err(e) => warn!("Skipping payload line {}: {}", line_no + 1, e),
        }
    }

    info!("Loaded {} payloads from {:?}", packets.len(), path);
    Ok(packets)
}

fn run_detection(settings: &Settings, ruleset: Arc<RuleSet>, packets: Vec<Packet>) -> Result<()> {
    let workers = settings.detection.effective_workers();
    info!("Starting {} detection workers", workers);

    let (packet_tx, packet_rx) = crossbeam::channel::bounded(settings.detection.packet_queue_size);
    let (alert_tx, alert_rx) = crossbeam::channel::bounded(settings.detection.alert_queue_size);

    let handles = (0..workers)
        .map(|id| spawn_worker(id, settings, ruleset.clone(), packet_rx.clone(), alert_tx.clone()))
        .collect::<Result<Vec<_>>>()?;
    drop(packet_rx);
    drop(alert_tx);

    let writer = std::thread::Builder::new()
        .name("alerts".to_string())
        .spawn(move || write_alerts(alert_rx))
        .map_err(|e| KsError::ThreadError(e.to_string()))?;

    let started = Instant::now();
    let total = packets.len();
    for packet in packets {
        packet_tx.send(packet)?;
    }
    drop(packet_tx);

    let mut aggregator = StatsAggregator::new(&ruleset);
    for handle in handles {
        match handle.join() {
            Ok(state) => aggregator.add_worker(&state),
            Err(e) => error!("Worker thread panicked: {:?}", e),
        }
    }

    let alerts = writer
        .join()
        .map_err(|e| KsError::ThreadError(format!("{:?}", e)))??;

    info!(
        "Inspected {} packets in {:?}, {} alerts",
        total,
        started.elapsed(),
        alerts
    );

    if settings.performance.enable_profiling {
        eprintln!("{}", aggregator.rollup());
    }

    Ok(())
}

fn spawn_worker(
    id: usize,
    settings: &Settings,
    ruleset: Arc<RuleSet>,
    packets: Receiver<Packet>,
    alerts: Sender<Alert>,
) -> Result<JoinHandle<WorkerState>> {
    let config = settings.performance.engine_config();
    let mut budget = settings.budget.packet_budget();
    let mut queue = MatchQueue::new(settings.detection.max_queued_matches);

    std::thread::Builder::new()
        .name(format!("detect-{}", id))
        .spawn(move || {
            let mut state = ruleset.worker_state();
            let mut flowbits = FlowBitStore::new();
            let mut inspected = 0u64;

            for packet in packets.iter() {
                budget.start_packet();
                let matched = ruleset.inspect_isolated(
                    config,
                    &packet,
                    &mut queue,
                    &mut flowbits,
                    &mut budget,
                    &mut state,
                );
                inspected += 1;

                for alert in queue.drain_alerts(&packet) {
                    if alerts.send(alert).is_err() {
                        warn!("Alert writer gone, worker {} stopping", id);
                        return state;
                    }
                }
                debug!("Packet {} matched {} rules", packet.packet_number, matched);
            }

            debug!(
                "Worker {} done: {} packets, {} budget aborts, {} dropped matches",
                id,
                inspected,
                budget.exceeded(),
                queue.dropped()
            );
            state
        })
        .map_err(|e| KsError::ThreadError(e.to_string()))
}

fn write_alerts(alerts: Receiver<Alert>) -> Result<u64> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0;

    for alert in alerts.iter() {
        serde_json::to_writer(&mut out, &alert)?;
        writeln!(out)?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}
