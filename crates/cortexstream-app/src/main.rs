//! CortexStream Application
//!
//! Command-line entry point for the CortexStream pipeline. Connects to a
//! headband (or the built-in simulator), runs a session and prints one JSON
//! snapshot per line on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Simulated headband for one minute
//! cortexstream run --device simulate --duration 60
//!
//! # Bluetooth headband with a config override, recording to disk
//! cortexstream run --device ble --config pipeline.json --record session.json
//!
//! # List nearby headbands
//! cortexstream devices
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cortexstream_core::PipelineConfig;
use cortexstream_native::bridge::{DeviceTransport, SimulatedHeadband, SimulationConfig};
use cortexstream_native::session::{BroadcastSink, SessionDriver, SessionRecorder};

/// CortexStream Application
#[derive(Parser, Debug)]
#[command(name = "cortexstream")]
#[command(author, version, about = "Real-time headband state pipeline", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a session and print snapshots as JSON lines
    Run {
        /// Device connection type: ble or simulate
        #[arg(short, long, default_value = "simulate")]
        device: String,

        /// BLE address of the headband (first found if omitted)
        #[arg(long)]
        address: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// JSON file overriding pipeline settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the session recording to this JSON file on exit
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// List available headbands
    Devices {
        /// Scan duration in seconds
        #[arg(long, default_value = "5")]
        scan_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("CortexStream v{}", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Run { device, address, duration, config, record } => {
            let config = load_config(config.as_deref())?;
            rt.block_on(run(&device, address, duration, &config, record.as_deref()))
        }
        Commands::Devices { scan_secs } => rt.block_on(list_devices(scan_secs)),
    }
}

/// Load and validate the pipeline configuration
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let config: PipelineConfig =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            config
        }
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run a session on the selected transport
async fn run(
    device: &str,
    address: Option<String>,
    duration: Option<u64>,
    config: &PipelineConfig,
    record: Option<&Path>,
) -> anyhow::Result<()> {
    info!("Device mode: {}", device);
    match device {
        "simulate" => run_session(SimulatedHeadband::new(SimulationConfig::default()), duration, config, record).await,
        "ble" => {
            #[cfg(feature = "ble")]
            {
                use cortexstream_native::bridge::BleHeadband;
                run_session(BleHeadband::new(address), duration, config, record).await
            }
            #[cfg(not(feature = "ble"))]
            {
                let _ = address;
                anyhow::bail!(
                    "BLE support not enabled. Rebuild with --features ble:\n\
                     cargo run -p cortexstream-app --features ble"
                );
            }
        }
        other => anyhow::bail!("Unknown device type '{other}' (expected ble or simulate)"),
    }
}

async fn run_session<T: DeviceTransport>(
    transport: T,
    duration: Option<u64>,
    config: &PipelineConfig,
    record: Option<&Path>,
) -> anyhow::Result<()> {
    let live = BroadcastSink::new(64);
    let printer = tokio::spawn(print_snapshots(live.subscribe()));

    let recorder = SessionRecorder::new();
    let mut driver = SessionDriver::new(transport, config).with_sink(live);
    if record.is_some() {
        recorder.start();
        driver.add_sink(Box::new(recorder.clone()));
        let _raw = recorder.capture_raw(driver.subscribe_raw());
    }
    if let Some(seconds) = duration {
        driver.stop_after_windows(seconds);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping session");
            let _ = stop_tx.send(true);
        }
    });

    let outcome = driver.run(stop_rx).await;
    drop(driver);
    let _ = printer.await;

    if let Some(path) = record {
        recorder.write_json(path).with_context(|| format!("writing {}", path.display()))?;
    }

    let summary = outcome?;
    info!(
        "Session ended ({:?}): {} snapshots, {} reconnects, {} malformed samples",
        summary.reason, summary.windows, summary.link.reconnects, summary.stats.malformed
    );
    Ok(())
}

/// Print each snapshot as one JSON line until the session ends
async fn print_snapshots(mut rx: broadcast::Receiver<std::sync::Arc<cortexstream_core::Snapshot>>) {
    use std::io::Write;

    let stdout = std::io::stdout();
    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                let line = match serde_json::to_string(snapshot.as_ref()) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to serialize snapshot: {}", e);
                        continue;
                    }
                };
                let mut out = stdout.lock();
                if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Output lagged, dropped {} snapshots", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// List available headbands
async fn list_devices(scan_secs: u64) -> anyhow::Result<()> {
    #[cfg(feature = "ble")]
    {
        use cortexstream_native::bridge::BleHeadband;

        info!("Scanning for headbands ({}s)...", scan_secs);
        let devices = BleHeadband::scan(std::time::Duration::from_secs(scan_secs)).await?;
        if devices.is_empty() {
            info!("  (none found)");
        }
        for device in devices {
            println!(
                "{}\t{}\t{}",
                device.address,
                device.name.as_deref().unwrap_or("-"),
                device.rssi.map_or_else(|| "-".to_string(), |r| format!("{r} dBm"))
            );
        }
    }

    #[cfg(not(feature = "ble"))]
    {
        let _ = scan_secs;
        warn!("BLE support not enabled. Rebuild with --features ble");
    }

    Ok(())
}
