//! CLI entry point for the lanwatch-discover presence tracker.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use lanwatch_core::config::{MethodKind, ScanConfigPatch};
use lanwatch_core::types::DeviceId;

use lanwatch_discover::config::DiscoverConfig;
use lanwatch_discover::provider::patch_from_pair;
use lanwatch_discover::scheduler::ScanScheduler;
use lanwatch_discover::{DiscoverError, ScanEngine, ScanRequest};
use lanwatch_store::StoreError;

#[derive(Parser)]
#[command(name = "lanwatch-discover")]
#[command(about = "LAN device discovery and presence tracking")]
struct Cli {
    /// Config file prefix (default: lanwatch).
    #[arg(short, long, default_value = "lanwatch")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one manual scan pass and print the report.
    Scan {
        /// Subnet to scan instead of the configured one (CIDR).
        #[arg(short, long)]
        subnet: Option<String>,

        /// Probe method for this pass; repeat for several.
        #[arg(short, long = "method")]
        methods: Vec<MethodKind>,
    },

    /// Run scheduled scans until interrupted.
    Daemon,

    /// Inspect or change the scan configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List known devices.
    Devices {
        /// Only devices whose ip, MAC, hostname, alias, or vendor match.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// List recent scan sessions.
    Sessions {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print presence periods for one local calendar day.
    Timeline {
        /// Day as YYYY-MM-DD.
        date: NaiveDate,

        /// Restrict to one device id.
        #[arg(short, long)]
        device: Option<DeviceId>,
    },

    /// Set a device alias, or clear it when no name is given.
    Alias {
        /// Device id or MAC address.
        target: String,
        name: Option<String>,
    },

    /// Device counts and recent activity.
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Presets,
    /// Apply a preset: fast, balanced, thorough, stealth.
    Load { preset: String },
    /// Set one field, e.g. `set scan_rate 50`.
    Set { key: String, value: String },
    /// Check a JSON partial config without applying it.
    Validate { patch: String },
    TestNetwork { cidr: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let discover_config = load_discover_config(&cli.config)?;
    // The data directory is held by one process at a time; a running daemon
    // makes every other subcommand stop here.
    let engine = match ScanEngine::from_config(&discover_config) {
        Ok(engine) => Arc::new(engine),
        Err(DiscoverError::Store(StoreError::Locked(dir))) => {
            anyhow::bail!("Data directory {dir} is in use, is a lanwatch daemon running?")
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(data_dir = %discover_config.data_dir.display(), "Store opened");

    match cli.command {
        Command::Scan { subnet, methods } => {
            let mut request = ScanRequest::manual();
            if let Some(cidr) = subnet {
                request = request.with_subnet(cidr);
            }
            if !methods.is_empty() {
                request = request.with_methods(methods);
            }
            let cancel = cancel_on_ctrl_c();
            print_json(&engine.scan(request, &cancel).await)?;
        }
        Command::Daemon => run_daemon(engine, &discover_config).await,
        Command::Config { action } => run_config(&engine, action)?,
        Command::Devices { search } => match search {
            Some(query) => print_json(&engine.search_devices(&query)?)?,
            None => print_json(&engine.devices()?)?,
        },
        Command::Sessions { limit } => print_json(&engine.sessions(limit)?)?,
        Command::Timeline { date, device } => {
            print_json(&engine.timeline(date, &Local, device.as_ref())?)?
        }
        Command::Alias { target, name } => print_json(&engine.set_alias(&target, name.as_deref())?)?,
        Command::Stats => print_json(&engine.stats()?)?,
    }

    Ok(())
}

async fn run_daemon(engine: Arc<ScanEngine>, config: &DiscoverConfig) {
    let cancel = cancel_on_ctrl_c();

    // Presence events go to stdout as JSON lines.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    ScanScheduler::new(engine, config).run(cancel).await;
}

fn run_config(engine: &ScanEngine, action: ConfigAction) -> anyhow::Result<()> {
    let provider = engine.provider();
    match action {
        ConfigAction::Show => print_json(&provider.get()),
        ConfigAction::Presets => print_json(&provider.list_presets()),
        ConfigAction::Load { preset } => print_json(&provider.load_preset(&preset)?),
        ConfigAction::Set { key, value } => {
            let patch = patch_from_pair(&key, &value)?;
            print_json(&provider.update(&patch)?)
        }
        ConfigAction::Validate { patch } => {
            let patch: ScanConfigPatch = serde_json::from_str(&patch)
                .map_err(|e| anyhow::anyhow!("Invalid config patch: {e}"))?;
            print_json(&provider.validate(&patch))
        }
        ConfigAction::TestNetwork { cidr } => print_json(&provider.test_network(&cidr)),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    cancel
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_discover_config(file_prefix: &str) -> anyhow::Result<DiscoverConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LANWATCH_DISCOVER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<DiscoverConfig>("discover") {
        Ok(c) => Ok(c),
        Err(_) => Ok(DiscoverConfig::default()),
    }
}
