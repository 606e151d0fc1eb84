//! stitchd - stitching session runner
//!
//! Loads a fixture directory (topologies plus per-aggregate response
//! scripts), runs the full stitching loop against it and prints the
//! resulting report as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stitch_core::{ReservationOrch, StitchConfig, StitchServices, Stitcher};
use stitch_fixtures::{FixtureClient, FixturePathComputer, JsonDocumentCodec};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Stitched circuit reservation runner
#[derive(Parser, Debug)]
#[command(name = "stitchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding topology.json and aggregates/*.json
    #[arg(short = 'f', long)]
    fixture_dir: PathBuf,

    /// TOML file overriding engine defaults
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Slice name used in every aggregate call
    #[arg(short = 's', long, default_value = "stitch")]
    slice: String,

    /// Skip every pause (resource release, busy and status polling)
    #[arg(long)]
    no_pauses: bool,

    /// Seed for tag picks, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())
    };
    result.context("Failed to set tracing subscriber")
}

fn load_config(args: &Args) -> anyhow::Result<StitchConfig> {
    let mut config = match &args.config {
        Some(path) => StitchConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => StitchConfig::default(),
    };
    if args.no_pauses {
        config.pause_for_am_to_free_resources_secs = 0;
        config.pause_for_dcn_am_to_free_resources_secs = 0;
        config.busy_poll_interval_secs = 0;
        config.dcn_poll_interval_secs = 0;
    }
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!(fixture_dir = %args.fixture_dir.display(), slice = %args.slice, ?config, "Loaded configuration");

    let client = Arc::new(
        FixtureClient::from_dir(&args.fixture_dir).context("Failed to load aggregate scripts")?,
    );
    let computer = Arc::new(
        FixturePathComputer::from_dir(&args.fixture_dir).context("Failed to load topology")?,
    );
    let codec = Arc::new(JsonDocumentCodec::new());

    let cancel = CancellationToken::new();
    let services = StitchServices::new(client, codec.clone(), codec);
    let orch = ReservationOrch::new(config, services, args.slice)
        .context("Invalid engine configuration")?
        .with_cancellation(cancel.clone());
    let mut stitcher = Stitcher::new(orch, computer);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let report = stitcher.run().await?;
    info!(
        scs_calls = report.scs_calls,
        aggregates = report.aggregates.len(),
        "Stitching complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("stitchd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("--- Starting stitchd ---");
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "stitchd: exiting with error");
            ExitCode::FAILURE
        }
    }
}
