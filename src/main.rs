use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use segment_recorder::config::{apply_env_overrides, RecorderConfig};
use segment_recorder::container;
use segment_recorder::session::SessionBuilder;

#[derive(Parser)]
#[command(name = "segment-recorder")]
#[command(about = "Records a live stream into fixed-duration segment files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a stream into rotating segment files
    Record(RecordArgs),
    /// Summarize a segment file
    Inspect {
        /// Segment file to scan
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct RecordArgs {
    /// Stream source address (rtsp://[user[:pass]@]host[:port]/path)
    #[arg(long)]
    source: Option<String>,

    /// Username for the source, overriding the address
    #[arg(long)]
    username: Option<String>,

    /// Password for the source, overriding the address
    #[arg(long)]
    password: Option<String>,

    /// Playback seconds per segment file
    #[arg(long)]
    interval: Option<u64>,

    /// Overall recording ceiling in playback seconds
    #[arg(long)]
    ceiling: Option<u64>,

    /// Directory receiving segment files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Record(args) => record(args).await,
        Command::Inspect { file } => inspect(&file),
    }
}

async fn record(args: RecordArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::load(path).await?,
        None => RecorderConfig::default(),
    };
    apply_env_overrides(&mut config);

    if let Some(source) = args.source {
        config.source.address = source;
    }
    if let Some(username) = args.username {
        config.source.username = Some(username);
    }
    if let Some(password) = args.password {
        config.source.password = Some(password);
    }
    if let Some(secs) = args.interval {
        config.recording.segment_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.ceiling {
        config.recording.recording_ceiling = Duration::from_secs(secs);
    }
    if let Some(dir) = args.output_dir {
        config.recording.output_dir = dir;
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source.address,
        interval_secs = config.recording.segment_interval.as_secs(),
        ceiling_secs = config.recording.recording_ceiling.as_secs(),
        output_dir = %config.recording.output_dir.display(),
        "starting segment recorder"
    );

    let mut session = SessionBuilder::new(config).build()?;
    let outcome = session.run().await?;
    info!(
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "recording finished"
    );
    Ok(())
}

fn inspect(file: &PathBuf) -> Result<()> {
    let summary = container::read_summary(file)?;
    println!("file:        {}", file.display());
    println!("frames:      {}", summary.frame_count);
    println!("first pts:   {:?}", summary.first_pts);
    println!("last pts:    {:?}", summary.last_pts);
    println!(
        "finalized:   {}",
        if summary.finalized { "yes" } else { "no (torn)" }
    );
    Ok(())
}

fn init_logging(config: &RecorderConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
