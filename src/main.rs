//! Session converter command line.
//!
//! # Usage
//!
//! ```bash
//! # Convert every session of a manifest
//! session-convert run --root /data --output /conversions \
//!     --manifest sessions.csv --lines /data/Lines.mat
//!
//! # Same, from a saved configuration
//! session-convert run --config batch.json
//!
//! # Only resolve the manifest and write the scan report
//! session-convert scan --root /data --manifest sessions.csv --report scan.csv
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use session_converter::locator::scan_manifest;
use session_converter::{read_manifest, BatchConfig, BatchOrchestrator};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Converts recording sessions into self-describing documents
#[derive(Parser, Debug)]
#[command(name = "session-convert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert every uniquely resolved session of a manifest
    Run(RunArgs),

    /// Resolve manifest rows to session folders and write the scan report
    Scan {
        /// Directory tree searched for session folders
        #[arg(long)]
        root: PathBuf,

        /// Manifest CSV
        #[arg(long)]
        manifest: PathBuf,

        /// Scan report to write
        #[arg(long, default_value = "scan_report.csv")]
        report: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON batch configuration; replaces the path options below
    #[arg(short, long, conflicts_with_all = ["root", "output", "manifest", "lines"])]
    config: Option<PathBuf>,

    /// Directory tree searched for session folders
    #[arg(long, required_unless_present = "config")]
    root: Option<PathBuf>,

    /// Directory that receives the Conversions-* output root
    #[arg(long, required_unless_present = "config")]
    output: Option<PathBuf>,

    /// Manifest CSV
    #[arg(long, required_unless_present = "config")]
    manifest: Option<PathBuf>,

    /// MAT file with the mouse-line catalog
    #[arg(long, required_unless_present = "config")]
    lines: Option<PathBuf>,

    /// Skip sessions already converted under the output directory
    #[arg(long)]
    skip_existing: bool,

    /// Save the effective configuration to this JSON file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<BatchConfig> {
        let config = match self.config {
            Some(path) => BatchConfig::load_json(&path)
                .with_context(|| format!("reading configuration {}", path.display()))?,
            None => {
                // clap guarantees these when --config is absent
                let missing = || anyhow::anyhow!("missing path option");
                BatchConfig::new(
                    self.root.ok_or_else(missing)?,
                    self.output.ok_or_else(missing)?,
                    self.manifest.ok_or_else(missing)?,
                    self.lines.ok_or_else(missing)?,
                )
            }
        };
        let config = if self.skip_existing {
            config.with_skip_existing(true)
        } else {
            config
        };
        if let Some(path) = self.save_config {
            config
                .save_json(&path)
                .with_context(|| format!("saving configuration {}", path.display()))?;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("session-convert v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => {
            let config = args.into_config()?;
            let summary = BatchOrchestrator::new(config)
                .run()
                .context("batch aborted")?;
            for status in summary.statuses.iter().filter(|s| !s.is_converted()) {
                warn!(
                    "{}: extraction {}, assembly {}",
                    status.session, status.extraction, status.assembly
                );
            }
            info!("Status report: {}", summary.status_report.display());
        }
        Commands::Scan {
            root,
            manifest,
            report,
        } => {
            let rows = read_manifest(&manifest)
                .with_context(|| format!("reading manifest {}", manifest.display()))?;
            let results = scan_manifest(&rows, &root, &report)?;
            let unique = results.iter().filter(|r| r.is_unique()).count();
            info!("{} unique sessions out of {} manifest rows", unique, rows.len());
        }
    }

    Ok(())
}
