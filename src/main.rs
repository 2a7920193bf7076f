#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use modelsync::config::Config;
use modelsync::models::download::format_bytes;
use modelsync::models::{ImportSummary, Selection, Status, SyncManager, PAYLOAD_FILES};
use modelsync::report::Report;
use modelsync::transport::SshTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modelsync")]
#[command(about = "Sync model artifacts between registries", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/modelsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download artifacts missing from the local registry into the archive store
    Download {
        /// Names or identifiers, or -all for everything
        #[arg(required = true, allow_hyphen_values = true)]
        selectors: Vec<String>,
    },
    /// Import pending archives into the model store
    Import,
    /// Push local artifacts to the mirror registry
    Upload {
        /// Names or identifiers, or -all for everything
        #[arg(required = true, allow_hyphen_values = true)]
        selectors: Vec<String>,
    },
    /// Show pending archives and interrupted downloads
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load()?,
    };
    let manager = SyncManager::new(config.clone()).context("Failed to set up registries")?;

    let ok = match cli.command {
        Commands::Download { selectors } => {
            let report = manager.download(&parse_selections(&selectors)).await?;
            print_report(&report, "Nothing to download")
        }
        Commands::Import => match manager.import().await? {
            ImportSummary::NoWork => {
                println!("No archives to import");
                true
            }
            ImportSummary::Completed { report, .. } => print_report(&report, ""),
        },
        Commands::Upload { selectors } => {
            config.mirror_registry()?;
            let transport = SshTransport::new(&config.mirror)?;
            let report = manager
                .upload(&parse_selections(&selectors), &transport)
                .await?;
            print_report(&report, "Nothing to upload")
        }
        Commands::Status => {
            print_status(&manager.status()?);
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn parse_selections(args: &[String]) -> Vec<Selection> {
    args.iter().map(|arg| Selection::parse(arg)).collect()
}

/// Print a batch report, returning false when anything failed
fn print_report(report: &Report, empty_message: &str) -> bool {
    if report.is_empty() {
        println!("{empty_message}");
    } else {
        println!("{report}");
    }
    !report.has_failures()
}

fn print_status(status: &Status) {
    if status.archives.is_empty() {
        println!("No archives pending import");
    } else {
        println!("Pending archives:");
        for archive in &status.archives {
            let modified = archive
                .modified
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let claim = archive
                .claimed_by
                .map(|pid| format!(" (importing, pid {pid})"))
                .unwrap_or_default();
            println!(
                "  {:<40} {:>10}  {modified}{claim}",
                archive.id.as_str(),
                format_bytes(archive.size_bytes)
            );
        }
    }

    if !status.staged.is_empty() {
        println!();
        println!("Interrupted downloads:");
        for staged in &status.staged {
            println!(
                "  {:<40} {}/{} files, {} partial",
                staged.id.as_str(),
                staged.complete.len(),
                PAYLOAD_FILES.len(),
                format_bytes(staged.partial_bytes)
            );
        }
    }
}
