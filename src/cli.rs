//! CLI front-end
//!
//! `serve` runs the MCP server over stdio; the remaining subcommands
//! drive the same controllers directly for scripted use.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::audit::SyncTrigger;
use crate::config::Config;
use crate::mcp::serve_stdio;
use crate::service::{IndexOptions, Service};

#[derive(Parser)]
#[command(name = "codesync")]
#[command(about = "Keep a vector code-search index in sync with a source tree")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides the default lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Serve,
    /// Index a codebase
    Index {
        /// Absolute path to the codebase root
        path: PathBuf,
        /// Drop and rebuild an existing index
        #[arg(short, long)]
        force: bool,
        /// Code splitter: ast or langchain
        #[arg(long, default_value = "ast")]
        splitter: String,
        /// Additional ignore patterns (gitignore-style)
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
    },
    /// Run an incremental sync now
    Sync {
        path: PathBuf,
    },
    /// Show index status
    Status {
        path: PathBuf,
    },
    /// Drop the index and local snapshots
    Clear {
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load(None),
    };
    let state_dir = crate::default_state_dir();
    let service = Arc::new(Service::new(config, &state_dir)?);

    match cli.command {
        Commands::Serve => serve_stdio(service),
        Commands::Index {
            path,
            force,
            splitter,
            ignore_patterns,
        } => cmd_index(&service, path, force, &splitter, ignore_patterns),
        Commands::Sync { path } => cmd_sync(&service, path),
        Commands::Status { path } => cmd_status(&service, path),
        Commands::Clear { path } => cmd_clear(&service, path),
    }
}

fn cmd_index(
    service: &Arc<Service>,
    path: PathBuf,
    force: bool,
    splitter: &str,
    ignore_patterns: Vec<String>,
) -> Result<()> {
    let options = IndexOptions {
        force,
        splitter: splitter.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        custom_extensions: Vec::new(),
        ignore_patterns,
    };
    let codebase = service.ensure_codebase(&path, &options)?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let progress = |pct: u8| bar.set_position(pct as u64);
    let progress: &dyn Fn(u8) = &progress;

    let stats = codebase.controller.index(force, Some(progress))?;
    bar.finish_and_clear();

    println!(
        "{} {} files, {} chunks in {} ms",
        "Indexed".green().bold(),
        stats.indexed_files,
        stats.total_chunks,
        stats.duration_ms
    );
    if stats.failed_files > 0 {
        println!(
            "{} {} file(s) skipped due to read errors",
            "Note:".yellow(),
            stats.failed_files
        );
    }
    if stats.outcome == crate::registry::IndexOutcome::LimitReached {
        println!(
            "{} chunk budget reached; the index is partial",
            "Note:".yellow()
        );
    }
    Ok(())
}

fn cmd_sync(service: &Arc<Service>, path: PathBuf) -> Result<()> {
    let codebase = service.codebase(&path)?;
    let report = codebase.controller.sync(SyncTrigger::Manual)?;
    println!(
        "{} +{} ~{} -{} in {} ms",
        "Synced".green().bold(),
        report.counts.added,
        report.counts.modified,
        report.counts.removed,
        report.duration_ms
    );
    Ok(())
}

fn cmd_status(service: &Arc<Service>, path: PathBuf) -> Result<()> {
    let status = service.status(&path)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_clear(service: &Arc<Service>, path: PathBuf) -> Result<()> {
    service.clear(&path)?;
    println!("{} index for {}", "Cleared".green().bold(), path.display());
    Ok(())
}
