#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the open-access document harvester.

use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use openstrength_cli_utils::{IndicatifProgress, MultiProgress, init_logger};
use openstrength_harvest::{HarvestContext, HarvestError, HarvestOptions, enabled_sources, run_pipeline};
use openstrength_harvest_models::{RunSummary, SourceKind};
use openstrength_source::config::{HarvestConfig, load_config};
use openstrength_store::inventory;

#[derive(Parser)]
#[command(name = "openstrength_harvest", about = "Open-access document harvester")]
struct Cli {
    /// Configuration file (overrides `OPENSTRENGTH_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Artifact root (overrides `paths.raw_dir`)
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every enabled source in pipeline order
    Run {
        /// Comma-separated list of sources (overrides `OPENSTRENGTH_SOURCES` env var)
        #[arg(long)]
        sources: Option<String>,
        /// Re-harvest items that are already complete on disk
        #[arg(long)]
        force: bool,
        /// Maximum number of candidates per query (for testing)
        #[arg(long)]
        limit: Option<u64>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Harvest a single source, even if it is disabled
    Harvest {
        /// Source name (e.g., "`oai_pmh`")
        source: String,
        /// Re-harvest items that are already complete on disk
        #[arg(long)]
        force: bool,
        /// Maximum number of candidates per query
        #[arg(long)]
        limit: Option<u64>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured sources
    Sources,
    /// Count harvested items per source and payload status
    Inventory,
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{:<12} {:<18} {:>8}  DETAILS", "SOURCE", "STATUS", "SECS");
    println!("{}", "-".repeat(72));
    for report in &summary.reports {
        let details = report
            .error
            .clone()
            .unwrap_or_else(|| report.stats.to_string());
        println!(
            "{:<12} {:<18} {:>8.1}  {details}",
            report.source.as_ref(),
            report.status.as_ref(),
            report.elapsed_secs
        );
    }
    println!("{}", "-".repeat(72));
    println!(
        "{} attempted, {} ok, {} failed, {} skipped",
        summary.attempted(),
        summary.ok(),
        summary.errors(),
        summary.skipped()
    );
    println!("Totals: {}", summary.totals());
    Ok(())
}

async fn run(
    multi: &MultiProgress,
    config: &HarvestConfig,
    raw_dir: Option<PathBuf>,
    options: HarvestOptions,
    selected: Option<&[SourceKind]>,
) -> Result<RunSummary, HarvestError> {
    let mut ctx = HarvestContext::from_config(config, options)?
        .with_progress(Arc::new(IndicatifProgress::new(multi)));
    if let Some(raw_dir) = raw_dir {
        ctx = ctx.with_raw_root(raw_dir);
    }
    log::info!("Writing artifacts under {}", ctx.raw_root.display());
    Ok(run_pipeline(config, &ctx, selected).await)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let (summary, json) = match cli.command {
        Commands::Sources => {
            println!("{:<12} {:<8} {:>6}  QUERIES", "SOURCE", "ENABLED", "RATE/S");
            println!("{}", "-".repeat(60));
            for def in &config.sources {
                println!(
                    "{:<12} {:<8} {:>6.2}  {}",
                    def.kind().as_ref(),
                    def.enabled,
                    def.rate_per_sec,
                    def.queries.join("; ")
                );
            }
            return Ok(());
        }
        Commands::Inventory => {
            let raw_root = cli.raw_dir.unwrap_or_else(|| config.paths.raw_dir.clone());
            let inv = inventory(&raw_root)?;
            for (source, statuses) in &inv.by_source {
                let counts: Vec<String> = statuses
                    .iter()
                    .map(|(status, n)| format!("{status}={n}"))
                    .collect();
                println!("{source:<12} {}", counts.join(" "));
            }
            println!(
                "{} item(s), {} incomplete, {} unreadable",
                inv.total(),
                inv.incomplete,
                inv.unreadable
            );
            return Ok(());
        }
        Commands::Run {
            sources,
            force,
            limit,
            json,
        } => {
            let selected = enabled_sources(sources)?;
            let options = HarvestOptions { force, limit };
            let summary = run(&multi, &config, cli.raw_dir, options, selected.as_deref()).await?;
            (summary, json)
        }
        Commands::Harvest {
            source,
            force,
            limit,
            json,
        } => {
            let kind = SourceKind::from_str(&source).map_err(|_| {
                HarvestError::config(format!("unknown source '{source}'"))
            })?;
            let Some(def) = config.sources.iter_mut().find(|d| d.kind() == kind) else {
                return Err(HarvestError::config(format!("source '{kind}' is not configured")).into());
            };
            if !def.enabled {
                log::warn!("[{kind}] Disabled in configuration; harvesting anyway");
                def.enabled = true;
            }
            let options = HarvestOptions { force, limit };
            let summary = run(&multi, &config, cli.raw_dir, options, Some(&[kind])).await?;
            (summary, json)
        }
    };

    print_summary(&summary, json)?;
    if summary.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
