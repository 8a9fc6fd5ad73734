use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use binary_vetting::{LocalArchive, PipelineConfig, SvgRenderer, TerminalFrontend};

#[derive(Parser)]
#[command(name = "binary-vetting")]
#[command(about = "Find and vet orbital periods of close binary stars")]
struct Cli {
    /// TOML configuration file; omitted fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exposure cadence in seconds
    #[arg(long)]
    cadence: Option<f64>,

    /// Render every star first, then review the stored images
    #[arg(long)]
    preload: bool,

    /// Root directory of the local archive
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Results table to append to
    #[arg(long)]
    results: Option<PathBuf>,

    /// Write interactive plots to this directory
    #[arg(long)]
    plots: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(cadence) = cli.cadence {
        config.cadence_s = cadence;
    }
    if cli.preload {
        config.preload = true;
    }
    if let Some(archive) = cli.archive {
        config.archive_root = archive;
    }
    if let Some(results) = cli.results {
        config.results_path = results;
    }
    if let Some(plots) = cli.plots {
        config.plot_dir = Some(plots);
    }

    let archive = LocalArchive::new(&config.archive_root);
    let mut frontend = TerminalFrontend::new(io::stdin().lock(), io::stdout());
    if let Some(dir) = &config.plot_dir {
        frontend = frontend.with_renderer(SvgRenderer::new(dir));
    }

    let summary = binary_vetting::run(&config, &archive, &mut frontend, None)
        .context("vetting run failed")?;
    info!(
        "{} committed, {} abandoned, {} skipped; results in {}",
        summary.committed,
        summary.abandoned,
        summary.skipped,
        config.results_path.display()
    );
    Ok(())
}
