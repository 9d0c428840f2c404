mod config;
mod contexts;
mod extract;
mod family;
mod registry;
mod render;
mod templates;
mod walker;

use anyhow::{Context, Result, bail};
use clap::Parser;
use makefile_parser::{Diagnostics, parse_makefile};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing::level_filters::LevelFilter;

use crate::config::Config;
use crate::render::write_tree;
use crate::walker::process_makefile;

/// Generate the SIMH CMake simulator descriptors from the top-level makefile.
#[derive(Parser)]
#[command(name = "simgen", version)]
struct Cli {
    /// Log level: 0 info, 1 debug, 2 or more trace
    #[arg(short, long, num_args = 0..=1, default_value_t = 0, default_missing_value = "1")]
    debug: u8,
    /// Makefile to read; searched upward from the current directory if omitted
    #[arg(short, long)]
    makefile: Option<PathBuf>,
    /// Configuration file replacing the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output root; defaults to the makefile's directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the extracted registry as JSON instead of writing files
    #[arg(long)]
    dump: bool,
}

fn level(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Look for `makefile` in `start` and each of its parents.
fn find_makefile(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("makefile"))
        .find(|path| path.is_file())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(level(cli.debug))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::builtin()?,
    };

    let makefile_path = match cli.makefile {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("cannot determine current directory")?;
            match find_makefile(&cwd) {
                Some(path) => path,
                None => bail!("no makefile found in {} or its parents", cwd.display()),
            }
        }
    };
    info!("Reading {}", makefile_path.display());
    let content = fs::read_to_string(&makefile_path)
        .with_context(|| format!("failed to read {}", makefile_path.display()))?;

    let makefile = parse_makefile(&content);
    let mut diag = Diagnostics::new();
    let registry = process_makefile(&makefile, &config, &mut diag);
    if !diag.is_empty() {
        warn!("{} diagnostics while processing the makefile", diag.messages().len());
    }

    if cli.dump {
        println!("{}", serde_json::to_string_pretty(&registry)?);
        return Ok(());
    }

    let root = match cli.output {
        Some(root) => root,
        None => makefile_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let written = write_tree(&registry, &config, &root)?;
    info!(
        "{} simulators in {} directories, {} files written",
        registry.targets().count(),
        registry.dirs.len(),
        written.len()
    );
    Ok(())
}
