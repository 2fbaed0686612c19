// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use avn_config::EngineConfig;
use avn_runtime::Engine;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for failed commands and setup errors.
const EXIT_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "avn", version, about = "AavionDB command line")]
struct Cli {
    /// The statement to execute, e.g. 'show storyverse hero @2'.
    /// Multiple arguments are joined with spaces.
    statement: Vec<String>,

    /// Storage root (overrides config and AVN_ROOT).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path to a TOML configuration file (or set AVN_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("avn=debug")
    } else {
        EnvFilter::new("avn=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(ok) => std::process::exit(if ok { 0 } else { EXIT_ERROR }),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli)?;
    let engine = Engine::bootstrap(config).context("engine bootstrap failed")?;

    let statement = if cli.statement.is_empty() {
        "help".to_string()
    } else {
        cli.statement.join(" ")
    };

    let envelope = engine.execute_statement(&statement);
    let rendered =
        serde_json::to_string_pretty(&envelope).context("response serialization failed")?;
    println!("{rendered}");
    Ok(envelope.is_ok())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("AVN_CONFIG").map(PathBuf::from));
    let mut config = match config_path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(root) = cli
        .root
        .clone()
        .or_else(|| std::env::var_os("AVN_ROOT").map(PathBuf::from))
    {
        config.root = root;
    }
    Ok(config)
}
