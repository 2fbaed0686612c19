// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use avn_config::EngineConfig;
use avn_daemon::AppState;
use avn_runtime::Engine;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "avn-daemon", version, about = "AavionDB HTTP endpoint")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8520")]
    bind: SocketAddr,

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

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("avn=debug,avn_daemon=debug")
    } else {
        EnvFilter::new("avn=info,avn_daemon=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let bind = cli.bind;
    let engine = tokio::task::spawn_blocking(move || Engine::bootstrap(config))
        .await
        .context("bootstrap task failed")?
        .context("engine bootstrap failed")?;

    let state = Arc::new(AppState { engine });
    avn_daemon::serve(state, bind).await
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
