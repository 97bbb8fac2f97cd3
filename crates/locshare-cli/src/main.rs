use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::LocshareConfig;
use locshare_relay::RelayServer;

#[derive(Parser)]
#[command(name = "locshare")]
#[command(version)]
#[command(about = "locshare: live location sharing relay")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until Ctrl+C
    Start {
        /// Listen on this port, overriding config and PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write the default config to ~/.locshare/config.toml
    Init,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start { port } => cmd_start(&cli.config, port).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    println!("locshare initialized at {}", config_dir.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = LocshareConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut cfg = LocshareConfig::load(config_path)?;
    if let Some(port) = port {
        cfg.server.port = port;
    }
    let settings = cfg.relay_settings()?;
    info!(
        "Starting relay on {} (event capacity {}, coordinate validation {})",
        settings.bind,
        settings.event_capacity,
        if settings.validate_coordinates { "on" } else { "off" }
    );

    let cancel = CancellationToken::new();
    let mut server = RelayServer::new(settings).spawn(cancel.clone());

    // The relay only finishes on its own if it failed to start or crashed
    let finished = tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
            None
        }
        result = &mut server => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => server.await,
    };
    result.context("Relay task panicked")?.context("Relay failed")?;

    println!("locshare stopped.");
    Ok(())
}
