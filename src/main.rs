//! Dunebugger starter - main entry point

use clap::{Parser, Subcommand};
use dunebugger_starter::config::StarterConfig;
use dunebugger_starter::observability::{health::HealthServer, init_default_logging};
use dunebugger_starter::starter::StarterLifecycle;
use dunebugger_starter::transport::mqtt::MqttTransport;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG_PATHS: &[&str] = &["dunebugger-starter.toml", "config/dunebugger-starter.toml"];

/// Edge agent bridging a GPIO trigger and switch commands to the message bus
#[derive(Parser)]
#[command(name = "dunebugger-starter")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the starter until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the validated configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match resolve_config_path(cli.config.as_deref()) {
        Some(path) => path,
        None => {
            init_default_logging(cli.verbose > 0);
            error!(
                "No configuration file found. Provide one with -c/--config or create dunebugger-starter.toml"
            );
            process::exit(1);
        }
    };

    let config = match StarterConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging(cli.verbose > 0);
            error!(path = %config_path.display(), "Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    init_default_logging(config.general.debug_mode || cli.verbose > 0);
    info!(
        path = %config_path.display(),
        "Dunebugger starter v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match cli.command {
        Commands::Run => run_starter(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

async fn run_starter(config: StarterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transport = MqttTransport::new(config.mqtt_settings());
    let pin_labels = config.pin_labels()?;
    let mut starter = StarterLifecycle::new(config, transport).await?;

    if let Some(port) = std::env::var("HEALTH_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        let health_server = Arc::new(
            HealthServer::new(starter.client_id(), port, starter.connection_state_watch())
                .with_gpio(starter.gpio().clone(), pin_labels),
        );
        tokio::spawn(health_server.start());
    }

    starter.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Starter is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    starter.shutdown().await?;
    Ok(())
}

fn handle_config_command(
    config: &StarterConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
