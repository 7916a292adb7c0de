//! MQTT HTTP Bridge - Main Entry Point

use clap::{Parser, Subcommand};
use mqtt_http_bridge::observability::init_default_logging;
use mqtt_http_bridge::{server, MqttClient, Settings};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long open subscribe streams may keep the server alive after a signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// HTTP endpoints for publishing to and streaming from an MQTT broker
#[derive(Parser)]
#[command(name = "mqtt-http-bridge")]
#[command(version)]
struct Cli {
    /// HTTP listen port, overriding HTTP_PORT
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Inspect the configuration read from the environment
    Config {
        /// Print the settings with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!(
        "Starting MQTT HTTP bridge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut settings = Settings::from_env();
    if let Some(port) = cli.port {
        settings.http_port = port;
    }

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(settings).await,
        Commands::Config { show } => handle_config_command(&settings, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_bridge(settings: Settings) -> Result<(), BoxError> {
    info!(settings = ?settings.redacted(), "Settings loaded");
    if !settings.auth_enabled() {
        warn!("AUTH_KEY is not set, requests are not authorized");
    }

    let settings = Arc::new(settings);
    let transport = Arc::new(MqttClient::connect(settings.mqtt.clone())?);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown = async move {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    };

    let mut server = tokio::spawn(server::serve(settings, transport.clone(), shutdown));

    tokio::select! {
        result = &mut server => {
            // The server only returns on its own when binding fails
            result??;
            return Ok(());
        }
        signal = wait_for_shutdown_signal() => {
            signal?;
        }
    }

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            warn!("Open streams did not finish in time, closing them");
            server.abort();
        }
    }

    transport.shutdown().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), BoxError> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

fn handle_config_command(settings: &Settings, show: bool) -> Result<(), BoxError> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&settings.redacted())?);
    }

    info!("Configuration loaded from environment");
    Ok(())
}
